//! Three replicas contend for one key in an in-memory store. The leader is
//! stopped twice and the job moves to another replica each time.

use elector::{Callbacks, CancellationToken, Elector, ElectorConfig, InMemoryLeaseStore};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;

fn callbacks(name: &'static str) -> Callbacks {
    Callbacks::new()
        .on_acquired(move |scope: CancellationToken| async move {
            println!("[{name}] leading, job started");
            scope.cancelled().await;
            println!("[{name}] job stopped");
        })
        .on_lost(move |_| async move {
            println!("[{name}] leadership released");
        })
}

#[tokio::main]
async fn main() -> elector::Result<()> {
    let store = Arc::new(InMemoryLeaseStore::new());
    let root = CancellationToken::new();
    let config = ElectorConfig::new("demo:leader", Duration::from_secs(3));

    let mut replicas = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let elector = Elector::new(config.clone(), store.clone(), callbacks(name))?;
        elector.start(&root)?;
        replicas.push((name, elector));
    }

    for _ in 0..2 {
        sleep(Duration::from_secs(2)).await;
        if let Some((name, leader)) = replicas.iter().find(|(_, e)| e.is_leader()) {
            println!("stopping leader {name} ({})", leader.identity());
            leader.stop(Duration::from_secs(1)).await?;
        }
    }

    sleep(Duration::from_secs(2)).await;
    for (name, elector) in &replicas {
        println!("{name}: {}", elector.state());
        elector.stop(Duration::from_secs(1)).await?;
    }
    Ok(())
}
