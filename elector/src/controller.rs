use crate::{
    config::ElectorConfig,
    election::{ElectionLoop, ElectionState},
    store::LeaseStore,
    supervisor::{Callbacks, WorkSupervisor},
    Error, Identity, Result,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

/// Public handle of one elector instance.
///
/// Guards exactly one coordination key. Several electors, for the same or
/// different keys, may live in the same process.
#[derive(Debug)]
pub struct Elector {
    config: ElectorConfig,
    identity: Identity,
    store: Arc<dyn LeaseStore>,
    callbacks: Callbacks,
    state: Arc<watch::Sender<ElectionState>>,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    running: Option<Running>,
    /// Shutdown that outlived its stop deadline and is still finishing.
    draining: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    cleanup: TaskTracker,
}

impl Elector {
    /// Builds an elector; fails on an invalid ttl or key before anything runs.
    pub fn new(config: ElectorConfig, store: Arc<dyn LeaseStore>, callbacks: Callbacks) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(ElectionState::Stopped);

        Ok(Self {
            config,
            identity: Identity::new(),
            store,
            callbacks,
            state: Arc::new(state),
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub fn config(&self) -> &ElectorConfig {
        &self.config
    }

    pub fn state(&self) -> ElectionState {
        *self.state.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.state().is_leader()
    }

    /// Watches state transitions of this elector.
    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running.is_some()
    }

    /// Spawns the election loop under a child of `parent`.
    ///
    /// Calling it again while running does nothing. Cancelling `parent` shuts
    /// the loop down the same way [`Elector::stop`] does, but the elector
    /// counts as running until `stop` is called. Must be called from within a
    /// tokio runtime.
    pub fn start(&self, parent: &CancellationToken) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.running.is_some() {
            debug!(key = %self.config.key, "leader loop already running");
            return Ok(());
        }
        if let Some(previous) = &inner.draining {
            if !previous.is_finished() {
                return Err(Error::Draining);
            }
        }
        inner.draining = None;

        let cancel = parent.child_token();
        let cleanup = TaskTracker::new();
        let election = ElectionLoop::new(
            &self.config,
            self.identity,
            self.store.clone(),
            WorkSupervisor::new(self.callbacks.clone(), cleanup.clone()),
            self.state.clone(),
        );
        self.state.send_replace(ElectionState::Seeking);
        let handle = tokio::spawn(election.run(cancel.clone()));

        inner.running = Some(Running {
            cancel,
            handle,
            cleanup,
        });

        info!(
            key = %self.config.key,
            identity = %self.identity,
            "elector started"
        );
        Ok(())
    }

    /// Stops the election, waiting at most `timeout` for it to drain.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        self.stop_until(tokio::time::sleep(timeout)).await
    }

    /// Stops the election, waiting until `deadline` completes at the latest.
    ///
    /// Draining means: the guarded work scope is cancelled, `on_lost` has run
    /// to completion and the lease release has been attempted. If `deadline`
    /// fires first, returns [`Error::StopTimeout`] and draining carries on in
    /// the background. Stopping an elector that is not running is a no-op.
    pub async fn stop_until<F>(&self, deadline: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let running = self.inner.lock().running.take();
        let Some(Running {
            cancel,
            handle,
            cleanup,
        }) = running
        else {
            return Ok(());
        };

        cancel.cancel();
        let mut pending = PendingDrain {
            inner: &self.inner,
            drained: Some(tokio::spawn(async move {
                if let Err(e) = handle.await {
                    error!("leader loop task failed: {}", e);
                }
                cleanup.close();
                cleanup.wait().await;
            })),
        };

        tokio::select! {
            res = pending.join() => {
                if let Err(e) = res {
                    error!("drain task failed: {}", e);
                }
                info!(key = %self.config.key, identity = %self.identity, "elector stopped");
                Ok(())
            }
            () = deadline => {
                warn!(key = %self.config.key, "stop deadline reached, still draining in the background");
                Err(Error::StopTimeout)
            }
        }
    }
}

impl Drop for Elector {
    /// Drains the loop in the background, like a `stop` nobody waits for.
    fn drop(&mut self) {
        if let Some(running) = self.inner.get_mut().running.take() {
            debug!(key = %self.config.key, "elector dropped while running, draining");
            running.cancel.cancel();
            running.cleanup.close();
        }
    }
}

/// Drain task of one `stop` call.
///
/// Unless it was joined to completion, the handle is parked in
/// `Inner::draining` when this goes away, so `start` keeps refusing to run
/// until the previous lease has been released. That also covers a `stop`
/// future dropped by its caller.
struct PendingDrain<'a> {
    inner: &'a Mutex<Inner>,
    drained: Option<JoinHandle<()>>,
}

impl PendingDrain<'_> {
    async fn join(&mut self) -> std::result::Result<(), tokio::task::JoinError> {
        let res = match self.drained.as_mut() {
            Some(drained) => drained.await,
            None => Ok(()),
        };
        self.drained = None;
        res
    }
}

impl Drop for PendingDrain<'_> {
    fn drop(&mut self) {
        if let Some(drained) = self.drained.take() {
            self.inner.lock().draining = Some(drained);
        }
    }
}
