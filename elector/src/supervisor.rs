//! Runs the caller's guarded work in lock-step with leadership.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

pub type Callback = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

/// Hooks fired when this instance gains or loses the lease.
///
/// Each hook is called with a cancellation token and returns a future that
/// is spawned onto the runtime, so a slow hook never delays a renew.
/// `on_acquired` receives the work scope, cancelled when leadership ends.
/// `on_lost` receives a fresh token that nothing cancels.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_acquired: Option<Callback>,
    on_lost: Option<Callback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_acquired<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: Callback = Arc::new(move |scope| f(scope).boxed());
        self.on_acquired = Some(callback);
        self
    }

    #[must_use]
    pub fn on_lost<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: Callback = Arc::new(move |scope| f(scope).boxed());
        self.on_lost = Some(callback);
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_acquired", &self.on_acquired.is_some())
            .field("on_lost", &self.on_lost.is_some())
            .finish()
    }
}

/// Owns the single work scope of one election loop.
#[derive(Debug)]
pub(crate) struct WorkSupervisor {
    callbacks: Callbacks,
    scope: Option<CancellationToken>,
    cleanup: TaskTracker,
}

impl WorkSupervisor {
    /// `cleanup` tracks every spawned `on_lost` so shutdown can wait for them.
    pub(crate) fn new(callbacks: Callbacks, cleanup: TaskTracker) -> Self {
        Self {
            callbacks,
            scope: None,
            cleanup,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.scope.is_some()
    }

    /// Opens a work scope under `root` and dispatches `on_acquired` into it.
    pub(crate) fn start(&mut self, root: &CancellationToken) {
        if self.scope.is_some() {
            warn!("work scope already active, ignoring start");
            return;
        }

        let scope = root.child_token();
        if let Some(on_acquired) = &self.callbacks.on_acquired {
            tokio::spawn(on_acquired(scope.clone()));
        }
        debug!("work scope opened");
        self.scope = Some(scope);
    }

    /// Cancels the work scope, then dispatches `on_lost`.
    ///
    /// Returns `false` when no scope was active, in which case `on_lost` is
    /// not fired.
    pub(crate) fn stop(&mut self) -> bool {
        let Some(scope) = self.scope.take() else {
            return false;
        };

        scope.cancel();
        if let Some(on_lost) = &self.callbacks.on_lost {
            self.cleanup.spawn(on_lost(CancellationToken::new()));
        }
        debug!("work scope cancelled");
        true
    }
}
