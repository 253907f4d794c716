//! Module lifecycle.
//!
//! Start builds the tiers in dependency order (lock group, interceptor
//! aggregate, scope listener) and any failure unwinds whatever was
//! already built, so a partial initialization is never observable.
//! Stop runs the reverse order; every tier is attempted even after an
//! earlier one fails, and the worst result wins.
//!
//! The embedder installs its `tracing` subscriber before calling
//! [`HookStack::start`]; the stack only emits events.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::HookParams;
use crate::error::HookError;
use crate::interceptor::VnodeInterceptor;
use crate::locks::LockGroup;
use crate::vfs::{AuthorizationScope, Filesystem, ProcessTable};

/// Diagnostic name of the hook's lock group.
const LOCK_GROUP_NAME: &str = "projvfs";

struct Running<F: Filesystem, S: AuthorizationScope<F>> {
    locks: LockGroup,
    core: Arc<VnodeInterceptor<F>>,
    listener: Option<S::Listener>,
}

/// Owns the hook's tiers across start/stop.
pub struct HookStack<F: Filesystem, S: AuthorizationScope<F>> {
    fs: Arc<F>,
    procs: Arc<dyn ProcessTable>,
    scope: Arc<S>,
    params: HookParams,
    running: Option<Running<F, S>>,
}

impl<F: Filesystem, S: AuthorizationScope<F>> HookStack<F, S> {
    /// Creates a stopped stack.
    #[must_use]
    pub const fn new(
        fs: Arc<F>,
        procs: Arc<dyn ProcessTable>,
        scope: Arc<S>,
        params: HookParams,
    ) -> Self {
        Self {
            fs,
            procs,
            scope,
            params,
            running: None,
        }
    }

    /// True while the listener is installed.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The running interceptor, for routing provider registrations and
    /// responses.
    #[must_use]
    pub fn interceptor(&self) -> Option<Arc<VnodeInterceptor<F>>> {
        self.running.as_ref().map(|running| Arc::clone(&running.core))
    }

    /// Brings the hook up.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::AlreadyInitialized`] on a running stack, or
    /// the failing tier's error after the built tiers are unwound.
    pub fn start(&mut self) -> Result<(), HookError> {
        if self.running.is_some() {
            return Err(HookError::AlreadyInitialized);
        }

        let locks = LockGroup::new(LOCK_GROUP_NAME);
        let core = Arc::new(VnodeInterceptor::new(
            Arc::clone(&self.fs),
            Arc::clone(&self.procs),
            self.params.clone(),
            &locks,
        ));

        let listener = match self.scope.listen(Arc::clone(&core)) {
            Ok(listener) => listener,
            Err(errno) => {
                error!(%errno, "authorization scope registration failed; unwinding");
                core.shutdown();
                drop(core);
                let _ = locks.shutdown();
                return Err(HookError::Scope { errno });
            }
        };

        self.running = Some(Running {
            locks,
            core,
            listener: Some(listener),
        });
        info!("projection hook started");
        Ok(())
    }

    /// Takes the hook down.
    ///
    /// Tiers are dismantled in reverse start order. A failing tier does
    /// not short-circuit the ones after it; the first failure is
    /// reported once everything has been attempted.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::NotInitialized`] on a stopped stack, a
    /// scope error if the listener could not be removed, or
    /// [`HookError::LockGroupBusy`] when mutexes are still allocated
    /// after teardown (an interceptor thread is still parked inside).
    pub fn stop(&mut self) -> Result<(), HookError> {
        let Some(mut running) = self.running.take() else {
            return Err(HookError::NotInitialized);
        };

        let mut worst: Result<(), HookError> = Ok(());

        if let Some(listener) = running.listener.take() {
            if let Err(errno) = self.scope.unlisten(listener) {
                error!(%errno, "scope listener removal failed");
                worst = Err(HookError::Scope { errno });
            }
        }

        running.core.shutdown();
        drop(running.core);

        let live = running.locks.shutdown();
        if live != 0 && worst.is_ok() {
            worst = Err(HookError::LockGroupBusy { live });
        }

        info!("projection hook stopped");
        worst
    }
}
