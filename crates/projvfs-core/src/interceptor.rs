//! Vnode-access interceptor.
//!
//! Registered on the vnode authorization scope and invoked for every
//! vnode operation system-wide, so the common case of a vnode outside
//! any virtualization root must get out after a single attribute
//! read.
//!
//! For a placeholder inside a root, the interceptor classifies the
//! access, builds a materialization request, parks the calling thread
//! on the outstanding-request table, and maps the provider's response
//! to the final verdict:
//!
//! ```text
//! vnode access
//!     |
//!     +-- attribute flags: not in a root? ------------> defer
//!     +-- placeholder + crawler procname? ------------> deny
//!     +-- no enclosing provider? --------------------> defer
//!     +-- caller is the provider itself? ------------> defer
//!     +-- action needs no materialization? ----------> defer
//!     |
//!     +-- enqueue record --> send to provider --> sleep
//!                                                  |
//!               response success ----------------> defer
//!               response failure ----------------> deny (EAGAIN)
//! ```
//!
//! Internal faults on this path (unreadable attributes, a vanished
//! path, a dead channel) defer: a broken provider must not make the
//! filesystem unusable for unrelated accesses.

use std::sync::Arc;

use nix::errno::Errno;
use nix::unistd::Pid;
use projvfs_wire::{KernelMessage, MessageKind};
use tracing::{debug, error, warn};

use crate::config::HookParams;
use crate::error::HookError;
use crate::locks::LockGroup;
use crate::outstanding::{OutstandingRequestTable, RequestHeader, ResponseStatus};
use crate::registry::{ProviderHandle, ProviderRegistry, ProviderSnapshot};
use crate::vfs::{
    AuthVerdict, Filesystem, ProcessTable, ProviderClient, VnodeAction, VnodeOperation,
};

/// Directory actions that require enumeration of a placeholder first.
const DIRECTORY_MATERIALIZE_ACTIONS: VnodeAction = VnodeAction::LIST_DIRECTORY
    .union(VnodeAction::SEARCH)
    .union(VnodeAction::READ_SECURITY)
    .union(VnodeAction::READ_ATTRIBUTES)
    .union(VnodeAction::READ_EXTATTRIBUTES);

/// File actions that require hydration of a placeholder first.
const FILE_MATERIALIZE_ACTIONS: VnodeAction = VnodeAction::READ_ATTRIBUTES
    .union(VnodeAction::WRITE_ATTRIBUTES)
    .union(VnodeAction::READ_EXTATTRIBUTES)
    .union(VnodeAction::WRITE_EXTATTRIBUTES)
    .union(VnodeAction::READ_DATA)
    .union(VnodeAction::WRITE_DATA)
    .union(VnodeAction::EXECUTE);

/// The interceptor aggregate: registry, outstanding table, and the
/// parameters they share. One instance per loaded hook; the lifecycle
/// passes it to scope registration instead of keeping globals.
pub struct VnodeInterceptor<F: Filesystem> {
    fs: Arc<F>,
    procs: Arc<dyn ProcessTable>,
    params: HookParams,
    registry: ProviderRegistry<F>,
    outstanding: OutstandingRequestTable,
}

impl<F: Filesystem> VnodeInterceptor<F> {
    /// Builds the aggregate, allocating both core mutexes from `locks`.
    #[must_use]
    pub fn new(
        fs: Arc<F>,
        procs: Arc<dyn ProcessTable>,
        params: HookParams,
        locks: &LockGroup,
    ) -> Self {
        let registry = ProviderRegistry::new(
            Arc::clone(&fs),
            locks,
            params.provider_capacity,
            params.max_path_bytes,
        );
        let outstanding = OutstandingRequestTable::new(locks);
        Self {
            fs,
            procs,
            params,
            registry,
            outstanding,
        }
    }

    /// The active parameters.
    #[must_use]
    pub const fn params(&self) -> &HookParams {
        &self.params
    }

    /// Number of requests currently blocked on providers.
    #[must_use]
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of occupied provider slots.
    #[must_use]
    pub fn active_providers(&self) -> usize {
        self.registry.occupied()
    }

    // =========================================================================
    // Provider-facing entry points (driven by the user-client glue)
    // =========================================================================

    /// Claims a registry slot for a connecting provider client.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::RegistryFull`] when the table is saturated.
    pub fn register_provider(
        &self,
        client: Arc<dyn ProviderClient>,
        pid: Pid,
    ) -> Result<ProviderHandle, HookError> {
        self.registry.register_client(client, pid)
    }

    /// Registers the provider's virtualization root.
    ///
    /// # Errors
    ///
    /// See [`ProviderRegistry::register_root`].
    pub fn register_root(
        &self,
        handle: ProviderHandle,
        root_path: &str,
    ) -> Result<(), HookError> {
        self.registry.register_root(handle, root_path)
    }

    /// Disconnects a provider and completes every request still routed
    /// to it with a synthetic failure, so no thread stays parked on a
    /// channel that will never answer.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::StaleHandle`] if the slot was already
    /// recycled.
    pub fn disconnect_provider(&self, handle: ProviderHandle) -> Result<(), HookError> {
        self.registry.disconnect(handle)?;
        let failed = self.outstanding.fail_all_routed_to(handle);
        if failed > 0 {
            warn!(
                count = failed,
                "disconnect completed outstanding requests with failure"
            );
        }
        Ok(())
    }

    /// Routes an asynchronous provider response to the blocked request
    /// it answers. Kinds other than success/failure are silently
    /// ignored, as are ids with no outstanding record.
    pub fn handle_provider_response(&self, request_id: u64, kind: MessageKind) {
        if self.outstanding.deliver(request_id, kind) {
            debug!(request_id, ?kind, "provider response delivered");
        }
    }

    /// Disconnects every remaining provider; used at module stop.
    pub fn shutdown(&self) {
        for handle in self.registry.occupied_handles() {
            if let Err(err) = self.disconnect_provider(handle) {
                // A racing disconnect got there first; nothing to undo.
                debug!(error = %err, "provider already gone during shutdown");
            }
        }
    }

    // =========================================================================
    // Authorization callback
    // =========================================================================

    /// Classifies one vnode operation and returns the hook's verdict.
    ///
    /// Runs on the calling process's thread and blocks it for the
    /// duration of any materialization round trip.
    pub fn authorize(&self, op: &VnodeOperation<'_, F::Vnode>) -> AuthVerdict {
        let flags = match self.fs.attribute_flags(op.vnode) {
            Ok(flags) => flags,
            Err(errno) => {
                // Not every filesystem exposes the flag word; treat the
                // vnode as uninteresting rather than failing the access.
                debug!(%errno, "attribute read failed");
                return AuthVerdict::Defer;
            }
        };
        if !flags.in_virtualization_root() {
            // Cheap exit keeps I/O outside virtualization roots at full
            // speed; nothing below may run before this test.
            return AuthVerdict::Defer;
        }

        let procname = self.procs.name_of(op.pid).unwrap_or_default();

        if flags.is_placeholder() && self.params.is_crawler(&procname) {
            // Crawlers must be denied, not deferred: an allowed result
            // would be cached by the authorization layer, the access
            // would bypass hydration, and the file would read as empty
            // from then on.
            debug!(
                pid = op.pid.as_raw(),
                procname = %procname,
                "crawler denied against placeholder"
            );
            return AuthVerdict::DENY;
        }

        let Some(provider) = self.registry.find(op.vnode) else {
            // In a root but nobody home to hydrate it.
            return AuthVerdict::Defer;
        };

        if op.pid == provider.pid {
            // The provider reading its own tree must never wait on
            // itself.
            return AuthVerdict::Defer;
        }

        if !flags.is_placeholder() {
            return AuthVerdict::Defer;
        }

        let kind = if self.fs.is_directory(op.vnode) {
            if !op.action.intersects(DIRECTORY_MATERIALIZE_ACTIONS) {
                return AuthVerdict::Defer;
            }
            MessageKind::EnumerateDirectory
        } else {
            if !op.action.intersects(FILE_MATERIALIZE_ACTIONS) {
                return AuthVerdict::Defer;
            }
            MessageKind::HydrateFile
        };

        self.request_materialization(&provider, kind, op, &procname)
    }

    /// Builds the request, sends it, and parks the calling thread until
    /// the response (or a disconnect sweep) releases it.
    fn request_materialization(
        &self,
        provider: &ProviderSnapshot,
        kind: MessageKind,
        op: &VnodeOperation<'_, F::Vnode>,
        procname: &str,
    ) -> AuthVerdict {
        let absolute = match self.fs.vnode_path(op.vnode) {
            Ok(path) => path,
            Err(errno) => {
                error!(%errno, "unable to resolve vnode to a path");
                return AuthVerdict::Defer;
            }
        };
        let relative = relative_path(&absolute, &provider.root_path);

        let request_id = self.outstanding.allocate_id();
        let pid = u32::try_from(op.pid.as_raw()).unwrap_or(0);
        let message = KernelMessage::new(request_id, kind, pid, procname, relative);
        let header = RequestHeader {
            request_id,
            kind,
            pid: op.pid,
            procname: procname.to_owned(),
            relative_path: relative.to_owned(),
        };

        // Enqueue strictly before send: a response racing the transport
        // call must already find the record.
        let entry = self.outstanding.enqueue(header, provider.handle);

        if let Err(err) = self.registry.send_message(provider.handle, &message) {
            warn!(request_id, error = %err, "send to provider failed");
            self.outstanding.dequeue(request_id);
            return AuthVerdict::Defer;
        }

        debug!(
            request_id,
            ?kind,
            path = relative,
            pid = op.pid.as_raw(),
            "blocked on provider"
        );
        let status = entry.wait(self.params.response_poll_period);
        self.outstanding.dequeue(request_id);

        match status {
            ResponseStatus::Success => AuthVerdict::Defer,
            ResponseStatus::Failure => AuthVerdict::deny_with(Errno::EAGAIN),
        }
    }
}

/// Strips the root prefix and any leading separator from an absolute
/// path. A path that does not extend the root maps to the empty
/// relative path.
fn relative_path<'a>(absolute: &'a str, root: &str) -> &'a str {
    let relative = absolute.strip_prefix(root).unwrap_or("");
    relative.strip_prefix('/').unwrap_or(relative)
}
