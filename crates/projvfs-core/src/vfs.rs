//! Seams to the surrounding kernel.
//!
//! The core never talks to a real filesystem, process table, transport,
//! or authorization scope directly; it goes through the traits in this
//! module. The embedder (module glue, out of scope here) provides the
//! real bindings, and the test suite provides deterministic mocks.
//!
//! # Handle discipline
//!
//! A [`Filesystem::Vnode`] is a use-counted handle: cloning it takes a
//! use-count, dropping it releases one. The core holds exactly one live
//! handle per walk step and one per occupied registry slot, so each
//! acquired count is released exactly once by construction.

use std::sync::Arc;

use bitflags::bitflags;
use nix::errno::Errno;
use nix::unistd::Pid;
use projvfs_wire::FileFlags;

use crate::interceptor::VnodeInterceptor;

bitflags! {
    /// Action bits of a vnode authorization request.
    ///
    /// Directory and file interpretations share bit positions the way
    /// the kernel's vnode scope defines them; the aliases carry the
    /// reading that applies to each vnode type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VnodeAction: u32 {
        /// Read file data.
        const READ_DATA = 1 << 1;
        /// List directory entries (same bit as `READ_DATA`).
        const LIST_DIRECTORY = 1 << 1;
        /// Write file data.
        const WRITE_DATA = 1 << 2;
        /// Add a directory entry (same bit as `WRITE_DATA`).
        const ADD_FILE = 1 << 2;
        /// Execute a file.
        const EXECUTE = 1 << 3;
        /// Traverse a directory (same bit as `EXECUTE`).
        const SEARCH = 1 << 3;
        /// Delete the vnode.
        const DELETE = 1 << 4;
        /// Read basic attributes.
        const READ_ATTRIBUTES = 1 << 5;
        /// Write basic attributes.
        const WRITE_ATTRIBUTES = 1 << 6;
        /// Read extended attributes.
        const READ_EXTATTRIBUTES = 1 << 7;
        /// Write extended attributes.
        const WRITE_EXTATTRIBUTES = 1 << 8;
        /// Read the security descriptor.
        const READ_SECURITY = 1 << 9;
    }
}

/// Verdict the interceptor hands back to the authorization scope.
///
/// There is no unconditional allow: the hook either has no opinion or
/// fails the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVerdict {
    /// No opinion; other listeners and the default policy decide.
    Defer,
    /// Fail the operation, optionally steering the error code reported
    /// to the accessor.
    Deny {
        /// Value for the scope's out-error pointer, if steered.
        errno: Option<Errno>,
    },
}

impl AuthVerdict {
    /// Deny without steering the error code.
    pub const DENY: Self = Self::Deny { errno: None };

    /// Deny with an explicit error code.
    #[must_use]
    pub const fn deny_with(errno: Errno) -> Self {
        Self::Deny { errno: Some(errno) }
    }

    /// True for the defer verdict.
    #[must_use]
    pub const fn is_defer(self) -> bool {
        matches!(self, Self::Defer)
    }
}

/// Arguments of one intercepted vnode operation, extracted from the
/// scope callback's credential, action bitmask, and ancillary arguments.
pub struct VnodeOperation<'a, V> {
    /// The vnode being accessed.
    pub vnode: &'a V,
    /// Its parent, when the scope supplies one. The core does not
    /// currently consult it.
    pub parent: Option<&'a V>,
    /// Requested action bits.
    pub action: VnodeAction,
    /// Pid of the calling process.
    pub pid: Pid,
}

/// Vnode access as the core needs it.
pub trait Filesystem: Send + Sync + 'static {
    /// Use-counted vnode handle. Equality is vnode identity.
    type Vnode: Clone + PartialEq + Send + Sync + 'static;

    /// Resolves an absolute path to a vnode handle.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error for a path that does not resolve.
    fn lookup(&self, path: &str) -> Result<Self::Vnode, Errno>;

    /// Fetches the parent vnode, if any. May sleep on filesystem I/O.
    fn parent(&self, vnode: &Self::Vnode) -> Option<Self::Vnode>;

    /// True if the vnode is a directory.
    fn is_directory(&self, vnode: &Self::Vnode) -> bool;

    /// True if the vnode is the root of its mount.
    fn is_mount_root(&self, vnode: &Self::Vnode) -> bool;

    /// Reads the vnode's attribute flag word.
    ///
    /// # Errors
    ///
    /// Returns an error when the filesystem does not expose the flag
    /// attribute; the interceptor treats such vnodes as uninteresting.
    fn attribute_flags(&self, vnode: &Self::Vnode) -> Result<FileFlags, Errno>;

    /// Resolves a vnode back to its absolute path.
    ///
    /// # Errors
    ///
    /// Returns an error when the name cache cannot reconstruct a path.
    fn vnode_path(&self, vnode: &Self::Vnode) -> Result<String, Errno>;
}

/// Pid-to-name resolution.
pub trait ProcessTable: Send + Sync + 'static {
    /// The short name of the process, if it is still alive.
    fn name_of(&self, pid: Pid) -> Option<String>;
}

/// The user-space client channel of one provider.
///
/// Shared ownership: the registry holds one strong reference while the
/// slot is occupied, the client's own machinery holds the rest.
pub trait ProviderClient: Send + Sync + 'static {
    /// Hands one serialized message to the transport. May block
    /// indefinitely; never called while a core mutex is held.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    fn send(&self, message: &[u8]) -> Result<(), Errno>;
}

/// The vnode authorization scope the interceptor registers against.
pub trait AuthorizationScope<F: Filesystem>: Send + Sync + 'static {
    /// Token representing an active listener registration.
    type Listener;

    /// Registers the interceptor for every vnode operation in scope.
    ///
    /// # Errors
    ///
    /// Returns the scope's error when the listener cannot be installed.
    fn listen(&self, interceptor: Arc<VnodeInterceptor<F>>) -> Result<Self::Listener, Errno>;

    /// Removes a previously installed listener.
    ///
    /// # Errors
    ///
    /// Returns the scope's error when removal fails.
    fn unlisten(&self, listener: Self::Listener) -> Result<(), Errno>;
}
