//! Error types surfaced across the core boundary.

use nix::errno::Errno;
use projvfs_wire::WireError;
use thiserror::Error;

/// Errors that can occur in the hook core.
///
/// The interceptor itself never surfaces these to accessors; internal
/// faults on the authorization path degrade to a defer verdict. These
/// errors are returned to the provider-facing entry points and the
/// lifecycle.
#[derive(Debug, Error)]
pub enum HookError {
    /// `start` was called on a stack that is already running.
    #[error("hook is already initialized")]
    AlreadyInitialized,

    /// `stop` was called on a stack that is not running.
    #[error("hook is not initialized")]
    NotInitialized,

    /// Every provider slot is occupied.
    #[error("all {capacity} provider slots are occupied")]
    RegistryFull {
        /// Configured slot capacity.
        capacity: usize,
    },

    /// The virtualization root path does not resolve to a directory.
    #[error("virtualization root '{path}' is not a directory")]
    NotADirectory {
        /// The offending root path.
        path: String,
    },

    /// The provider already has a virtualization root registered, or
    /// the requested root is claimed by another provider.
    #[error("virtualization root already registered")]
    RootBusy,

    /// The filesystem failed to resolve the root path; the underlying
    /// error is propagated verbatim.
    #[error("root path lookup failed: {errno}")]
    Lookup {
        /// Error reported by the filesystem resolver.
        errno: Errno,
    },

    /// The root path exceeds the bounded slot buffer. Rejected rather
    /// than truncated: a clipped root prefix would corrupt every relative
    /// path computed against it.
    #[error("root path of {len} bytes exceeds the {max}-byte bound")]
    PathTooLong {
        /// Supplied path length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The provider handle refers to a slot that has since been
    /// disconnected and recycled.
    #[error("provider handle is stale")]
    StaleHandle,

    /// Channel I/O with the provider failed, including a send attempted
    /// after the slot's client was cleared.
    #[error("provider channel I/O failed: {errno}")]
    Io {
        /// The transport error, or `EIO` for a cleared client.
        errno: Errno,
    },

    /// Registration against the authorization scope failed.
    #[error("authorization scope registration failed: {errno}")]
    Scope {
        /// Error reported by the scope.
        errno: Errno,
    },

    /// Mutexes were still allocated from the lock group at shutdown,
    /// typically because an interceptor thread is still blocked.
    #[error("lock group still has {live} mutexes allocated")]
    LockGroupBusy {
        /// Number of mutexes still alive.
        live: usize,
    },

    /// A message could not be encoded for the wire.
    #[error("message encoding failed: {0}")]
    Wire(#[from] WireError),
}

impl HookError {
    /// Machine-readable code for logging and programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::RegistryFull { .. } => "REGISTRY_FULL",
            Self::NotADirectory { .. } => "NOT_A_DIRECTORY",
            Self::RootBusy => "ROOT_BUSY",
            Self::Lookup { .. } => "LOOKUP_FAILED",
            Self::PathTooLong { .. } => "PATH_TOO_LONG",
            Self::StaleHandle => "STALE_HANDLE",
            Self::Io { .. } => "CHANNEL_IO",
            Self::Scope { .. } => "SCOPE_REGISTRATION",
            Self::LockGroupBusy { .. } => "LOCK_GROUP_BUSY",
            Self::Wire(_) => "WIRE_ENCODING",
        }
    }

    /// The errno equivalent reported at the kernel boundary.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::AlreadyInitialized => Errno::EALREADY,
            Self::NotInitialized => Errno::ENXIO,
            Self::RegistryFull { .. } => Errno::ENOMEM,
            Self::NotADirectory { .. } => Errno::ENOTDIR,
            Self::RootBusy | Self::LockGroupBusy { .. } => Errno::EBUSY,
            Self::Lookup { errno } | Self::Io { errno } | Self::Scope { errno } => *errno,
            Self::PathTooLong { .. } => Errno::ENAMETOOLONG,
            Self::StaleHandle => Errno::ESTALE,
            Self::Wire(_) => Errno::EINVAL,
        }
    }
}
