//! Kernel-resident core of the projvfs projection hook.
//!
//! A user-space provider declares a directory subtree as a
//! virtualization root; files and directories beneath it may exist as
//! placeholders, marked by bits in their per-file attribute flags. When
//! some process touches a placeholder, the hook intercepts the access
//! on the vnode authorization scope, asks the provider to hydrate the
//! file (or enumerate the directory) over the client channel, blocks
//! the calling thread until the provider answers, and then lets the
//! original operation proceed or fails it.
//!
//! # Architecture
//!
//! ```text
//! AuthorizationScope
//!       |
//!       v
//! VnodeInterceptor ---- classify -----------------------> defer/deny
//!       |                                                    ^
//!       +-- ProviderRegistry (root lookup by ancestor walk)  |
//!       +-- OutstandingRequestTable (id-keyed waiters)       |
//!       |        |                                           |
//!       |        +-- blocked thread sleeps  <---- wake ------+
//!       |                                          |
//!       +-- ProviderClient::send --> provider --> response
//! ```
//!
//! The surrounding kernel is reached only through the traits in
//! [`vfs`]; the daemon, the transport binding, and module glue live
//! outside this crate. There is no persisted state: the only on-disk
//! input is the per-file flag word, which the core reads and never
//! writes.
//!
//! # Concurrency
//!
//! Interceptor invocations run concurrently on the accessing threads;
//! responses arrive on whatever thread the transport delivers them.
//! The registry and the outstanding table have separate mutexes, and
//! nothing that can sleep runs under either one.

pub mod config;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod locks;
pub mod outstanding;
pub mod registry;
pub mod vfs;

pub use projvfs_wire as wire;

pub use config::HookParams;
pub use error::HookError;
pub use interceptor::VnodeInterceptor;
pub use lifecycle::HookStack;
pub use locks::{GroupMutex, LockGroup};
pub use outstanding::{OutstandingRequestTable, ResponseStatus};
pub use registry::{ProviderHandle, ProviderRegistry, ProviderSnapshot};
pub use vfs::{
    AuthVerdict, AuthorizationScope, Filesystem, ProcessTable, ProviderClient, VnodeAction,
    VnodeOperation,
};
