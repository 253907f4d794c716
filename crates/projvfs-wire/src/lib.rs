//! Shared constants and message layout for the projvfs hook.
//!
//! This crate is the contract between the kernel-resident hook core and
//! user-space providers. It carries the per-file attribute flag bits the
//! hook inspects, the kinds and fixed header layout of kernel→user
//! messages, and the codec for the user→kernel response prefix.
//!
//! Nothing here performs I/O; both sides serialize into and parse out of
//! contiguous byte buffers.

mod flags;
mod message;

pub use flags::FileFlags;
pub use message::{
    KernelMessage, MessageKind, ProviderResponse, WireError, HEADER_LEN, MAX_PATH_BYTES,
    PROCNAME_LEN, RESPONSE_LEN,
};
