//! Per-file attribute flag bits.
//!
//! The hook reads these out of the filesystem's per-file flag word. The
//! bits are written by providers (through the user-space library) and by
//! nothing else; the kernel core only ever reads them.

use bitflags::bitflags;

bitflags! {
    /// Attribute bits consulted on every intercepted vnode access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileFlags: u32 {
        /// The file or directory lies somewhere beneath a virtualization
        /// root. Clear on the overwhelming majority of files system-wide;
        /// the interceptor's fast path keys off this bit alone.
        const IN_VIRTUALIZATION_ROOT = 1 << 3;

        /// The file or directory is a placeholder: its metadata exists but
        /// its content (bytes or children) has not been materialized.
        const IS_EMPTY = 1 << 4;
    }
}

impl FileFlags {
    /// True if the vnode is an unmaterialized placeholder.
    #[must_use]
    pub const fn is_placeholder(self) -> bool {
        self.contains(Self::IS_EMPTY)
    }

    /// True if the vnode is under some virtualization root.
    #[must_use]
    pub const fn in_virtualization_root(self) -> bool {
        self.contains(Self::IN_VIRTUALIZATION_ROOT)
    }
}
