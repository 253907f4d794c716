//! Kernel↔user message layout.
//!
//! A kernel→user message is one contiguous buffer: a fixed-size header
//! followed by `path_len` bytes of path, relative to the virtualization
//! root, with no terminator and no leading separator. The user→kernel
//! response carries only the first twelve header bytes (request id and
//! kind).
//!
//! All integers are little-endian. The layout is frozen; both sides are
//! built against the same constants in this module.
//!
//! # Layout
//!
//! ```text
//! offset  size  field
//!      0     8  request id (u64)
//!      8     4  kind (u32)
//!     12     4  originator pid (u32)
//!     16    32  originator procname, NUL-terminated, NUL-padded
//!     48     4  path byte count (u32)
//!     52     n  relative path bytes
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the fixed message header in bytes.
pub const HEADER_LEN: usize = 52;

/// Size of a user→kernel response in bytes (request id + kind).
pub const RESPONSE_LEN: usize = 12;

/// Capacity of the fixed procname field, including the NUL terminator.
pub const PROCNAME_LEN: usize = 32;

/// Upper bound on the relative-path suffix, matching the filesystem's
/// maximum path length.
pub const MAX_PATH_BYTES: usize = 1024;

/// Discriminants carried in the header's `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    /// Kernel→user: materialize a placeholder directory's children.
    EnumerateDirectory = 1,
    /// Kernel→user: materialize a placeholder file's bytes.
    HydrateFile = 2,
    /// User→kernel: the requested materialization completed.
    ResponseSuccess = 3,
    /// User→kernel: the requested materialization failed.
    ResponseFailure = 4,
}

impl MessageKind {
    /// Parses a wire discriminant.
    #[must_use]
    pub const fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::EnumerateDirectory),
            2 => Some(Self::HydrateFile),
            3 => Some(Self::ResponseSuccess),
            4 => Some(Self::ResponseFailure),
            _ => None,
        }
    }

    /// Returns the wire discriminant.
    #[must_use]
    pub const fn wire(self) -> u32 {
        self as u32
    }

    /// True for the user→kernel response kinds.
    #[must_use]
    pub const fn is_response(self) -> bool {
        matches!(self, Self::ResponseSuccess | Self::ResponseFailure)
    }
}

/// Errors from encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// Buffer is shorter than the structure it claims to hold.
    #[error("buffer truncated: need {needed} bytes, have {actual}")]
    Truncated {
        /// Bytes required by the layout.
        needed: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The `kind` field holds an unknown discriminant.
    #[error("unknown message kind {raw}")]
    UnknownKind {
        /// The raw discriminant observed.
        raw: u32,
    },

    /// The path suffix exceeds [`MAX_PATH_BYTES`].
    #[error("path of {len} bytes exceeds the {max}-byte bound")]
    PathTooLong {
        /// Declared or supplied path length.
        len: usize,
        /// The bound that was exceeded.
        max: usize,
    },

    /// The buffer length disagrees with the header's path byte count.
    #[error("declared path of {declared} bytes but {actual} bytes follow the header")]
    LengthMismatch {
        /// Path bytes the header declares.
        declared: usize,
        /// Path bytes actually present.
        actual: usize,
    },

    /// The path suffix is not valid UTF-8.
    #[error("path suffix is not valid UTF-8")]
    InvalidPath(#[from] std::str::Utf8Error),
}

/// A kernel→user materialization request.
///
/// `procname` longer than the fixed field truncates on encode; the path is
/// bounded by [`MAX_PATH_BYTES`] and rejected rather than truncated, since
/// a clipped path would silently target the wrong file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelMessage {
    /// Monotonically assigned request id; zero is reserved.
    pub request_id: u64,
    /// What the provider is being asked to do.
    pub kind: MessageKind,
    /// Pid of the process whose access triggered the request.
    pub pid: u32,
    /// Name of that process.
    pub procname: String,
    /// Path relative to the virtualization root, no leading separator.
    pub relative_path: String,
}

impl KernelMessage {
    /// Builds a request, taking the originator fields as borrowed strings.
    #[must_use]
    pub fn new(
        request_id: u64,
        kind: MessageKind,
        pid: u32,
        procname: &str,
        relative_path: &str,
    ) -> Self {
        Self {
            request_id,
            kind,
            pid,
            procname: procname.to_owned(),
            relative_path: relative_path.to_owned(),
        }
    }

    /// Total encoded size: header plus path suffix.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.relative_path.len()
    }

    /// Serializes header-then-path into a single contiguous buffer.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::PathTooLong`] if the relative path exceeds
    /// [`MAX_PATH_BYTES`].
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let path = self.relative_path.as_bytes();
        if path.len() > MAX_PATH_BYTES {
            return Err(WireError::PathTooLong {
                len: path.len(),
                max: MAX_PATH_BYTES,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + path.len());
        buf.put_u64_le(self.request_id);
        buf.put_u32_le(self.kind.wire());
        buf.put_u32_le(self.pid);

        // Fixed procname field: copy what fits, keep the final NUL.
        let name = self.procname.as_bytes();
        let copied = name.len().min(PROCNAME_LEN - 1);
        buf.put_slice(&name[..copied]);
        buf.put_bytes(0, PROCNAME_LEN - copied);

        #[allow(clippy::cast_possible_truncation)] // Bounded by MAX_PATH_BYTES above.
        buf.put_u32_le(path.len() as u32);
        buf.put_slice(path);
        Ok(buf.freeze())
    }

    /// Parses a buffer produced by [`KernelMessage::encode`].
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if the buffer is truncated, the kind is
    /// unknown, the declared path length is out of bounds or disagrees
    /// with the buffer, or the path is not UTF-8.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                actual: buf.len(),
            });
        }

        let mut header = &buf[..HEADER_LEN];
        let request_id = header.get_u64_le();
        let raw_kind = header.get_u32_le();
        let kind = MessageKind::from_wire(raw_kind).ok_or(WireError::UnknownKind { raw: raw_kind })?;
        let pid = header.get_u32_le();

        let name_field = &header[..PROCNAME_LEN];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PROCNAME_LEN);
        let procname = String::from_utf8_lossy(&name_field[..name_len]).into_owned();
        header.advance(PROCNAME_LEN);

        let declared = header.get_u32_le() as usize;
        if declared > MAX_PATH_BYTES {
            return Err(WireError::PathTooLong {
                len: declared,
                max: MAX_PATH_BYTES,
            });
        }
        let suffix = &buf[HEADER_LEN..];
        if suffix.len() != declared {
            return Err(WireError::LengthMismatch {
                declared,
                actual: suffix.len(),
            });
        }
        let relative_path = std::str::from_utf8(suffix)?.to_owned();

        Ok(Self {
            request_id,
            kind,
            pid,
            procname,
            relative_path,
        })
    }
}

/// The user→kernel response prefix: request id plus response kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderResponse {
    /// Id of the request being answered.
    pub request_id: u64,
    /// Response kind; the kernel ignores anything that is not a response.
    pub kind: MessageKind,
}

impl ProviderResponse {
    /// Serializes the twelve-byte response prefix.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_LEN);
        buf.put_u64_le(self.request_id);
        buf.put_u32_le(self.kind.wire());
        buf.freeze()
    }

    /// Parses a response prefix.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if fewer than [`RESPONSE_LEN`] bytes are
    /// present or the kind discriminant is unknown.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < RESPONSE_LEN {
            return Err(WireError::Truncated {
                needed: RESPONSE_LEN,
                actual: buf.len(),
            });
        }
        let mut cursor = buf;
        let request_id = cursor.get_u64_le();
        let raw_kind = cursor.get_u32_le();
        let kind = MessageKind::from_wire(raw_kind).ok_or(WireError::UnknownKind { raw: raw_kind })?;
        Ok(Self { request_id, kind })
    }
}
