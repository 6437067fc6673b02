//! Error types for animation decoding.

use thiserror::Error;

/// Broad classification of a [`DecodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The animation blob is malformed. Indicates a content pipeline defect.
    CorruptData,
    /// The caller passed tables or a time that break the decode contract.
    CallerMisuse,
    /// The remote source could not deliver the requested bytes.
    Transfer,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    /// A curve walk hit a block with `total == 0` before reaching the frame
    #[error("animation value stream exhausted at offset {offset:#x} (frame {frame})")]
    StreamExhausted { offset: usize, frame: u32 },

    #[error("malformed animation value block at offset {offset:#x}: valid {valid}, total {total}")]
    MalformedBlock { offset: usize, valid: u8, total: u8 },

    /// The bone record chain does not terminate or is out of order
    #[error("malformed bone record chain at offset {offset:#x}: {reason}")]
    MalformedChain { offset: usize, reason: &'static str },

    #[error("invalid record at offset {offset:#x}: {reason}")]
    InvalidRecord { offset: usize, reason: &'static str },

    #[error("range {offset:#x}+{len} is outside the {size} byte animation blob")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("decoded {what} is not finite")]
    NonFinite { what: &'static str },

    #[error("failed to parse staged record: {0}")]
    Parse(#[from] binrw::Error),

    #[error("cycle {0} is outside [0, 1]")]
    CycleOutOfRange(f32),

    #[error("frame {frame} is outside an animation of {numframes} frames")]
    FrameOutOfRange { frame: u32, numframes: u32 },

    #[error("stall factor {0} must be finite and non-negative")]
    InvalidStall(f32),

    /// A caller-supplied table has fewer entries than the skeleton requires
    #[error("{table} has {len} entries, at least {required} required")]
    TableTooShort { table: &'static str, len: usize, required: usize },

    #[error("{table} maps to bone {index}, but only {count} exist")]
    BoneOutOfRange { table: &'static str, index: usize, count: usize },

    #[error("invalid animation descriptor: {0}")]
    InvalidDescriptor(&'static str),

    /// I/O failure while staging bytes from the remote source
    #[error("transfer of {len} bytes at offset {offset:#x} failed: {source}")]
    Transfer {
        offset: usize,
        len: usize,
        #[source]
        source: std::io::Error,
    },
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StreamExhausted { .. }
            | Self::MalformedBlock { .. }
            | Self::MalformedChain { .. }
            | Self::InvalidRecord { .. }
            | Self::OutOfBounds { .. }
            | Self::NonFinite { .. }
            | Self::Parse(_) => ErrorKind::CorruptData,
            Self::CycleOutOfRange(_)
            | Self::FrameOutOfRange { .. }
            | Self::InvalidStall(_)
            | Self::TableTooShort { .. }
            | Self::BoneOutOfRange { .. }
            | Self::InvalidDescriptor(_) => ErrorKind::CallerMisuse,
            Self::Transfer { .. } => ErrorKind::Transfer,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        self.kind() == ErrorKind::CorruptData
    }

    pub fn is_misuse(&self) -> bool {
        self.kind() == ErrorKind::CallerMisuse
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
