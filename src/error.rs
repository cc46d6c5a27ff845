//! Errors shared by every layer of the codec.

use std::collections::TryReserveError;
use std::io::{self, ErrorKind};
use thiserror::Error;

/// Why a piece of input was rejected as corrupt.
#[derive(Error, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Corruption {
    /// Expected more bytes, but found none.
    /// Either your input was truncated or you're trying to decompress garbage.
    #[error("unexpected end of input")]
    Truncated,
    #[error("match offset of zero")]
    ZeroOffset,
    /// The offset for a deduplication is out of bounds.
    /// This may be caused by a missing or incomplete dictionary.
    #[error("match offset points before the start of the window")]
    OffsetOutOfWindow,
    #[error("literal run reads past the end of the input")]
    LiteralOverrun,
    #[error("decompressed data exceeds the destination capacity")]
    OutputOverrun,
    #[error("wrong magic number: {0:08x}")]
    WrongMagic(u32),
    #[error("frame version {0} not supported")]
    UnsupportedVersion(u8),
    #[error("reserved bits set")]
    ReservedBitsSet,
    #[error("block size id {0} is reserved")]
    InvalidBlockSize(u8),
    #[error("the header checksum was invalid")]
    HeaderChecksum,
    #[error("a block checksum was invalid")]
    BlockChecksum,
    #[error("the content checksum was invalid")]
    ContentChecksum,
    #[error("a block is larger than the frame's block maximum")]
    BlockTooLarge,
    #[error("decompressed size differs from the declared content size")]
    ContentSizeMismatch,
    #[error("unexpected data after the end of the frame")]
    TrailingData,
}

/// Everything that can go wrong when compressing or decompressing.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("destination too small: {needed} bytes needed, {available} available")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("corrupt input at byte {offset}: {reason}")]
    CorruptInput { offset: usize, reason: Corruption },
    #[error("allocation failed")]
    OutOfMemory,
    #[error("usage error: {0}")]
    UsageError(&'static str),
    #[error("chunk of {len} bytes exceeds the configured block size of {limit} bytes")]
    ChunkTooLarge { len: usize, limit: usize },
    /// The writer handed to a compressor failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn corrupt(offset: usize, reason: Corruption) -> Self {
        Error::CorruptInput { offset, reason }
    }

    /// The corruption reason, if this is a `CorruptInput` error.
    pub fn corruption(&self) -> Option<Corruption> {
        match self {
            Error::CorruptInput { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn is_corruption(&self) -> bool {
        self.corruption().is_some()
    }

    /// Move the reported offset of a `CorruptInput` error by `base` bytes.
    /// Used when a block error bubbles up through a container.
    pub(crate) fn shifted(self, base: usize) -> Self {
        match self {
            Error::CorruptInput { offset, reason } => Error::CorruptInput { offset: base + offset, reason },
            other => other,
        }
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        let kind = match e {
            Error::Io(inner) => return inner,
            Error::CorruptInput { .. } => ErrorKind::InvalidData,
            Error::InvalidArgument(_) | Error::ChunkTooLarge { .. } => ErrorKind::InvalidInput,
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            _ => ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// Grow `buf` by `additional` bytes without aborting on allocation failure.
pub(crate) fn reserve(buf: &mut Vec<u8>, additional: usize) -> Result<(), Error> {
    buf.try_reserve(additional)?;
    Ok(())
}
