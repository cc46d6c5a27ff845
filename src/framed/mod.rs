//! The LZ4 frame format: a self-describing container around a sequence of blocks.
//!
//! A frame is a header (magic number, flags, block size, optional content size and dictionary id,
//! header checksum), any number of blocks, an end marker and an optional checksum over the
//! uncompressed content. Every block is prefixed with its length; blocks that would not shrink are
//! stored verbatim and flagged with the high bit of that length.
//!
//! Frames can be concatenated. Skippable frames carry opaque user data which decoders pass over.

mod compress;
mod decompress;
mod header;

/// The four magic bytes at the start of every LZ4 frame.
const MAGIC: u32 = 0x184D2204;
/// Skippable frames use the 16 magic numbers starting here.
const SKIPPABLE_MAGIC_MIN: u32 = 0x184D2A50;
const SKIPPABLE_MAGIC_MASK: u32 = 0xFFFF_FFF0;
/// The frame format sets the high bit of every length field to indicate that the data was not compressed.
const INCOMPRESSIBLE: u32 = 1 << 31;

pub use compress::*;
pub use decompress::*;
pub use header::{BlockSize, FrameInfo, FrameType, MAX_HEADER_SIZE};
