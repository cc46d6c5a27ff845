//! The raw LZ4 block format.
//!
//! Using this directly saves you the overhead of framing (~11 bytes) but you lose several features,
//! most notably the fallback mechanism for incompressible data: if the compressed version of a block
//! would be larger, the frame encodes the uncompressed version instead. This guarantees that the compression ratio will
//! never be negative. The break-even point where framing is always smaller is around 2.5KB for totally
//! incompressible data. Conversely, for payloads below 2.5KB framing always adds a bit of overhead
//! (but also gets you lots of nice features).
//!
//! A block is a sequence of *sequences*. Each starts with a token byte whose high nibble is the literal
//! length and whose low nibble is the match length minus four. A nibble of 15 means more length bytes follow
//! ("linear small integer code": keep adding bytes while they are 255). The literals come next, then a
//! little-endian `u16` offset and the extra match length bytes. The last sequence has no match.

mod compress;
mod decompress;
mod legacy;

pub use compress::*;
pub use decompress::*;
pub use legacy::*;

/// Inputs larger than this cannot be represented in a single block.
pub const MAX_INPUT_SIZE: usize = 0x7E00_0000;

/// The LZ4 raw format maintains a lookback window of exactly 64KiB.
pub const WINDOW_SIZE: usize = 64 * 1024;

/// The largest offset a match may encode.
pub const MAX_DISTANCE: usize = WINDOW_SIZE - 1;

pub(crate) const MINMATCH: usize = 4;
/// The last five bytes of a block are always literals.
pub(crate) const LAST_LITERALS: usize = 5;
/// No match may start within the last twelve bytes of a block.
pub(crate) const MFLIMIT: usize = 12;

/// Highest acceleration accepted by [`Mode::Fast`]; larger values are clamped.
pub const ACCELERATION_MAX: u32 = 65537;

/// How a block gets compressed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// The regular hash-table compressor.
    Default,
    /// The regular compressor, but skipping ahead faster when it does not find matches.
    /// An acceleration of 1 is the same as `Default`.
    Fast(u32),
    /// The high-compression compressor at the given level, see [`hc::clamp_level`].
    High(i32),
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Default
    }
}

impl Mode {
    pub(crate) fn acceleration(self) -> usize {
        match self {
            Mode::Fast(a) => a.max(1).min(ACCELERATION_MAX) as usize,
            _ => 1,
        }
    }
}

/// Worst-case compressed size for `input_len` bytes of input.
///
/// Returns `None` if the input is too large to be compressed as a single block.
pub fn compress_bound(input_len: usize) -> Option<usize> {
    if input_len > MAX_INPUT_SIZE {
        None
    } else {
        Some(input_len + input_len / 255 + 16)
    }
}
