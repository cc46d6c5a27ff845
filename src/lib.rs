//! A pure Rust implementation of LZ4.
//!
//! * [`raw`]: the block format, with the regular, accelerated and high-compression compressors,
//!   dictionaries and the size-prepended container.
//! * [`stream`]: sequences of blocks that reference each other's history.
//! * [`framed`]: the self-describing frame format, with checksums and incompressible-block fallback.
//!   This is what the `lz4` command line tool reads and writes.
//!
//! ```
//! use lz4_codec::framed::{compress_frame, decompress_frame, CompressionSettings};
//!
//! let data = b"An example of data that compresses well, data that compresses well.";
//! let frame = compress_frame(data, &CompressionSettings::default()).unwrap();
//! assert_eq!(decompress_frame(&frame).unwrap(), &data[..]);
//! ```
//!
//! Nothing here blocks or spawns threads. Contexts are plain owned values: use separate ones per thread,
//! or put a shared one behind a lock.
#![forbid(unsafe_code)]

pub mod checksum;
mod error;
pub mod framed;
pub mod raw;
pub mod stream;

pub use error::{Corruption, Error};
pub use raw::{compress_bound, Mode};
