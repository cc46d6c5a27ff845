//! The size-prepended block container.
//!
//! Older deployments store a single block behind a 4-byte little-endian uncompressed size and nothing else:
//! no magic, no checksums. It is still the simplest way to ship one block when the receiver needs to know
//! how much memory to allocate.

use byteorder::{ByteOrder, LE};
use std::convert::TryFrom;

use super::{compress_with_dict, decompress_with_dict, Mode};
use crate::error::{Corruption, Error};

const SIZE_HEADER_LEN: usize = 4;

/// Compress `input` as one block, preceded by its uncompressed size.
///
/// An empty input produces just the size header.
pub fn compress_prepend_size(input: &[u8], mode: Mode) -> Result<Vec<u8>, Error> {
    compress_prepend_size_with_dict(input, &[], mode)
}

pub fn compress_prepend_size_with_dict(input: &[u8], dict: &[u8], mode: Mode) -> Result<Vec<u8>, Error> {
    let size = u32::try_from(input.len())
        .map_err(|_| Error::InvalidArgument("input exceeds the maximum block input size"))?;
    let mut header = [0u8; SIZE_HEADER_LEN];
    LE::write_u32(&mut header, size);
    if input.is_empty() {
        return Ok(header.to_vec());
    }

    let block = compress_with_dict(input, dict, mode)?;
    let mut output = Vec::with_capacity(SIZE_HEADER_LEN + block.len());
    output.extend_from_slice(&header);
    output.extend_from_slice(&block);
    Ok(output)
}

/// Decompress the output of [`compress_prepend_size`].
///
/// The block must expand to exactly the size stated in the header.
pub fn decompress_size_prepended(input: &[u8]) -> Result<Vec<u8>, Error> {
    decompress_size_prepended_with_dict(input, &[])
}

pub fn decompress_size_prepended_with_dict(input: &[u8], dict: &[u8]) -> Result<Vec<u8>, Error> {
    if input.len() < SIZE_HEADER_LEN {
        return Err(Error::InvalidArgument("input too short for a size header"));
    }
    let size = LE::read_u32(input);
    if size > i32::MAX as u32 {
        return Err(Error::InvalidArgument("size header exceeds i32::MAX"));
    }
    let size = size as usize;
    if size == 0 {
        return Ok(Vec::new());
    }

    let output = decompress_with_dict(&input[SIZE_HEADER_LEN..], dict, size)
        .map_err(|e| e.shifted(SIZE_HEADER_LEN))?;
    if output.len() != size {
        return Err(Error::corrupt(input.len(), Corruption::ContentSizeMismatch));
    }
    Ok(output)
}
