use byteorder::{ReadBytesExt, LE};
use std::io::{Cursor, Read};

use crate::error::{self, Corruption, Error};

fn at(cursor: &Cursor<&[u8]>) -> usize {
    cursor.position() as usize
}

/// This is how LZ4 encodes varints.
/// Just keep reading and adding while it's all F
fn read_lsic(initial: u8, cursor: &mut Cursor<&[u8]>) -> Result<usize, Error> {
    let mut value = initial as usize;
    if value == 0xF {
        loop {
            let more = cursor.read_u8().map_err(|_| Error::corrupt(at(cursor), Corruption::Truncated))?;
            value = value.saturating_add(more as usize);
            if more != 0xff {
                break;
            }
        }
    }
    Ok(value)
}

/// Decompress an LZ4-compressed block, appending at most `capacity` bytes to `output`.
///
/// Note that LZ4 heavily relies on a lookback mechanism where bytes earlier in the output stream are referenced.
/// You may either pre-initialize the output buffer with this data or pass it separately in `prefix`.
/// In particular, an LZ4 "dictionary" should (probably) be implemented as a `prefix` because you obviously
/// don't want the dictionary to appear at the beginning of the output.
/// Matches may reach back to the start of `prefix` but no further.
///
/// Every length field is checked against both the remaining input and the remaining capacity before
/// anything is copied. Errors report the input offset at which the problem was detected; bytes appended
/// to `output` before the error are not removed.
///
/// This function is based around memory buffers because that's what LZ4 intends.
/// If your blocks don't fit in your memory, you should use smaller blocks.
pub fn decompress_block(input: &[u8], prefix: &[u8], output: &mut Vec<u8>, capacity: usize) -> Result<(), Error> {
    if input.is_empty() {
        return Err(Error::corrupt(0, Corruption::Truncated));
    }

    let limit = output.len().saturating_add(capacity);
    let mut reader = Cursor::new(input);
    loop {
        let token = reader.read_u8().map_err(|_| Error::corrupt(at(&reader), Corruption::Truncated))?;

        // read literals
        let literal_length = read_lsic(token >> 4, &mut reader)?;
        let literal_start = at(&reader);
        if literal_length > input.len() - literal_start {
            return Err(Error::corrupt(literal_start, Corruption::LiteralOverrun));
        }
        if literal_length > limit - output.len() {
            return Err(Error::corrupt(literal_start, Corruption::OutputOverrun));
        }
        error::reserve(output, literal_length)?;
        let output_pos_pre_literal = output.len();
        output.resize(output_pos_pre_literal + literal_length, 0);
        reader.read_exact(&mut output[output_pos_pre_literal..])
            .map_err(|_| Error::corrupt(literal_start, Corruption::LiteralOverrun))?;

        // the last sequence has no match
        if at(&reader) == input.len() {
            break;
        }

        // read duplicates
        let offset_pos = at(&reader);
        let offset = reader.read_u16::<LE>()
            .map_err(|_| Error::corrupt(offset_pos, Corruption::Truncated))? as usize;
        let match_len = read_lsic(token & 0xf, &mut reader)?.saturating_add(4);
        if match_len > limit - output.len() {
            return Err(Error::corrupt(offset_pos, Corruption::OutputOverrun));
        }
        error::reserve(output, match_len)?;
        copy_overlapping(offset, match_len, prefix, output).map_err(|reason| Error::corrupt(offset_pos, reason))?;
    }
    Ok(())
}

/// Copy `match_len` bytes starting `offset` bytes before the end of `output` onto its end.
///
/// The source and destination overlap whenever `offset < match_len`; such matches repeat the last `offset`
/// bytes and must be copied front to back.
fn copy_overlapping(
    offset: usize,
    match_len: usize,
    prefix: &[u8],
    output: &mut Vec<u8>,
) -> Result<(), Corruption> {
    let old_len = output.len();
    match offset {
        0 => return Err(Corruption::ZeroOffset),
        i if i > old_len => {
            // need prefix for this
            let prefix_needed = i - old_len;
            if prefix_needed > prefix.len() {
                return Err(Corruption::OffsetOutOfWindow);
            }
            let how_many_bytes_from_prefix = std::cmp::min(prefix_needed, match_len);
            output.extend_from_slice(
                &prefix[prefix.len() - prefix_needed..][..how_many_bytes_from_prefix],
            );
            let remaining_len = match_len - how_many_bytes_from_prefix;
            if remaining_len != 0 {
                // offset stays the same because our cursor moved forward by the amount of bytes we took from prefix
                return copy_overlapping(offset, remaining_len, &[], output);
            }
        }

        // fastpath: memset if we repeat the same byte forever
        1 => output.resize(old_len + match_len, output[old_len - 1]),

        o if match_len <= o => {
            // fastpath: nonoverlapping
            // for borrowck reasons we have to extend with zeroes first and then memcpy
            // instead of simply using extend_from_slice
            output.resize(old_len + match_len, 0);
            let (head, tail) = output.split_at_mut(old_len);
            tail.copy_from_slice(&head[old_len - offset..][..match_len]);
        }
        2 | 4 | 8 => {
            // fastpath: overlapping but small

            // speedup: build 16 byte buffer so we can handle 16 bytes each iteration instead of one
            let mut buf = [0u8; 16];
            for chunk in buf.chunks_mut(offset) {
                // offset divides 16, so every chunk is exactly one period
                chunk.copy_from_slice(&output[old_len - offset..][..offset]);
            }
            // fill with zero bytes
            output.resize(old_len + match_len, 0);
            // copy buf as often as possible
            for target in output[old_len..].chunks_mut(buf.len()) {
                target.copy_from_slice(&buf[..target.len()]);
            }
        }
        _ => {
            // slowest path: copy single bytes
            for i in 0..match_len {
                let b = output[old_len - offset + i];
                output.push(b);
            }
        }
    }
    Ok(())
}

/// Decompress a block that is known to expand to at most `capacity` bytes.
pub fn decompress(input: &[u8], capacity: usize) -> Result<Vec<u8>, Error> {
    decompress_with_dict(input, &[], capacity)
}

/// Decompress a block that was compressed with `dict` as history.
pub fn decompress_with_dict(input: &[u8], dict: &[u8], capacity: usize) -> Result<Vec<u8>, Error> {
    let mut vec = Vec::new();
    decompress_block(input, dict, &mut vec, capacity)?;
    Ok(vec)
}

/// Decompress a block into a pre-sized buffer, returning the number of bytes written.
pub fn decompress_into(input: &[u8], output: &mut [u8]) -> Result<usize, Error> {
    let decoded = decompress(input, output.len())?;
    output[..decoded.len()].copy_from_slice(&decoded);
    Ok(decoded.len())
}
