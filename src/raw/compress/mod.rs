//! The compression algorithm.
//!
//! We make use of hash tables to find duplicates. This gives a reasonable compression ratio with a
//! high performance. It has fixed memory usage, which contrary to other approachs, makes it less
//! memory hungry.
//!
//! All compressors write through [`std::io::Write`]. A `Vec<u8>` is a growable sink;
//! [`SliceSink`] is a pre-sized one that refuses (rather than truncates) writes that do not fit.

pub mod hc;

use std::mem;
use std::cmp;
use std::io::{self, Write, ErrorKind};
use std::convert::{TryInto, TryFrom};
use byteorder::{ByteOrder, NativeEndian, WriteBytesExt, LE};
use cfg_if::cfg_if;
use fehler::{throws};

use super::{Mode, MINMATCH, LAST_LITERALS, MFLIMIT, MAX_DISTANCE, MAX_INPUT_SIZE, WINDOW_SIZE, compress_bound};
use crate::error::{self, Error as CodecError};

type Error = io::Error;

/// Duplication dictionary size.
///
/// Every four bytes is assigned an entry. When this number is lower, fewer entries exists, and
/// thus collisions are more likely, hurting the compression ratio.
const DICTIONARY_SIZE: usize = 1 << HASHLOG;
const HASHLOG: usize = 12;

/// Table offsets are rebased once they grow past this, so absolute positions always fit a `u32`.
const REBASE_THRESHOLD: usize = 1 << 30;

/// Maps hashes of the next few input bytes to the last position they were seen at.
///
/// Positions are relative to the slice passed to `replace`. `offset` tells the table that the caller
/// dropped that many bytes from the front of its buffer, which keeps old entries usable across calls.
pub trait EncoderTable: Default {
    fn payload_size_limit() -> usize;
    // offset is declared as usize but must not be above payload_size_limit
    fn replace(&mut self, input: &[u8], offset: usize) -> usize;

    fn offset(&mut self, offset: usize);
}

#[derive(Clone)]
pub struct U32Table {
    dict: [u32; DICTIONARY_SIZE],
    offset: usize,
}
impl Default for U32Table {
    fn default() -> Self {
        U32Table { dict: [0; DICTIONARY_SIZE], offset: 0 }
    }
}

cfg_if! {
    // on 64 bit systems, we read 64 bits and hash 5 bytes instead of 4
    if #[cfg(target_pointer_width = "64")] {
        fn hash_for_u32(input: &[u8]) -> usize {
            // read 64 bits if possible
            let v = input.get(..8).map(NativeEndian::read_u64).unwrap_or(0);
            // we end up only needing 5 bytes but the only case where this becomes
            // zero is at the very end, where we're not allowed to produce matches anyway (see below)

            // calculate a bad but very cheap checksum
            #[cfg(target_endian = "little")] fn checksum_u64(v: u64) -> u64 { (v << 24).wrapping_mul(889523592379) }
            #[cfg(target_endian = "big")] fn checksum_u64(v: u64) -> u64 { (v >> 24).wrapping_mul(11400714785074694791) }
            (checksum_u64(v) >> (64 - HASHLOG)) as usize
        }
    } else {
        // on all other systems we simply hash 4 bytes, borrowing the algorithm for the u16 table
        fn hash_for_u32(input: &[u8]) -> usize {
            hash_for_u16(input) >> 1 // shift by one more because we have half as many slots as the u16 table
        }
    }
}

fn hash_for_u16(input: &[u8]) -> usize {
    let v = input.get(..4).map(NativeEndian::read_u32).unwrap_or(0);
    (v.wrapping_mul(2654435761) >> (32 - HASHLOG - 1)) as usize // shift by one less than hashlog because we have twice as many slots
}

impl EncoderTable for U32Table {
    fn replace(&mut self, input: &[u8], offset: usize) -> usize {
        let o = offset + self.offset; // apply positive offset on input

        let mut value = u32::try_from(o).unwrap_or(u32::MAX);
        mem::swap(&mut self.dict[hash_for_u32(&input[offset..])], &mut value);
        (value as usize).saturating_sub(self.offset) // apply negative offset on output
    }
    fn offset(&mut self, offset: usize) {
        self.offset += offset;
        if self.offset > REBASE_THRESHOLD {
            let base = self.offset as u32;
            for slot in self.dict.iter_mut() {
                *slot = slot.saturating_sub(base);
            }
            self.offset = 0;
        }
    }
    fn payload_size_limit() -> usize { u32::MAX as usize - REBASE_THRESHOLD }
}

/// Table for inputs that fit in 64KiB: `u16` positions fit twice as many slots into the same memory.
#[derive(Clone)]
pub struct U16Table {
    dict: [u16; DICTIONARY_SIZE*2],
    offset: usize,
}
impl Default for U16Table {
    fn default() -> Self {
        U16Table { dict: [0; DICTIONARY_SIZE*2], offset: 0 }
    }
}
impl EncoderTable for U16Table {
    fn replace(&mut self, input: &[u8], offset: usize) -> usize {
        let o = offset + self.offset; // apply positive offset on input

        let mut value = u16::try_from(o).unwrap_or(u16::MAX);
        mem::swap(&mut self.dict[hash_for_u16(&input[offset..])], &mut value);
        usize::from(value).saturating_sub(self.offset) // apply negative offset on output
    }
    fn offset(&mut self, offset: usize) {
        self.offset += offset;
    }
    fn payload_size_limit() -> usize { u16::MAX as usize }
}


#[derive(Copy, Clone, Debug)]
pub(crate) struct Duplicate {
    /// The number of bytes before our cursor, where the duplicate starts.
    pub offset: u16,

    /// The length beyond the four first bytes.
    ///
    /// Adding four to this number yields the actual length.
    pub extra_bytes: usize,
}


pub(crate) fn count_matching_bytes(a: &[u8], b: &[u8]) -> usize {
    const REGSIZE: usize = mem::size_of::<usize>();
    fn read_usize(b: &[u8]) -> usize { // sadly byteorder doesn't have this
        let mut buf = [0u8; REGSIZE];
        buf.copy_from_slice(&b[..REGSIZE]);
        usize::from_le_bytes(buf)
    }

    let mut matching_bytes = 0;
    // match in chunks of usize so we process a full register at a time instead of single bytes
    for (a, b) in a.chunks_exact(REGSIZE).zip(b.chunks_exact(REGSIZE)) {
        let xor = read_usize(a) ^ read_usize(b);
        if xor == 0 {
            matching_bytes += REGSIZE;
        } else {
            // read_usize is little endian on every platform, so the first differing byte is the lowest one
            matching_bytes += (xor.trailing_zeros() / 8/*bits per byte*/) as usize;
            return matching_bytes;
        }
    }

    // we only return here if we ran out of data (i.e. all full registers have matched)
    // but there may be a few more bytes to check!
    let trailing_matches = a.iter().zip(b).skip(matching_bytes).take_while(|&(a, b)| a == b).count();
    matching_bytes + trailing_matches
}

const SKIP_TRIGGER: usize = 6; // for each 64 steps, skip in bigger increments

#[throws]
pub(crate) fn write_group<W: Write>(mut writer: &mut W, literal: &[u8], duplicate: Duplicate) {
        let literal_len = literal.len();

        let mut token = 0;
        write_lsic_head(&mut token, 4, literal_len);
        write_lsic_head(&mut token, 0, duplicate.extra_bytes);

        writer.write_u8(token)?;
        write_lsic_tail(&mut writer, literal_len)?;
        writer.write_all(literal)?;
        writer.write_u16::<LE>(duplicate.offset)?;
        write_lsic_tail(&mut writer, duplicate.extra_bytes)?;
}

/// Write the final, match-less sequence of a block.
#[throws]
pub(crate) fn write_last_literals<W: Write>(mut writer: &mut W, literal: &[u8]) {
    let mut token = 0;
    write_lsic_head(&mut token, 4, literal.len());
    writer.write_u8(token)?;
    write_lsic_tail(&mut writer, literal.len())?;
    writer.write_all(literal)?;
}

/// Compress `input[cursor..]` as one block.
///
/// `input[..cursor]` is history (a dictionary or previously compressed data) that matches may reference.
/// The table must have seen that history through the same buffer layout, or be fresh.
#[throws]
pub fn compress2<W: Write, T: EncoderTable>(input: &[u8], cursor: usize, table: &mut T, acceleration: usize, mut writer: W) {
    assert!(input.len() <= T::payload_size_limit());

    if cursor == input.len() {
        // the empty block is a single token announcing zero literals
        return write_last_literals(&mut writer, &[])?;
    }

    let acceleration = cmp::max(acceleration, 1);
    let mut cursor = cursor;
    while cursor < input.len() {
        let literal_start = cursor;

        let mut step_counter = acceleration << SKIP_TRIGGER;
        let mut step = acceleration;
        // look for a duplicate
        let duplicate = loop {
            if input.len().saturating_sub(cursor) < MFLIMIT {
                // end with a literal-only section
                // matches may not start within the last 12 bytes and must leave the last 5 as literals
                // so the decoder never has to look past the end of its input when copying a match
                return write_last_literals(&mut writer, &input[literal_start..])?;
            }

            // due to the check above we know there's at least 12 bytes of space
            // we have to chop off the last five bytes though because they must be encoded as literals
            let current_batch = &input[cursor..(input.len() - LAST_LITERALS)];
            let candidate = table.replace(input, cursor);

            // NB: stale or empty table entries just produce candidates that fail verification
            if candidate < cursor && cursor - candidate <= MAX_DISTANCE { // must be an addressable offset
                // let's see how many matching bytes we have
                let candidate_batch = &input[candidate..];
                let matching_bytes = count_matching_bytes(current_batch, candidate_batch);

                if let Some(mut extra_bytes) = matching_bytes.checked_sub(MINMATCH) {
                    // if it wasn't, this was just a hash collision :(
                    let offset: u16 = (cursor - candidate).try_into().unwrap_or(u16::MAX);

                    // backtrack
                    let max_backtrack = cursor - literal_start;
                    let backtrack = input[..cursor].iter().rev().zip(input[..candidate].iter().rev()).take(max_backtrack).take_while(|&(a, b)| a == b).count();
                    // offset remains unchanged
                    extra_bytes += backtrack;
                    cursor += matching_bytes;

                    // reinsert a position near the end of the match so the next search has a fresh candidate
                    table.replace(input, cursor - 2);

                    break Duplicate { offset, extra_bytes };
                }
            }

            // no match, keep looping
            cursor += step;
            step = step_counter >> SKIP_TRIGGER;

            // the first miss of each search doesn't count towards acceleration
            if literal_start+1 != cursor {
                step_counter += 1
            }
        };

        // cursor is now pointing past the match
        let literal_end = cursor - duplicate.extra_bytes - MINMATCH;
        write_group(&mut writer, &input[literal_start..literal_end], duplicate)?;
   }
}
pub(crate) fn write_lsic_head(token: &mut u8, shift: usize, value: usize) {
    let i = cmp::min(value, 0xF) as u8;
    *token |= i << shift;
}
#[throws]
pub(crate) fn write_lsic_tail<W: Write>(writer: &mut W, mut value: usize) {
    if value < 0xF {
        return;
    }

    value -= 0xF;

    while value >= 4 * 0xFF {
        writer.write_u32::<NativeEndian>(u32::MAX)?;
        value -= 4 * 0xFF;
    }
    while value >= 0xFF {
        writer.write_u8(0xFF)?;
        value -= 0xFF;
    }
    writer.write_u8(value as u8)?;
}

/// Index a dictionary so blocks compressed behind it can reference its contents.
pub(crate) fn prime_table<T: EncoderTable>(table: &mut T, dict: &[u8]) {
    for offset in (0..dict.len().saturating_sub(mem::size_of::<usize>())).step_by(3) {
        table.replace(dict, offset);
    }
}

/// Compress `input[cursor..]` with whatever compressor `mode` selects.
#[throws]
pub(crate) fn compress_with_history<W: Write>(input: &[u8], cursor: usize, mode: Mode, writer: W) {
    match mode {
        Mode::High(level) => {
            let mut tables = hc::HcTables::new();
            hc::compress_hc(input, cursor, level, &mut tables, writer)?;
        }
        _ if input.len() <= U16Table::payload_size_limit() => {
            let mut table = U16Table::default();
            prime_table(&mut table, &input[..cursor]);
            compress2(input, cursor, &mut table, mode.acceleration(), writer)?;
        }
        _ => {
            let mut table = U32Table::default();
            prime_table(&mut table, &input[..cursor]);
            compress2(input, cursor, &mut table, mode.acceleration(), writer)?;
        }
    }
}

/// Helper struct to allow more efficient code generation when using the Write trait on byte buffers.
///
/// The underlying problem is that the Write impl on [u8] (and everything similar, e.g. Cursor<[u8]>)
/// is specified to write as many bytes as possible before returning an error.
/// This is a problem because it forces e.g. a 32-bit write to compile to four 8-bit writes with a range
/// check every time, rather than a single 32-bit write with a range check.
///
/// This wrapper aims to resolve the problem by simply not writing anything in case we fail the bounds check,
/// as we throw away the entire buffer in that case anyway.
pub struct SliceSink<'a> {
    buf: &'a mut [u8],
    written: usize,
}
impl<'a> SliceSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        SliceSink { buf, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}
impl<'a> Write for SliceSink<'a> {
    #[inline]
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() < data.len() {
            return Err(ErrorKind::WriteZero.into());
        }

        let amt = data.len();
        let (a, b) = mem::replace(&mut self.buf, &mut []).split_at_mut(data.len());
        a.copy_from_slice(data);
        self.buf = b;
        self.written += amt;
        Ok(amt)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn check_input_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_INPUT_SIZE {
        return Err(CodecError::InvalidArgument("input exceeds the maximum block input size"));
    }
    Ok(())
}

/// Only the last 64KiB of a dictionary can ever be referenced.
pub(crate) fn dictionary_window(dict: &[u8]) -> &[u8] {
    &dict[dict.len().saturating_sub(WINDOW_SIZE)..]
}

/// Compress `input` into `output`, returning the number of bytes written.
///
/// Fails with `BufferTooSmall` (having written garbage into `output`) if the compressed block does not fit.
/// Sizing `output` to [`compress_bound`] rules that out.
pub fn compress_into(input: &[u8], output: &mut [u8], mode: Mode) -> Result<usize, CodecError> {
    compress_with_dict_into(input, &[], output, mode)
}

/// Like [`compress_into`], with `dict` as history preceding the block.
pub fn compress_with_dict_into(input: &[u8], dict: &[u8], output: &mut [u8], mode: Mode) -> Result<usize, CodecError> {
    check_input_len(input.len())?;
    let dict = dictionary_window(dict);
    let available = output.len();
    let mut sink = SliceSink::new(output);

    let result = if dict.is_empty() {
        compress_with_history(input, 0, mode, &mut sink)
    } else {
        let mut buf = Vec::new();
        error::reserve(&mut buf, dict.len() + input.len())?;
        buf.extend_from_slice(dict);
        buf.extend_from_slice(input);
        compress_with_history(&buf, dict.len(), mode, &mut sink)
    };

    match result {
        Ok(()) => Ok(sink.written()),
        Err(e) if e.kind() == ErrorKind::WriteZero => Err(CodecError::BufferTooSmall {
            needed: compress_bound(input.len()).unwrap_or(usize::MAX),
            available,
        }),
        Err(_) => Err(CodecError::InvalidArgument("compressor rejected its input")),
    }
}

/// Compress `input` into a freshly allocated block.
pub fn compress(input: &[u8], mode: Mode) -> Result<Vec<u8>, CodecError> {
    compress_with_dict(input, &[], mode)
}

/// Compress `input` with `dict` as history preceding the block.
///
/// The same dictionary must be passed to [`decompress_with_dict`](super::decompress_with_dict).
pub fn compress_with_dict(input: &[u8], dict: &[u8], mode: Mode) -> Result<Vec<u8>, CodecError> {
    let bound = compress_bound(input.len())
        .ok_or(CodecError::InvalidArgument("input exceeds the maximum block input size"))?;
    let mut output = Vec::new();
    error::reserve(&mut output, bound)?;
    output.resize(bound, 0);
    let written = compress_with_dict_into(input, dict, &mut output, mode)?;
    output.truncate(written);
    Ok(output)
}
