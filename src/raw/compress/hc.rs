//! High-compression block compressor.
//!
//! Produces the same bitstream as the regular compressor, so any LZ4 decoder reads its output.
//! Instead of remembering one position per hash it chains every position to the previous one with
//! the same hash and walks that chain looking for the longest match. The level decides how many
//! chain links are followed per position.

use std::cmp;
use std::io::{self, Write};
use byteorder::{ByteOrder, LE};
use fehler::throws;

use super::{count_matching_bytes, write_group, write_last_literals, Duplicate};
use crate::raw::{MINMATCH, LAST_LITERALS, MFLIMIT, MAX_DISTANCE};

type Error = io::Error;

pub const LEVEL_MIN: i32 = 1;
pub const LEVEL_DEFAULT: i32 = 9;
pub const LEVEL_MAX: i32 = 12;

const HASHLOG: usize = 15;
const CHAIN_SIZE: usize = 1 << 16;
const NO_POSITION: u32 = u32::MAX;

/// Chain links followed per position, indexed by `level - 1`.
const SEARCH_DEPTH: [usize; LEVEL_MAX as usize] = [2, 4, 8, 16, 32, 64, 128, 256, 256, 512, 1024, 4096];

/// Map any requested level onto the supported range.
///
/// Levels below [`LEVEL_MIN`] select [`LEVEL_DEFAULT`], levels above [`LEVEL_MAX`] are clamped to it.
pub fn clamp_level(level: i32) -> i32 {
    if level < LEVEL_MIN {
        LEVEL_DEFAULT
    } else {
        cmp::min(level, LEVEL_MAX)
    }
}

fn search_depth(level: i32) -> usize {
    SEARCH_DEPTH[(clamp_level(level) - 1) as usize]
}

fn hash4(input: &[u8], pos: usize) -> usize {
    let v = LE::read_u32(&input[pos..]);
    (v.wrapping_mul(2654435761) >> (32 - HASHLOG)) as usize
}

/// Hash heads and chain links. Reusable across blocks to avoid reallocating 256KiB per call.
pub struct HcTables {
    head: Vec<u32>,
    /// Distance from a position to the previous one with the same hash, 0 for none.
    /// Indexed by position modulo 64KiB, which is safe because older positions are out of reach anyway.
    chain: Vec<u16>,
    next_to_update: usize,
}

impl Default for HcTables {
    fn default() -> Self {
        Self::new()
    }
}

impl HcTables {
    pub fn new() -> Self {
        HcTables {
            head: vec![NO_POSITION; 1 << HASHLOG],
            chain: vec![0; CHAIN_SIZE],
            next_to_update: 0,
        }
    }

    pub fn reset(&mut self) {
        for slot in self.head.iter_mut() {
            *slot = NO_POSITION;
        }
        for link in self.chain.iter_mut() {
            *link = 0;
        }
        self.next_to_update = 0;
    }

    fn insert_up_to(&mut self, input: &[u8], target: usize) {
        while self.next_to_update < target {
            let pos = self.next_to_update;
            let h = hash4(input, pos);
            let prev = self.head[h];
            let delta = if prev == NO_POSITION {
                0
            } else {
                let d = pos - prev as usize;
                if d > MAX_DISTANCE { 0 } else { d }
            };
            self.chain[pos % CHAIN_SIZE] = delta as u16;
            self.head[h] = pos as u32;
            self.next_to_update += 1;
        }
    }

    /// Longest match for `input[pos..limit]` among earlier positions, as `(candidate, length)`.
    fn find_longest(&mut self, input: &[u8], pos: usize, limit: usize, depth: usize) -> Option<(usize, usize)> {
        self.insert_up_to(input, pos);

        let mut best: Option<(usize, usize)> = None;
        let mut best_len = MINMATCH - 1;
        let mut candidate = self.head[hash4(input, pos)];
        let mut attempts = depth;

        while candidate != NO_POSITION && attempts > 0 {
            let cand = candidate as usize;
            if pos - cand > MAX_DISTANCE {
                break;
            }
            attempts -= 1;

            // a longer match has to agree on the byte just past the current best
            if input[cand + best_len] == input[pos + best_len] {
                let len = count_matching_bytes(&input[pos..limit], &input[cand..]);
                if len > best_len {
                    best_len = len;
                    best = Some((cand, len));
                    if pos + len == limit {
                        break;
                    }
                }
            }

            let delta = self.chain[cand % CHAIN_SIZE] as usize;
            if delta == 0 {
                break;
            }
            candidate = (cand - delta) as u32;
        }

        best
    }
}

/// Compress `input[cursor..]` as one block, allowing matches into `input[..cursor]`.
#[throws]
pub fn compress_hc<W: Write>(input: &[u8], cursor: usize, level: i32, tables: &mut HcTables, mut writer: W) {
    tables.reset();
    let depth = search_depth(level);
    let end = input.len();

    if cursor == end {
        return write_last_literals(&mut writer, &[])?;
    }

    let match_limit = end.saturating_sub(LAST_LITERALS);
    let mut anchor = cursor;
    let mut pos = cursor;

    while pos + MFLIMIT <= end {
        let (mut candidate, mut len) = match tables.find_longest(input, pos, match_limit, depth) {
            Some(found) => found,
            None => {
                pos += 1;
                continue;
            }
        };

        // lazy evaluation: prefer a strictly longer match starting one byte later
        let mut start = pos;
        while start + 1 + MFLIMIT <= end {
            match tables.find_longest(input, start + 1, match_limit, depth) {
                Some((later_candidate, later_len)) if later_len > len => {
                    start += 1;
                    candidate = later_candidate;
                    len = later_len;
                }
                _ => break,
            }
        }

        // absorb preceding literals into the match
        while start > anchor && candidate > 0 && input[start - 1] == input[candidate - 1] {
            start -= 1;
            candidate -= 1;
            len += 1;
        }

        let duplicate = Duplicate { offset: (start - candidate) as u16, extra_bytes: len - MINMATCH };
        write_group(&mut writer, &input[anchor..start], duplicate)?;

        pos = start + len;
        anchor = pos;
    }

    write_last_literals(&mut writer, &input[anchor..])?;
}
