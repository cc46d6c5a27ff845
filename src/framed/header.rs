#![allow(non_upper_case_globals)]

use byteorder::{ByteOrder, WriteBytesExt, LE};
use fehler::{throw, throws};
use bitflags::bitflags;

use super::{MAGIC, SKIPPABLE_MAGIC_MASK, SKIPPABLE_MAGIC_MIN};
use crate::checksum::header_checksum;
use crate::error::{Corruption, Error};

/// Magic, FLG, BD and the header checksum.
pub(crate) const MIN_HEADER_SIZE: usize = 7;
/// Magic, FLG, BD, content size, dictionary id and the header checksum.
pub const MAX_HEADER_SIZE: usize = 19;
/// Magic and the user data size.
pub(crate) const SKIPPABLE_HEADER_SIZE: usize = 8;

const VERSION: u8 = 1;

bitflags! {
    pub struct Flags: u8 {
        const IndependentBlocks = 0b00100000;
        const BlockChecksums    = 0b00010000;
        const ContentSize       = 0b00001000;
        const ContentChecksum   = 0b00000100;
        const DictionaryId      = 0b00000001;
    }
}

impl Flags {
    #[throws(Corruption)]
    pub fn parse(i: u8) -> Self {
        let version = i >> 6;
        if version != VERSION {
            throw!(Corruption::UnsupportedVersion(version));
        }
        if (i & 0b10) != 0 {
            throw!(Corruption::ReservedBitsSet);
        }

        Flags::from_bits_truncate(i)
    }

    pub fn independent_blocks(&self) -> bool { self.contains(Flags::IndependentBlocks) }
    pub fn block_checksums(&self)    -> bool { self.contains(Flags::BlockChecksums) }
    pub fn content_size(&self)       -> bool { self.contains(Flags::ContentSize) }
    pub fn content_checksum(&self)   -> bool { self.contains(Flags::ContentChecksum) }
    pub fn dictionary_id(&self)      -> bool { self.contains(Flags::DictionaryId) }

    fn to_byte(self) -> u8 {
        (VERSION << 6) | self.bits()
    }
}

/// Maximum uncompressed size of one block in a frame.
///
/// `Default` is the same as `Max64KB` but is reported as `Default` when a frame is written with it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BlockSize {
    Default,
    Max64KB,
    Max256KB,
    Max1MB,
    Max4MB,
}

impl Default for BlockSize {
    fn default() -> Self {
        BlockSize::Default
    }
}

impl BlockSize {
    /// The id stored in the block descriptor byte.
    pub fn id(self) -> u8 {
        match self {
            BlockSize::Default | BlockSize::Max64KB => 4,
            BlockSize::Max256KB => 5,
            BlockSize::Max1MB => 6,
            BlockSize::Max4MB => 7,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            4 => Some(BlockSize::Max64KB),
            5 => Some(BlockSize::Max256KB),
            6 => Some(BlockSize::Max1MB),
            7 => Some(BlockSize::Max4MB),
            _ => None,
        }
    }

    /// Size in bytes.
    pub fn get(self) -> usize {
        1 << (self.id() as usize * 2 + 8)
    }
}

pub struct BlockDescriptor(pub u8); // ??? or what else could "BD" stand for ???
impl BlockDescriptor {
    pub fn new(block_size: BlockSize) -> Self {
        BlockDescriptor(block_size.id() << 4)
    }

    #[throws(Corruption)]
    pub fn parse(i: u8) -> Self {
        if (i & 0b10001111) != 0 {
            throw!(Corruption::ReservedBitsSet);
        }
        BlockDescriptor(i)
    }

    #[throws(Corruption)]
    pub fn block_size(&self) -> BlockSize {
        let size = (self.0 >> 4) & 0b111;
        match BlockSize::from_id(size) {
            Some(block_size) => block_size,
            None => throw!(Corruption::InvalidBlockSize(size)),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FrameType {
    Frame,
    /// A frame of opaque user data that decoders skip. Carries the low nibble of its magic number.
    Skippable(u8),
}

/// Everything a frame header says about the frame that follows.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameInfo {
    pub frame_type: FrameType,
    pub block_size: BlockSize,
    pub independent_blocks: bool,
    pub block_checksums: bool,
    pub content_checksum: bool,
    /// The declared uncompressed size, for skippable frames the size of the user data.
    pub content_size: Option<u64>,
    pub dictionary_id: Option<u32>,
}

impl Default for FrameInfo {
    fn default() -> Self {
        FrameInfo {
            frame_type: FrameType::Frame,
            block_size: BlockSize::Default,
            independent_blocks: false,
            block_checksums: false,
            content_checksum: false,
            content_size: None,
            dictionary_id: None,
        }
    }
}

impl FrameInfo {
    /// The declared content size, where a declared size of zero means unknown.
    pub fn known_content_size(&self) -> Option<u64> {
        self.content_size.filter(|&size| size != 0)
    }

    fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        flags.set(Flags::IndependentBlocks, self.independent_blocks);
        flags.set(Flags::BlockChecksums, self.block_checksums);
        flags.set(Flags::ContentSize, self.content_size.is_some());
        flags.set(Flags::ContentChecksum, self.content_checksum);
        flags.set(Flags::DictionaryId, self.dictionary_id.is_some());
        flags
    }

    /// Serialize the header of a regular frame.
    #[throws]
    pub(crate) fn write_header(&self, output: &mut Vec<u8>) {
        let start = output.len();
        let mut header = Vec::with_capacity(MAX_HEADER_SIZE);
        header.write_u32::<LE>(MAGIC)?;
        header.write_u8(self.flags().to_byte())?;
        header.write_u8(BlockDescriptor::new(self.block_size).0)?;
        if let Some(size) = self.content_size {
            header.write_u64::<LE>(size)?;
        }
        if let Some(id) = self.dictionary_id {
            header.write_u32::<LE>(id)?;
        }
        let checksum = header_checksum(&header[4..]);
        header.push(checksum);
        output.extend_from_slice(&header);
        debug_assert!(output.len() - start <= MAX_HEADER_SIZE);
    }

    /// Parse the header at the start of `data`, returning it and its length.
    #[throws]
    pub(crate) fn parse(data: &[u8]) -> (Self, usize) {
        let len = required_len(data)?;
        if data.len() < len {
            throw!(Error::corrupt(data.len(), Corruption::Truncated));
        }

        let magic = LE::read_u32(data);
        if magic & SKIPPABLE_MAGIC_MASK == SKIPPABLE_MAGIC_MIN {
            let info = FrameInfo {
                frame_type: FrameType::Skippable((magic & 0xf) as u8),
                content_size: Some(LE::read_u32(&data[4..]) as u64),
                ..FrameInfo::default()
            };
            return (info, len);
        }

        let flags = Flags::parse(data[4]).map_err(|reason| Error::corrupt(4, reason))?;
        let block_size = BlockDescriptor::parse(data[5])
            .and_then(|bd| bd.block_size())
            .map_err(|reason| Error::corrupt(5, reason))?;

        let mut pos = 6;
        let content_size = if flags.content_size() {
            pos += 8;
            Some(LE::read_u64(&data[pos - 8..]))
        } else {
            None
        };
        let dictionary_id = if flags.dictionary_id() {
            pos += 4;
            Some(LE::read_u32(&data[pos - 4..]))
        } else {
            None
        };

        if header_checksum(&data[4..pos]) != data[pos] {
            throw!(Error::corrupt(pos, Corruption::HeaderChecksum));
        }

        let info = FrameInfo {
            frame_type: FrameType::Frame,
            block_size,
            independent_blocks: flags.independent_blocks(),
            block_checksums: flags.block_checksums(),
            content_checksum: flags.content_checksum(),
            content_size,
            dictionary_id,
        };
        (info, len)
    }
}

/// How many bytes the header starting at `data` occupies, as far as `data` tells.
///
/// The answer may grow as more bytes become available, but never shrinks.
#[throws]
pub(crate) fn required_len(data: &[u8]) -> usize {
    if data.len() < 4 {
        return 4;
    }
    let magic = LE::read_u32(data);
    if magic & SKIPPABLE_MAGIC_MASK == SKIPPABLE_MAGIC_MIN {
        return SKIPPABLE_HEADER_SIZE;
    }
    if magic != MAGIC {
        throw!(Error::corrupt(0, Corruption::WrongMagic(magic)));
    }
    if data.len() < 5 {
        return MIN_HEADER_SIZE;
    }

    let flags = Flags::parse(data[4]).map_err(|reason| Error::corrupt(4, reason))?;
    let mut len = MIN_HEADER_SIZE;
    if flags.content_size() {
        len += 8;
    }
    if flags.dictionary_id() {
        len += 4;
    }
    len
}
