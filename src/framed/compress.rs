use byteorder::{WriteBytesExt, LE};
use std::cmp;
use std::convert::TryFrom;
use std::hash::Hasher;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use fehler::{throw, throws};
use tracing::{debug, trace};

use super::{INCOMPRESSIBLE, SKIPPABLE_MAGIC_MIN};
use super::header::{BlockSize, FrameInfo, FrameType, MAX_HEADER_SIZE};
use crate::checksum::{self, ContentHasher};
use crate::error::{self, Error};
use crate::raw::{hc, Mode};
use crate::stream::{CompressStream, StreamSettings};

/// Levels from here up select the high-compression compressor.
pub const LEVEL_HC_MIN: i32 = 3;

/// Map a frame compression level onto a block compression mode.
///
/// Negative levels select the fast compressor with an acceleration of `-level`, levels 0 to 2 the default
/// compressor and anything from [`LEVEL_HC_MIN`] up the high-compression compressor.
pub fn level_to_mode(level: i32) -> Mode {
    if level < 0 {
        Mode::Fast(level.unsigned_abs())
    } else if level < LEVEL_HC_MIN {
        Mode::Default
    } else {
        Mode::High(hc::clamp_level(level))
    }
}

/// A builder-style struct that configures compression settings.
/// This is how you compress LZ4 frames.
/// (An LZ4 file usually consists of a single frame.)
///
/// Create it using `Default::default()`.
#[derive(Clone, Debug)]
pub struct CompressionSettings<'a> {
    independent_blocks: bool,
    block_checksums: bool,
    content_checksum: bool,
    block_size: BlockSize,
    compression_level: i32,
    auto_flush: bool,
    content_size: Option<u64>,
    dictionary: Option<&'a [u8]>,
    dictionary_id: Option<u32>,
}
impl<'a> Default for CompressionSettings<'a> {
    fn default() -> Self {
        Self {
            independent_blocks: true,
            block_checksums: false,
            content_checksum: true,
            block_size: BlockSize::Default,
            compression_level: 0,
            auto_flush: false,
            content_size: None,
            dictionary: None,
            dictionary_id: None,
        }
    }
}
impl<'a> CompressionSettings<'a> {
    /// In independent mode, blocks are not allowed to reference data from previous blocks.
    /// Hence, using linked blocks yields slightly better compression, most noticeably with small blocks.
    /// The downside of linked blocks is that seeking becomes impossible - the entire frame always has
    /// to be decompressed from the beginning.
    ///
    /// Blocks are independent by default.
    pub fn independent_blocks(&mut self, v: bool) -> &mut Self {
        self.independent_blocks = v;
        self
    }

    /// Block checksums can help detect data corruption in storage and transit.
    /// They do not offer error correction though.
    ///
    /// Block checksums are disabled by default.
    pub fn block_checksums(&mut self, v: bool) -> &mut Self {
        self.block_checksums = v;
        self
    }

    /// The content checksum (also called frame checksum) is calculated over the contents of the entire frame.
    /// Its size overhead is constant, and it also catches incorrect decompression.
    ///
    /// Note that the content checksum can only be verified *after* the entire frame has been read
    /// (and returned!), which is the downside of content checksums.
    ///
    /// Frame checksums are enabled by default.
    pub fn content_checksum(&mut self, v: bool) -> &mut Self {
        self.content_checksum = v;
        self
    }

    /// The largest amount of uncompressed data in one block. The decoder has to buffer this much.
    ///
    /// The default block size is 64 KiB.
    pub fn block_size(&mut self, v: BlockSize) -> &mut Self {
        self.block_size = v;
        self
    }

    /// See [`level_to_mode`]. The default level is 0.
    pub fn compression_level(&mut self, v: i32) -> &mut Self {
        self.compression_level = v;
        self
    }

    /// With auto flush, every call to [`FrameEncoder::update`] emits its data as (at least) one complete block
    /// instead of buffering until a block is full. Smaller blocks compress worse.
    ///
    /// Disabled by default.
    pub fn auto_flush(&mut self, v: bool) -> &mut Self {
        self.auto_flush = v;
        self
    }

    /// Declare the uncompressed size in the frame header.
    /// Exactly this many bytes have to be fed to the encoder before the frame is ended.
    ///
    /// No size is declared by default.
    pub fn content_size(&mut self, v: Option<u64>) -> &mut Self {
        self.content_size = v;
        self
    }

    /// A dictionary is essentially a constant slice of bytes shared by the compressing and decompressing party.
    /// Using a dictionary can improve compression ratios, because the compressor can reference data from the dictionary.
    ///
    /// The dictionary id is an application-specific identifier which can be used during decompression to determine
    /// which dictionary to use.
    ///
    /// Only the trailing 64 KiB of a dictionary can be referenced; anything before that is ignored.
    ///
    /// By default, no dictionary is used and no id is specified.
    pub fn dictionary(&mut self, id: u32, dict: &'a [u8]) -> &mut Self {
        self.dictionary_id = Some(id);
        self.dictionary = Some(dict);
        self
    }

    /// Override the dictionary id written to the header, or leave it out with `None`.
    ///
    /// Without an id nobody can tell a frame that needs a dictionary from a corrupt one, so this should
    /// only be used when the frames have to match what other encoders produce.
    pub fn dictionary_id_nonsense_override(&mut self, id: Option<u32>) -> &mut Self {
        self.dictionary_id = id;
        self
    }

    /// Compress everything `reader` produces as one frame into `writer`.
    #[throws(io::Error)]
    pub fn compress<R: Read, W: Write>(&self, mut reader: R, mut writer: W) {
        let mut encoder = FrameEncoder::new();
        writer.write_all(&encoder.begin(self)?)?;

        let block_size = self.block_size.get();
        let mut in_buffer = Vec::with_capacity(block_size);
        loop {
            in_buffer.clear();
            // We basically want read_exact semantics, except at the end.
            // Sadly read_exact specifies the buffer contents to be undefined
            // on error, so we have to use this construction instead.
            reader.by_ref().take(block_size as u64).read_to_end(&mut in_buffer)?;
            if in_buffer.is_empty() {
                break;
            }
            writer.write_all(&encoder.update(&in_buffer)?)?;
        }

        writer.write_all(&encoder.end()?)?;
    }

    /// Like [`compress`](Self::compress), but declares the remaining length of `reader` as the content size.
    #[throws(io::Error)]
    pub fn compress_with_size<R: Read + Seek, W: Write>(&self, mut reader: R, writer: W) {
        // we ignore all bytes before the cursor, which is why this is not simply the stream length
        let start = reader.seek(SeekFrom::Current(0))?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(start))?;

        let mut settings = self.clone();
        settings.content_size(Some(end - start));
        settings.compress(reader, writer)?;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Idle,
    Started,
    Ended,
}

/// Push-style frame compressor.
///
/// [`begin`](Self::begin) a frame, feed it with any number of [`update`](Self::update) calls and finish it with
/// [`end`](Self::end). Every call returns the compressed bytes that became ready; concatenated, they form the frame.
/// Once ended, the encoder can begin the next frame.
pub struct FrameEncoder {
    stage: Stage,
    info: FrameInfo,
    auto_flush: bool,
    block_maxsize: usize,
    /// Uncompressed data not yet emitted as a block. Never holds a full block between calls.
    pending: Vec<u8>,
    out_buffer: Vec<u8>,
    content_hasher: Option<ContentHasher>,
    consumed: u64,
    stream: Option<CompressStream>,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    pub fn new() -> Self {
        FrameEncoder {
            stage: Stage::Idle,
            info: FrameInfo::default(),
            auto_flush: false,
            block_maxsize: 0,
            pending: Vec::new(),
            out_buffer: Vec::new(),
            content_hasher: None,
            consumed: 0,
            stream: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.stage == Stage::Started
    }

    /// Start a frame, returning its header.
    #[throws]
    pub fn begin(&mut self, settings: &CompressionSettings) -> Vec<u8> {
        let mut output = Vec::with_capacity(MAX_HEADER_SIZE);
        self.begin_into(settings, &mut output)?;
        output
    }

    /// Feed uncompressed data, returning the blocks that are complete.
    ///
    /// The result is empty whenever `data` was merely buffered.
    #[throws]
    pub fn update(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = Vec::new();
        self.update_into(data, &mut output)?;
        output
    }

    /// Emit all buffered data as a block without ending the frame.
    #[throws]
    pub fn flush(&mut self) -> Vec<u8> {
        self.check_started()?;
        let mut output = Vec::new();
        self.flush_pending(&mut output)?;
        output
    }

    /// Finish the frame: the last block, the end marker and the content checksum, if enabled.
    #[throws]
    pub fn end(&mut self) -> Vec<u8> {
        let mut output = Vec::new();
        self.end_into(&mut output)?;
        output
    }

    #[throws]
    fn begin_into(&mut self, settings: &CompressionSettings, output: &mut Vec<u8>) {
        if self.stage == Stage::Started {
            throw!(Error::UsageError("a frame is already in progress"));
        }

        let block_maxsize = settings.block_size.get();
        let mut stream = CompressStream::with_settings(
            StreamSettings::default()
                .buffer_size(block_maxsize)
                .mode(level_to_mode(settings.compression_level)),
        )?;
        if let Some(dict) = settings.dictionary {
            stream.set_dictionary(dict);
        }

        self.pending.clear();
        error::reserve(&mut self.pending, block_maxsize)?;
        if self.out_buffer.len() < block_maxsize {
            let additional = block_maxsize - self.out_buffer.len();
            error::reserve(&mut self.out_buffer, additional)?;
            self.out_buffer.resize(block_maxsize, 0);
        }

        self.info = FrameInfo {
            frame_type: FrameType::Frame,
            block_size: settings.block_size,
            independent_blocks: settings.independent_blocks,
            block_checksums: settings.block_checksums,
            content_checksum: settings.content_checksum,
            content_size: settings.content_size,
            dictionary_id: settings.dictionary_id,
        };
        self.auto_flush = settings.auto_flush;
        self.block_maxsize = block_maxsize;
        self.content_hasher = if settings.content_checksum { Some(checksum::content_hasher()) } else { None };
        self.consumed = 0;
        self.stream = Some(stream);
        self.stage = Stage::Started;

        self.info.write_header(output)?;
        debug!(
            block_size = block_maxsize,
            independent = self.info.independent_blocks,
            level = settings.compression_level,
            content_size = ?self.info.content_size,
            "frame header written"
        );
    }

    #[throws]
    fn update_into(&mut self, data: &[u8], output: &mut Vec<u8>) {
        self.check_started()?;
        if let Some(hasher) = self.content_hasher.as_mut() {
            hasher.write(data);
        }
        self.consumed += data.len() as u64;

        let mut data = data;
        if !self.pending.is_empty() {
            let take = cmp::min(self.block_maxsize - self.pending.len(), data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == self.block_maxsize {
                self.flush_pending(output)?;
            }
        }

        // full blocks go straight from the caller's buffer
        while data.len() >= self.block_maxsize {
            let (block, rest) = data.split_at(self.block_maxsize);
            self.write_block(block, output)?;
            data = rest;
        }
        self.pending.extend_from_slice(data);

        if self.auto_flush {
            self.flush_pending(output)?;
        }
    }

    #[throws]
    fn end_into(&mut self, output: &mut Vec<u8>) {
        self.check_started()?;
        if let Some(size) = self.info.known_content_size() {
            if size != self.consumed {
                throw!(Error::UsageError("the amount of data fed differs from the declared content size"));
            }
        }

        self.flush_pending(output)?;
        output.write_u32::<LE>(0)?;
        if let Some(hasher) = self.content_hasher.take() {
            output.write_u32::<LE>(hasher.finish() as u32)?;
        }

        self.stage = Stage::Ended;
        self.stream = None;
        debug!(content = self.consumed, "frame ended");
    }

    #[throws]
    fn check_started(&self) {
        match self.stage {
            Stage::Started => {}
            Stage::Idle => throw!(Error::UsageError("no frame in progress, call begin first")),
            Stage::Ended => throw!(Error::UsageError("the frame has already ended")),
        }
    }

    #[throws]
    fn flush_pending(&mut self, output: &mut Vec<u8>) {
        if self.pending.is_empty() {
            return;
        }
        let block = mem::take(&mut self.pending);
        let result = self.write_block(&block, output);
        self.pending = block;
        self.pending.clear();
        result?;
    }

    /// Compress one block and append its record to `output`.
    #[throws]
    fn write_block(&mut self, block: &[u8], output: &mut Vec<u8>) {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => throw!(Error::UsageError("no frame in progress, call begin first")),
        };
        if self.info.independent_blocks {
            stream.reset();
        }
        error::reserve(output, 8 + block.len())?;

        // limit output by input size so we never have negative compression ratio
        let payload: &[u8] = match stream.compress_block_into(block, &mut self.out_buffer[..block.len()]) {
            Ok(written_len) => {
                trace!(len = block.len(), compressed = written_len, "block");
                output.write_u32::<LE>(written_len as u32)?;
                &self.out_buffer[..written_len]
            }
            Err(Error::BufferTooSmall { .. }) => {
                trace!(len = block.len(), "block stored uncompressed");
                output.write_u32::<LE>(block.len() as u32 | INCOMPRESSIBLE)?;
                block
            }
            Err(e) => throw!(e),
        };

        output.extend_from_slice(payload);
        if self.info.block_checksums {
            output.write_u32::<LE>(checksum::checksum(payload))?;
        }
    }
}

/// Upper bound for the size of [`compress_frame`]'s output for `len` bytes of input.
pub fn compress_frame_bound(len: usize, settings: &CompressionSettings) -> usize {
    let blocks = len / settings.block_size.get() + 1;
    let per_block = if settings.block_checksums { 8 } else { 4 };
    MAX_HEADER_SIZE
        .saturating_add(len)
        .saturating_add(blocks.saturating_mul(per_block))
        .saturating_add(8)
}

/// Compress `data` as one complete frame.
#[throws]
pub fn compress_frame(data: &[u8], settings: &CompressionSettings) -> Vec<u8> {
    let mut output = Vec::new();
    error::reserve(&mut output, compress_frame_bound(data.len(), settings))?;
    let mut encoder = FrameEncoder::new();
    encoder.begin_into(settings, &mut output)?;
    encoder.update_into(data, &mut output)?;
    encoder.end_into(&mut output)?;
    output
}

/// A skippable frame wrapping `data`. Decoders pass over it without looking inside.
///
/// `magic_nibble` picks one of the 16 skippable magic numbers.
#[throws]
pub fn write_skippable_frame(magic_nibble: u8, data: &[u8]) -> Vec<u8> {
    if magic_nibble > 0xf {
        throw!(Error::InvalidArgument("skippable magic nibble must be below 16"));
    }
    let len = u32::try_from(data.len())
        .map_err(|_| Error::InvalidArgument("skippable frame data exceeds 4 GiB"))?;

    let mut output = Vec::new();
    error::reserve(&mut output, 8 + data.len())?;
    output.write_u32::<LE>(SKIPPABLE_MAGIC_MIN | magic_nibble as u32)?;
    output.write_u32::<LE>(len)?;
    output.extend_from_slice(data);
    output
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::ByteOrder;

    fn noise(len: usize) -> Vec<u8> {
        let mut x: u32 = 0x9E37_79B9;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                (x >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn levels() {
        assert_eq!(level_to_mode(-7), Mode::Fast(7));
        assert_eq!(level_to_mode(0), Mode::Default);
        assert_eq!(level_to_mode(2), Mode::Default);
        assert_eq!(level_to_mode(3), Mode::High(3));
        assert_eq!(level_to_mode(42), Mode::High(12));
    }

    #[test]
    fn empty_frame_with_auto_flush() {
        let mut settings = CompressionSettings::default();
        settings.auto_flush(true);
        let mut encoder = FrameEncoder::new();
        let mut frame = encoder.begin(&settings).unwrap();
        assert_eq!(frame.len(), 7);
        assert!(encoder.update(b"").unwrap().is_empty());
        frame.extend(encoder.end().unwrap());

        assert_eq!(frame.len(), 7 + 4 + 4);
        assert_eq!(LE::read_u32(&frame[7..]), 0);
        assert_eq!(LE::read_u32(&frame[11..]), checksum::checksum(b""));
    }

    #[test]
    fn buffering_and_auto_flush() {
        let mut encoder = FrameEncoder::new();
        encoder.begin(&CompressionSettings::default()).unwrap();
        assert!(encoder.update(b"small").unwrap().is_empty());
        assert!(!encoder.flush().unwrap().is_empty());
        assert!(encoder.flush().unwrap().is_empty());

        let mut settings = CompressionSettings::default();
        settings.auto_flush(true);
        let mut encoder = FrameEncoder::new();
        encoder.begin(&settings).unwrap();
        assert!(!encoder.update(b"small").unwrap().is_empty());
    }

    #[test]
    fn full_blocks_are_emitted_immediately() {
        let mut encoder = FrameEncoder::new();
        encoder.begin(&CompressionSettings::default()).unwrap();
        assert!(encoder.update(&vec![7u8; 64 * 1024 - 1]).unwrap().is_empty());
        assert!(!encoder.update(&[7u8]).unwrap().is_empty());
    }

    #[test]
    fn incompressible_blocks_are_stored() {
        let data = noise(1000);
        let mut settings = CompressionSettings::default();
        settings.content_checksum(false).block_checksums(true);
        let frame = compress_frame(&data, &settings).unwrap();

        let record = LE::read_u32(&frame[7..]);
        assert_eq!(record, 1000 | INCOMPRESSIBLE);
        assert_eq!(&frame[11..1011], &data[..]);
        assert_eq!(LE::read_u32(&frame[1011..]), checksum::checksum(&data));
        assert_eq!(LE::read_u32(&frame[1015..]), 0);
        assert_eq!(frame.len(), 1019);
        assert!(frame.len() <= compress_frame_bound(data.len(), &settings));
    }

    #[test]
    fn state_machine_misuse() {
        let mut encoder = FrameEncoder::new();
        assert!(matches!(encoder.update(b"x"), Err(Error::UsageError(_))));
        assert!(matches!(encoder.end(), Err(Error::UsageError(_))));

        let settings = CompressionSettings::default();
        encoder.begin(&settings).unwrap();
        assert!(matches!(encoder.begin(&settings), Err(Error::UsageError(_))));
        encoder.end().unwrap();
        assert!(matches!(encoder.update(b"x"), Err(Error::UsageError(_))));
        assert!(matches!(encoder.flush(), Err(Error::UsageError(_))));

        // a new frame may follow
        encoder.begin(&settings).unwrap();
        assert!(encoder.is_started());
    }

    #[test]
    fn declared_size_must_match() {
        let mut settings = CompressionSettings::default();
        settings.content_size(Some(10));
        let mut encoder = FrameEncoder::new();
        encoder.begin(&settings).unwrap();
        encoder.update(b"only nine").unwrap();
        assert!(matches!(encoder.end(), Err(Error::UsageError(_))));
        encoder.update(b"!").unwrap();
        encoder.end().unwrap();
    }

    #[test]
    fn dictionary_id_can_be_left_out() {
        let dict = b"shared dictionary contents, ".repeat(8);
        let data = b"dictionary contents shared ".repeat(8);
        let mut settings = CompressionSettings::default();
        settings.dictionary(9, &dict).dictionary_id_nonsense_override(None);
        let frame = compress_frame(&data, &settings).unwrap();

        let (info, len) = FrameInfo::parse(&frame).unwrap();
        assert_eq!(info.dictionary_id, None);
        assert_eq!(len, 7);

        let mut decoder = crate::framed::FrameDecoder::new();
        decoder.set_dictionary(&dict);
        assert_eq!(decoder.decompress(&frame).unwrap().0, data);
    }

    #[test]
    fn skippable_frame_layout() {
        let frame = write_skippable_frame(3, b"user data").unwrap();
        assert_eq!(LE::read_u32(&frame), 0x184D2A53);
        assert_eq!(LE::read_u32(&frame[4..]), 9);
        assert_eq!(&frame[8..], b"user data");
        assert!(matches!(write_skippable_frame(16, b""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn reader_to_writer() {
        let data = b"read from an io::Read, written to an io::Write. ".repeat(3000);
        let mut via_io = Vec::new();
        CompressionSettings::default().compress(&data[..], &mut via_io).unwrap();
        assert_eq!(via_io, compress_frame(&data, &CompressionSettings::default()).unwrap());

        let mut sized = Vec::new();
        CompressionSettings::default().compress_with_size(io::Cursor::new(&data[..]), &mut sized).unwrap();
        let (info, _) = FrameInfo::parse(&sized).unwrap();
        assert_eq!(info.content_size, Some(data.len() as u64));
    }
}
