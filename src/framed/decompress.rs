use byteorder::{ByteOrder, LE};
use std::cmp;
use std::hash::Hasher;
use std::io::{self, BufRead, ErrorKind, Read};
use fehler::{throw, throws};
use tracing::{debug, trace, warn};

use super::INCOMPRESSIBLE;
use super::header::{self, FrameInfo, FrameType};
use crate::checksum::{self, ContentHasher};
use crate::error::{self, Corruption, Error};
use crate::raw::{self, WINDOW_SIZE};
use crate::stream::extend_window;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Header,
    BlockLength,
    Block { compressed: bool, len: usize },
    ContentChecksum,
    Skip { remaining: u64 },
    Complete,
}

/// Push-style frame decompressor.
///
/// Feed it the frame in pieces of any size; each call to [`decompress`](Self::decompress) returns whatever
/// could be decoded so far. Incomplete block records are buffered internally until the rest arrives.
///
/// By default the decoder expects exactly one frame: bytes following the end of the frame are reported as
/// corruption. With [`stop_at_frame_end`](Self::stop_at_frame_end) it instead stops consuming there, leaving
/// the caller to [`reset`](Self::reset) it for the next frame.
pub struct FrameDecoder {
    stage: Stage,
    info: Option<FrameInfo>,
    block_maxsize: usize,
    /// The partial header, block length, block record or checksum being collected.
    pending: Vec<u8>,
    /// Bytes of the current frame consumed so far, used to report error offsets.
    position: usize,
    window: Vec<u8>,
    dictionary: Vec<u8>,
    block_buf: Vec<u8>,
    content_hasher: Option<ContentHasher>,
    decoded: u64,
    verify_content_checksum: bool,
    stop_at_frame_end: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            stage: Stage::Header,
            info: None,
            block_maxsize: 0,
            pending: Vec::new(),
            position: 0,
            window: Vec::new(),
            dictionary: Vec::new(),
            block_buf: Vec::new(),
            content_hasher: None,
            decoded: 0,
            verify_content_checksum: true,
            stop_at_frame_end: false,
        }
    }

    /// Check the content checksum at the end of the frame, if it has one.
    ///
    /// Enabled by default. Block checksums are always verified.
    pub fn verify_content_checksum(&mut self, v: bool) -> &mut Self {
        self.verify_content_checksum = v;
        self
    }

    /// Stop consuming input at the end of the frame instead of rejecting what follows.
    ///
    /// Disabled by default.
    pub fn stop_at_frame_end(&mut self, v: bool) -> &mut Self {
        self.stop_at_frame_end = v;
        self
    }

    /// The dictionary the frames were compressed with. Only its last 64 KiB are kept.
    ///
    /// Takes effect with the next frame.
    pub fn set_dictionary(&mut self, dict: &[u8]) -> &mut Self {
        self.dictionary.clear();
        self.dictionary.extend_from_slice(raw::dictionary_window(dict));
        self
    }

    /// The header of the current frame, once it has been parsed.
    pub fn frame_info(&self) -> Option<&FrameInfo> {
        self.info.as_ref()
    }

    /// Whether the end of the current frame has been reached.
    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Complete
    }

    /// Forget the current frame and get ready for the next one. Options and dictionary are kept.
    pub fn reset(&mut self) {
        self.stage = Stage::Header;
        self.info = None;
        self.block_maxsize = 0;
        self.pending.clear();
        self.position = 0;
        self.window.clear();
        self.content_hasher = None;
        self.decoded = 0;
    }

    /// How many more input bytes the decoder needs before it can make progress.
    ///
    /// Feeding no more than this never consumes bytes past the end of the frame.
    pub fn input_hint(&self) -> usize {
        match self.stage {
            Stage::Complete => 0,
            Stage::Skip { remaining } => cmp::min(remaining, usize::MAX as u64) as usize,
            _ => self.required_len().unwrap_or(1).saturating_sub(self.pending.len()),
        }
    }

    /// Parse the frame header at the start of `data`, returning it and its length.
    ///
    /// The caller continues with [`decompress`](Self::decompress) on the bytes after the header.
    /// If the header is already known, it is returned again and nothing is consumed.
    #[throws]
    pub fn get_frame_info(&mut self, data: &[u8]) -> (FrameInfo, usize) {
        if let Some(info) = &self.info {
            return (info.clone(), 0);
        }
        if !self.pending.is_empty() {
            throw!(Error::UsageError("part of the header was already fed to decompress"));
        }

        let (info, len) = FrameInfo::parse(data)?;
        self.position = len;
        self.start_frame(info.clone());
        (info, len)
    }

    /// Decode as much of `data` as possible.
    ///
    /// Returns the decompressed bytes that became available and how many bytes of `data` were consumed.
    /// All of `data` is consumed unless the frame ends within it.
    #[throws]
    pub fn decompress(&mut self, data: &[u8]) -> (Vec<u8>, usize) {
        let mut output = Vec::new();
        let mut consumed = 0;
        loop {
            match self.stage {
                Stage::Complete => {
                    if consumed < data.len() && !self.stop_at_frame_end {
                        throw!(Error::corrupt(self.position, Corruption::TrailingData));
                    }
                    break;
                }
                Stage::Skip { remaining } => {
                    let take = cmp::min(remaining, (data.len() - consumed) as u64);
                    consumed += take as usize;
                    self.position += take as usize;
                    if take == remaining {
                        self.stage = Stage::Complete;
                        debug!(len = self.position, "skippable frame skipped");
                        continue;
                    }
                    self.stage = Stage::Skip { remaining: remaining - take };
                    break;
                }
                _ => {}
            }

            let need = self.required_len()?;
            if self.pending.len() < need {
                let available = data.len() - consumed;
                if available == 0 {
                    break;
                }
                let take = cmp::min(need - self.pending.len(), available);
                error::reserve(&mut self.pending, take)?;
                self.pending.extend_from_slice(&data[consumed..consumed + take]);
                consumed += take;
                self.position += take;
                continue;
            }

            self.advance(&mut output)?;
        }
        (output, consumed)
    }

    fn block_checksums(&self) -> bool {
        self.info.as_ref().map_or(false, |info| info.block_checksums)
    }

    fn independent_blocks(&self) -> bool {
        self.info.as_ref().map_or(false, |info| info.independent_blocks)
    }

    fn content_checksum(&self) -> bool {
        self.info.as_ref().map_or(false, |info| info.content_checksum)
    }

    /// Bytes `pending` has to hold before the current stage can be processed.
    #[throws]
    fn required_len(&self) -> usize {
        match self.stage {
            Stage::Header => header::required_len(&self.pending)?,
            Stage::BlockLength | Stage::ContentChecksum => 4,
            Stage::Block { len, .. } if self.block_checksums() => len + 4,
            Stage::Block { len, .. } => len,
            Stage::Skip { .. } | Stage::Complete => 0,
        }
    }

    fn start_frame(&mut self, info: FrameInfo) {
        debug!(?info, "frame header parsed");
        match info.frame_type {
            FrameType::Skippable(_) => {
                self.stage = Stage::Skip { remaining: info.content_size.unwrap_or(0) };
            }
            FrameType::Frame => {
                self.block_maxsize = info.block_size.get();
                self.content_hasher = if info.content_checksum && self.verify_content_checksum {
                    Some(checksum::content_hasher())
                } else {
                    None
                };
                self.window.clear();
                if !info.independent_blocks {
                    self.window.reserve(WINDOW_SIZE);
                    self.window.extend_from_slice(&self.dictionary);
                }
                self.decoded = 0;
                self.stage = Stage::BlockLength;
            }
        }
        self.info = Some(info);
    }

    /// Process the complete record in `pending`.
    #[throws]
    fn advance(&mut self, output: &mut Vec<u8>) {
        let start = self.position - self.pending.len();
        match self.stage {
            Stage::Header => {
                let (info, _) = FrameInfo::parse(&self.pending)?;
                self.pending.clear();
                self.start_frame(info);
            }
            Stage::BlockLength => {
                let length = LE::read_u32(&self.pending);
                self.pending.clear();
                if length == 0 {
                    if self.content_checksum() {
                        self.stage = Stage::ContentChecksum;
                    } else {
                        self.finish()?;
                    }
                    return;
                }

                let compressed = length & INCOMPRESSIBLE == 0;
                let len = (length & !INCOMPRESSIBLE) as usize;
                if len > self.block_maxsize {
                    throw!(Error::corrupt(start, Corruption::BlockTooLarge));
                }
                self.stage = Stage::Block { compressed, len };
            }
            Stage::Block { compressed, len } => {
                self.decode_block(compressed, len, start, output)?;
                self.pending.clear();
                self.stage = Stage::BlockLength;
            }
            Stage::ContentChecksum => {
                let expected = LE::read_u32(&self.pending);
                self.pending.clear();
                if let Some(hasher) = self.content_hasher.take() {
                    let actual = hasher.finish() as u32;
                    if actual != expected {
                        warn!(expected, actual, "content checksum mismatch");
                        throw!(Error::corrupt(start, Corruption::ContentChecksum));
                    }
                }
                self.finish()?;
            }
            Stage::Skip { .. } | Stage::Complete => {}
        }
    }

    /// Decode the block record in `pending`, which starts at frame offset `start`.
    #[throws]
    fn decode_block(&mut self, compressed: bool, len: usize, start: usize, output: &mut Vec<u8>) {
        let independent = self.independent_blocks();
        let payload = &self.pending[..len];
        if self.block_checksums() {
            let expected = LE::read_u32(&self.pending[len..]);
            let actual = checksum::checksum(payload);
            if actual != expected {
                warn!(expected, actual, offset = start, "block checksum mismatch");
                throw!(Error::corrupt(start + len, Corruption::BlockChecksum));
            }
        }

        let block: &[u8] = if compressed {
            let prefix: &[u8] = if independent { &self.dictionary } else { &self.window };
            self.block_buf.clear();
            raw::decompress_block(payload, prefix, &mut self.block_buf, self.block_maxsize)
                .map_err(|e| e.shifted(start))?;
            &self.block_buf
        } else {
            payload
        };
        trace!(len = block.len(), compressed = len, stored = !compressed, "block");

        error::reserve(output, block.len())?;
        output.extend_from_slice(block);
        if let Some(hasher) = self.content_hasher.as_mut() {
            hasher.write(block);
        }
        self.decoded += block.len() as u64;
        if !independent {
            extend_window(&mut self.window, block);
        }
    }

    #[throws]
    fn finish(&mut self) {
        let declared = self.info.as_ref().and_then(|info| info.known_content_size());
        if let Some(size) = declared {
            if size != self.decoded {
                throw!(Error::corrupt(self.position, Corruption::ContentSizeMismatch));
            }
        }
        self.stage = Stage::Complete;
        debug!(decoded = self.decoded, "frame complete");
    }
}

/// Decompress `data`, which must hold exactly one frame.
#[throws]
pub fn decompress_frame(data: &[u8]) -> Vec<u8> {
    let mut decoder = FrameDecoder::new();
    let (output, _) = decoder.decompress(data)?;
    if !decoder.is_complete() {
        throw!(Error::corrupt(data.len(), Corruption::Truncated));
    }
    output
}

/// Decompress any number of concatenated frames, skippable ones included.
#[throws]
pub fn decompress_frames(data: &[u8]) -> Vec<u8> {
    let mut decoder = FrameDecoder::new();
    decoder.stop_at_frame_end(true);

    let mut output = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        decoder.reset();
        let (frame, consumed) = decoder.decompress(&data[offset..]).map_err(|e| e.shifted(offset))?;
        if !decoder.is_complete() {
            throw!(Error::corrupt(data.len(), Corruption::Truncated));
        }
        error::reserve(&mut output, frame.len())?;
        output.extend_from_slice(&frame);
        offset += consumed;
    }
    output
}

/// Reads one LZ4 frame from the wrapped reader and implements `Read` and `BufRead` on the decompressed data.
///
/// Never reads past the end of the frame, so whatever follows stays in the wrapped reader.
pub struct FrameReader<R: Read> {
    reader: R,
    decoder: FrameDecoder,
    input: Vec<u8>,
    bytes_taken: usize,
    buffer: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_decoder(reader, FrameDecoder::new())
    }

    /// Use a preconfigured decoder, e.g. one with a dictionary.
    pub fn with_decoder(reader: R, mut decoder: FrameDecoder) -> Self {
        decoder.reset();
        FrameReader {
            reader,
            decoder,
            input: Vec::new(),
            bytes_taken: 0,
            buffer: Vec::new(),
        }
    }

    /// Read up to the end of the frame header and return it.
    #[throws(io::Error)]
    pub fn frame_info(&mut self) -> &FrameInfo {
        while self.decoder.frame_info().is_none() {
            self.pull()?;
        }
        self.decoder.frame_info().ok_or_else(|| io::Error::from(ErrorKind::UnexpectedEof))?
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next piece of the frame and decode it into `buffer`.
    #[throws(io::Error)]
    fn pull(&mut self) {
        let hint = cmp::max(cmp::min(self.decoder.input_hint(), WINDOW_SIZE), 1);
        self.input.resize(hint, 0);
        let n = self.reader.read(&mut self.input)?;
        if n == 0 {
            throw!(io::Error::new(ErrorKind::UnexpectedEof, "the frame ended prematurely"));
        }
        let (decoded, _) = self.decoder.decompress(&self.input[..n])?;
        self.buffer.extend_from_slice(&decoded);
    }
}

impl<R: Read> Read for FrameReader<R> {
    #[throws(io::Error)]
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mybuf = self.fill_buf()?;
        let bytes_to_take = cmp::min(mybuf.len(), buf.len());
        buf[..bytes_to_take].copy_from_slice(&mybuf[..bytes_to_take]);
        self.consume(bytes_to_take);
        bytes_to_take
    }
}

impl<R: Read> BufRead for FrameReader<R> {
    #[throws(io::Error)]
    fn fill_buf(&mut self) -> &[u8] {
        while self.bytes_taken == self.buffer.len() && !self.decoder.is_complete() {
            self.buffer.clear();
            self.bytes_taken = 0;
            self.pull()?;
        }
        &self.buffer[self.bytes_taken..]
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_taken = cmp::min(self.bytes_taken + amt, self.buffer.len());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::framed::{compress_frame, write_skippable_frame, CompressionSettings};

    fn text(len: usize) -> Vec<u8> {
        b"Frames hold blocks, blocks hold sequences, sequences hold literals and matches. "
            .iter()
            .cycle()
            .take(len)
            .copied()
            .collect()
    }

    #[test]
    fn byte_by_byte() {
        let data = text(200_000);
        let mut settings = CompressionSettings::default();
        settings.independent_blocks(false).block_checksums(true).content_size(Some(data.len() as u64));
        let frame = compress_frame(&data, &settings).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut restored = Vec::new();
        for byte in frame.chunks(1) {
            let (out, consumed) = decoder.decompress(byte).unwrap();
            assert_eq!(consumed, 1);
            restored.extend(out);
        }
        assert!(decoder.is_complete());
        assert_eq!(restored, data);
    }

    #[test]
    fn header_first() {
        let data = text(1000);
        let frame = compress_frame(&data, &CompressionSettings::default()).unwrap();
        let mut decoder = FrameDecoder::new();
        let (info, len) = decoder.get_frame_info(&frame).unwrap();
        assert_eq!(len, 7);
        assert!(info.independent_blocks);
        assert!(info.content_checksum);
        assert_eq!(decoder.get_frame_info(&frame[len..]).unwrap(), (info, 0));
        assert_eq!(decoder.decompress(&frame[len..]).unwrap(), (data, frame.len() - len));
    }

    #[test]
    fn trailing_data() {
        let mut frame = compress_frame(b"payload", &CompressionSettings::default()).unwrap();
        let frame_len = frame.len();
        frame.extend_from_slice(b"junk");

        match decompress_frame(&frame) {
            Err(Error::CorruptInput { offset, reason: Corruption::TrailingData }) => assert_eq!(offset, frame_len),
            other => panic!("unexpected {:?}", other),
        }

        let mut decoder = FrameDecoder::new();
        decoder.stop_at_frame_end(true);
        assert_eq!(decoder.decompress(&frame).unwrap(), (b"payload".to_vec(), frame_len));
        assert_eq!(decoder.decompress(b"more").unwrap(), (Vec::new(), 0));
    }

    #[test]
    fn truncated() {
        let frame = compress_frame(&text(5000), &CompressionSettings::default()).unwrap();
        assert_eq!(
            decompress_frame(&frame[..frame.len() - 1]).unwrap_err().corruption(),
            Some(Corruption::Truncated)
        );
    }

    #[test]
    fn content_checksum() {
        let mut frame = compress_frame(&text(5000), &CompressionSettings::default()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x40;
        assert_eq!(decompress_frame(&frame).unwrap_err().corruption(), Some(Corruption::ContentChecksum));

        let mut decoder = FrameDecoder::new();
        decoder.verify_content_checksum(false);
        let (out, _) = decoder.decompress(&frame).unwrap();
        assert!(decoder.is_complete());
        assert_eq!(out, text(5000));
    }

    #[test]
    fn block_checksum() {
        let mut settings = CompressionSettings::default();
        settings.block_checksums(true).content_checksum(false);
        let mut frame = compress_frame(&text(5000), &settings).unwrap();
        // flip a bit in the last byte of the block payload
        let payload_end = frame.len() - 4 - 4 - 1;
        frame[payload_end] ^= 1;
        match decompress_frame(&frame) {
            Err(Error::CorruptInput { offset, reason: Corruption::BlockChecksum }) => {
                assert_eq!(offset, payload_end + 1)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn oversized_block() {
        let mut frame = compress_frame(b"", &CompressionSettings::default()).unwrap();
        // replace the end marker with a record claiming 64KiB + 1 bytes
        frame.truncate(7);
        frame.extend_from_slice(&(64 * 1024 + 1u32).to_le_bytes());
        assert_eq!(
            decompress_frame(&frame).unwrap_err().corruption(),
            Some(Corruption::BlockTooLarge)
        );
    }

    #[test]
    fn content_size_mismatch() {
        let data = text(100);
        let mut settings = CompressionSettings::default();
        settings.content_size(Some(100)).content_checksum(false);
        let mut frame = compress_frame(&data, &settings).unwrap();
        // declare 101 bytes and fix up the header checksum
        frame[6] = 101;
        frame[14] = crate::checksum::header_checksum(&frame[4..14]);
        assert_eq!(
            decompress_frame(&frame).unwrap_err().corruption(),
            Some(Corruption::ContentSizeMismatch)
        );
    }

    #[test]
    fn skippable_frames_in_between() {
        let mut data = write_skippable_frame(0, b"metadata").unwrap();
        data.extend(compress_frame(b"first ", &CompressionSettings::default()).unwrap());
        data.extend(write_skippable_frame(15, b"").unwrap());
        data.extend(compress_frame(b"second", &CompressionSettings::default()).unwrap());
        assert_eq!(decompress_frames(&data).unwrap(), b"first second");

        let mut decoder = FrameDecoder::new();
        let (info, len) = decoder.get_frame_info(&data).unwrap();
        assert_eq!(info.frame_type, FrameType::Skippable(0));
        assert_eq!(len, 8);
    }

    #[test]
    fn dictionary() {
        let dict = text(3000);
        let data = text(2000);
        let mut settings = CompressionSettings::default();
        settings.dictionary(7, &dict);
        let frame = compress_frame(&data, &settings).unwrap();

        assert!(decompress_frame(&frame).is_err());
        let mut decoder = FrameDecoder::new();
        decoder.set_dictionary(&dict);
        let (out, _) = decoder.decompress(&frame).unwrap();
        assert_eq!(out, data);
        assert_eq!(decoder.frame_info().and_then(|info| info.dictionary_id), Some(7));
    }

    #[test]
    fn reader_stops_at_frame_end() {
        let data = text(300_000);
        let mut stream = compress_frame(&data, &CompressionSettings::default()).unwrap();
        stream.extend_from_slice(b"next");

        let mut reader = FrameReader::new(&stream[..]);
        assert_eq!(reader.frame_info().unwrap().block_size.get(), 64 * 1024);
        let mut restored = Vec::new();
        reader.read_to_end(&mut restored).unwrap();
        assert_eq!(restored, data);
        assert_eq!(reader.into_inner(), b"next");

        let mut short = FrameReader::new(&stream[..100]);
        assert_eq!(short.read_to_end(&mut Vec::new()).unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }
}
