//! Block streaming: compress a sequence of chunks as a sequence of blocks that may reference each other.
//!
//! Each chunk is compressed into one raw block whose matches may reach back into the previous 64KiB of
//! the stream. The decompressing side must therefore see exactly the same blocks, in exactly the same
//! order, as they were produced. Neither side can detect a desynchronized history except indirectly,
//! when a match offset points outside the window.
//!
//! Both contexts own their history; callers may drop or reuse their chunk buffers as soon as a call returns.
//! A context is a plain single-owner value: share it between threads only behind your own lock.

use std::io;
use byteorder::{ByteOrder, LE};
use fehler::{throw, throws};
use tracing::trace;

use crate::error::{self, Error};
use crate::raw::{self, hc::HcTables, EncoderTable, Mode, SliceSink, U32Table, MAX_INPUT_SIZE, WINDOW_SIZE};

/// Chunk size used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Width of the little-endian compressed-size field written in front of each block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LengthPrefix {
    None,
    U8,
    U16,
    U32,
}

impl LengthPrefix {
    pub fn width(self) -> usize {
        match self {
            LengthPrefix::None => 0,
            LengthPrefix::U8 => 1,
            LengthPrefix::U16 => 2,
            LengthPrefix::U32 => 4,
        }
    }

    fn max_len(self) -> usize {
        match self {
            LengthPrefix::None => usize::MAX,
            LengthPrefix::U8 => u8::MAX as usize,
            LengthPrefix::U16 => u16::MAX as usize,
            LengthPrefix::U32 => u32::MAX as usize,
        }
    }
}

/// A builder-style struct that configures both stream contexts.
/// The compressing and decompressing side should agree on all of it.
///
/// Create it using `Default::default()`.
#[derive(Clone, Debug)]
pub struct StreamSettings {
    buffer_size: usize,
    mode: Mode,
    length_prefix: LengthPrefix,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            buffer_size: DEFAULT_BUFFER_SIZE,
            mode: Mode::Default,
            length_prefix: LengthPrefix::None,
        }
    }
}

impl StreamSettings {
    /// The largest chunk a single call may compress, or decompress to.
    ///
    /// 64KiB by default.
    pub fn buffer_size(&mut self, v: usize) -> &mut Self {
        self.buffer_size = v;
        self
    }

    /// Compression mode, ignored by the decompressing side.
    pub fn mode(&mut self, v: Mode) -> &mut Self {
        self.mode = v;
        self
    }

    /// Prefix every block with its compressed size.
    ///
    /// Disabled by default, in which case the caller has to keep track of block boundaries.
    pub fn length_prefix(&mut self, v: LengthPrefix) -> &mut Self {
        self.length_prefix = v;
        self
    }

    #[throws]
    fn validate(&self) {
        if self.buffer_size == 0 {
            throw!(Error::InvalidArgument("buffer size must not be zero"));
        }
        if self.buffer_size > MAX_INPUT_SIZE {
            throw!(Error::InvalidArgument("buffer size exceeds the maximum block input size"));
        }
    }
}

enum Engine {
    Table(Box<U32Table>),
    High(Box<HcTables>, i32),
}

/// Compression side of a block stream.
pub struct CompressStream {
    settings: StreamSettings,
    /// The retained window, followed by the chunk being compressed while a call is running.
    history: Vec<u8>,
    dictionary: Vec<u8>,
    engine: Engine,
}

impl CompressStream {
    /// A stream compressing chunks of up to `buffer_size` bytes with the default compressor.
    #[throws]
    pub fn new(buffer_size: usize) -> Self {
        Self::with_settings(StreamSettings::default().buffer_size(buffer_size))?
    }

    #[throws]
    pub fn with_settings(settings: &StreamSettings) -> Self {
        settings.validate()?;
        let engine = match settings.mode {
            Mode::High(level) => Engine::High(Box::new(HcTables::new()), level),
            _ => Engine::Table(Box::new(U32Table::default())),
        };
        let mut history = Vec::new();
        error::reserve(&mut history, WINDOW_SIZE + settings.buffer_size)?;

        CompressStream {
            settings: settings.clone(),
            history,
            dictionary: Vec::new(),
            engine,
        }
    }

    /// Start over from `dict` as history. Only its last 64KiB are kept.
    pub fn set_dictionary(&mut self, dict: &[u8]) {
        self.dictionary.clear();
        self.dictionary.extend_from_slice(raw::dictionary_window(dict));
        self.reset();
    }

    /// Forget all history except the dictionary, if any.
    pub fn reset(&mut self) {
        self.history.clear();
        self.history.extend_from_slice(&self.dictionary);
        if let Engine::Table(table) = &mut self.engine {
            **table = U32Table::default();
            raw::prime_table(&mut **table, &self.history);
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Compress `chunk` as one block, referencing earlier chunks where possible.
    ///
    /// The output carries the configured length prefix. A block too large for its prefix fails with
    /// `BufferTooSmall` and leaves the stream as it was before the call.
    #[throws]
    pub fn compress_chunk(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.check_chunk(chunk.len())?;
        let prefix = self.settings.length_prefix;
        let width = prefix.width();
        let bound = raw::compress_bound(chunk.len()).unwrap_or(usize::MAX);
        let mut output = Vec::new();
        error::reserve(&mut output, width + bound)?;
        output.resize(width + bound, 0);

        let snapshot = if bound > prefix.max_len() { Some(self.snapshot()?) } else { None };
        let compressed_len = self.compress_block_into(chunk, &mut output[width..])?;
        if compressed_len > prefix.max_len() {
            if let Some(snapshot) = snapshot {
                self.restore(snapshot);
            }
            throw!(Error::BufferTooSmall { needed: compressed_len, available: prefix.max_len() });
        }
        output.truncate(width + compressed_len);

        match prefix {
            LengthPrefix::None => {}
            LengthPrefix::U8 => output[0] = compressed_len as u8,
            LengthPrefix::U16 => LE::write_u16(&mut output[..2], compressed_len as u16),
            LengthPrefix::U32 => LE::write_u32(&mut output[..4], compressed_len as u32),
        }
        output
    }

    /// Compress `chunk` as one raw block into `output`, returning the compressed length.
    ///
    /// The chunk becomes part of the history even if `output` is too small, so a caller that falls back to
    /// storing the chunk uncompressed stays in sync with the decoder.
    #[throws]
    pub(crate) fn compress_block_into(&mut self, chunk: &[u8], output: &mut [u8]) -> usize {
        self.check_chunk(chunk.len())?;

        let window_offset = self.history.len();
        error::reserve(&mut self.history, chunk.len())?;
        self.history.extend_from_slice(chunk);

        let available = output.len();
        let mut sink = SliceSink::new(output);
        let result = match &mut self.engine {
            Engine::Table(table) => raw::compress2(&self.history, window_offset, &mut **table, self.settings.mode.acceleration(), &mut sink),
            Engine::High(tables, level) => raw::hc::compress_hc(&self.history, window_offset, *level, tables, &mut sink),
        };
        trace!(chunk = chunk.len(), history = window_offset, "compressed stream chunk");

        self.slide();
        result.map_err(|e| write_error(e, chunk.len(), available))?;
        sink.written()
    }

    #[throws]
    fn check_chunk(&self, len: usize) {
        if len > self.settings.buffer_size {
            throw!(Error::ChunkTooLarge { len, limit: self.settings.buffer_size });
        }
    }

    #[throws]
    fn snapshot(&self) -> Snapshot {
        let mut history = Vec::new();
        error::reserve(&mut history, self.history.len())?;
        history.extend_from_slice(&self.history);
        let table = match &self.engine {
            Engine::Table(table) => Some(table.clone()),
            // the hash chains are rebuilt for every block
            Engine::High(..) => None,
        };
        Snapshot { history, table }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.history = snapshot.history;
        if let (Engine::Table(table), Some(saved)) = (&mut self.engine, snapshot.table) {
            *table = saved;
        }
    }

    fn slide(&mut self) {
        if self.history.len() > WINDOW_SIZE {
            let how_much_to_forget = self.history.len() - WINDOW_SIZE;
            if let Engine::Table(table) = &mut self.engine {
                table.offset(how_much_to_forget);
            }
            self.history.drain(..how_much_to_forget);
        }
    }
}

/// History and table state to roll back to when a block is rejected after compression.
struct Snapshot {
    history: Vec<u8>,
    table: Option<Box<U32Table>>,
}

/// Translate a failed write into the sink the compressor was given.
fn write_error(e: io::Error, input_len: usize, available: usize) -> Error {
    if e.kind() == io::ErrorKind::WriteZero {
        Error::BufferTooSmall { needed: raw::compress_bound(input_len).unwrap_or(usize::MAX), available }
    } else {
        Error::Io(e)
    }
}

/// Keep the last 64KiB of everything decompressed so far.
pub(crate) fn extend_window(window: &mut Vec<u8>, output: &[u8]) {
    let outlen = output.len();
    if outlen < WINDOW_SIZE {
        let available_bytes = window.len() + outlen;
        if let Some(surplus_bytes) = available_bytes.checked_sub(WINDOW_SIZE) {
            // remove as many bytes from front as we are replacing
            window.drain(..surplus_bytes);
        }
        window.extend_from_slice(output);
    } else {
        window.clear();
        window.extend_from_slice(&output[outlen - WINDOW_SIZE..]);
    }
    debug_assert!(window.len() <= WINDOW_SIZE);
}

/// Decompression side of a block stream.
pub struct DecompressStream {
    settings: StreamSettings,
    window: Vec<u8>,
    dictionary: Vec<u8>,
}

impl Default for DecompressStream {
    fn default() -> Self {
        Self::new()
    }
}

impl DecompressStream {
    pub fn new() -> Self {
        DecompressStream {
            settings: StreamSettings::default(),
            window: Vec::with_capacity(WINDOW_SIZE),
            dictionary: Vec::new(),
        }
    }

    #[throws]
    pub fn with_settings(settings: &StreamSettings) -> Self {
        settings.validate()?;
        DecompressStream { settings: settings.clone(), ..Self::new() }
    }

    /// Start over from `dict` as history. Only its last 64KiB are kept.
    pub fn set_dictionary(&mut self, dict: &[u8]) {
        self.dictionary.clear();
        self.dictionary.extend_from_slice(raw::dictionary_window(dict));
        self.reset();
    }

    /// Forget all history except the dictionary, if any.
    pub fn reset(&mut self) {
        self.window.clear();
        self.window.extend_from_slice(&self.dictionary);
    }

    /// Split one length-prefixed block off the front of `data`.
    ///
    /// Returns the block (without its prefix) and the number of bytes it occupied in `data`.
    #[throws]
    pub fn split_block<'a>(&self, data: &'a [u8]) -> (&'a [u8], usize) {
        use crate::error::Corruption;

        let width = self.settings.length_prefix.width();
        let len = match self.settings.length_prefix {
            LengthPrefix::None => throw!(Error::UsageError("stream is not configured with a length prefix")),
            _ if data.len() < width => throw!(Error::corrupt(data.len(), Corruption::Truncated)),
            LengthPrefix::U8 => data[0] as usize,
            LengthPrefix::U16 => LE::read_u16(data) as usize,
            LengthPrefix::U32 => LE::read_u32(data) as usize,
        };
        if data.len() - width < len {
            throw!(Error::corrupt(data.len(), Corruption::Truncated));
        }
        (&data[width..width + len], width + len)
    }

    /// Decompress one raw block (without length prefix) produced by [`CompressStream::compress_chunk`].
    ///
    /// The block must decompress to at most `expected_max_len` bytes, which may not exceed the buffer size.
    #[throws]
    pub fn decompress_chunk(&mut self, block: &[u8], expected_max_len: usize) -> Vec<u8> {
        if expected_max_len > self.settings.buffer_size {
            throw!(Error::ChunkTooLarge { len: expected_max_len, limit: self.settings.buffer_size });
        }
        let mut output = Vec::new();
        raw::decompress_block(block, &self.window, &mut output, expected_max_len)?;
        extend_window(&mut self.window, &output);
        output
    }
}
