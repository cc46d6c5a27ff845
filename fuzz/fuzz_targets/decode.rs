#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_codec::framed::{decompress_frames, FrameReader};
use lz4_codec::raw;
use std::io::Read;

fuzz_target!(|data: &[u8]| {
    // random bytes are expected to be rejected, never to panic
    let _ = decompress_frames(data);
    let _ = FrameReader::new(data).read_to_end(&mut Vec::new());
    let _ = raw::decompress(data, 1 << 16);
    let _ = raw::decompress_size_prepended(data);
});
