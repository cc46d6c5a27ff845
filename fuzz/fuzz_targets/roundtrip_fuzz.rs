#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_codec::framed::{CompressionSettings, FrameReader};
use lz4_codec::raw;
use lz4_codec::Mode;
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    let mut output = Vec::new();
    CompressionSettings::default()
        .content_checksum(true)
        .independent_blocks(data.len() % 2 == 0)
        .compression_level(data.first().map_or(0, |&b| b as i32 % 16 - 2))
        .compress(Cursor::new(data), &mut output)
        .expect("Could not compress input data");

    let mut roundtripped = Vec::new();
    FrameReader::new(Cursor::new(output)).read_to_end(&mut roundtripped).expect("Could not read decompressed data");
    assert!(roundtripped.iter().eq(data));

    for &mode in &[Mode::Default, Mode::Fast(5), Mode::High(9)] {
        let block = raw::compress(data, mode).expect("Could not compress block");
        assert_eq!(raw::decompress(&block, data.len()).expect("Could not decompress block"), data);
    }
});
