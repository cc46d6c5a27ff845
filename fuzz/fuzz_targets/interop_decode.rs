#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_codec::framed::{decompress_frame, FrameReader};
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    if let Ok(compressed) = reference_compress(data) {
        let decompressed = decompress_frame(&compressed).expect("Failed to decompress data compressed by C implementation");
        assert!(data == decompressed.as_slice(), "Decompression result did not match the original input");

        let mut streamed = Vec::new();
        FrameReader::new(Cursor::new(compressed)).read_to_end(&mut streamed).expect("Frame reader failed");
        assert!(data == streamed.as_slice());
    }
});

// compress data using the reference lz4 implementation
fn reference_compress(data: &[u8]) -> Result<Vec<u8>, ()> {
    let mut input = Cursor::new(data);
    let output = Cursor::new(Vec::new());
    let mut encoder = lz4::EncoderBuilder::new().level(4).build(output).map_err(|_| ())?;
    std::io::copy(&mut input, &mut encoder).map_err(|_| ())?;
    let (output, result) = encoder.finish();
    result.map(|()| output.into_inner()).map_err(|_| ())
}
