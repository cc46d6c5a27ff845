use lz4_codec::stream::{CompressStream, DecompressStream, LengthPrefix, StreamSettings};
use lz4_codec::Mode;
use proptest::prelude::*;

fn text(len: usize) -> Vec<u8> {
    (0..len as u32)
        .map(|i| if i % 53 < 40 { b"linked history "[(i % 15) as usize] } else { (i.wrapping_mul(7919) >> 3) as u8 })
        .collect()
}

/// Compress `data` chunk by chunk and decompress it with the same chunking.
fn through_stream(data: &[u8], sizes: &[usize], settings: &StreamSettings) -> Vec<u8> {
    let mut compressor = CompressStream::with_settings(settings).unwrap();
    let mut decompressor = DecompressStream::with_settings(settings).unwrap();
    let mut restored = Vec::new();
    let mut rest = data;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() {
        let n = sizes.next().copied().unwrap_or(rest.len()).min(rest.len());
        let block = compressor.compress_chunk(&rest[..n]).unwrap();
        restored.extend(decompressor.decompress_chunk(&block, n).unwrap());
        rest = &rest[n..];
    }
    restored
}

#[test]
fn every_mode() {
    let data = text(400_000);
    for &mode in &[Mode::Default, Mode::Fast(9), Mode::High(6)] {
        let mut settings = StreamSettings::default();
        settings.mode(mode);
        assert_eq!(through_stream(&data, &[65536, 1, 4000, 33333], &settings), data);
    }
}

#[test]
fn streaming_beats_independent_chunks() {
    // chunks that repeat each other but not themselves
    let mut x: u32 = 0x2545_F491;
    let noise: Vec<u8> = (0..1024)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x >> 24) as u8
        })
        .collect();
    let data = noise.repeat(16);

    let mut linked = CompressStream::new(noise.len()).unwrap();
    let linked_len: usize = data.chunks(noise.len()).map(|c| linked.compress_chunk(c).unwrap().len()).sum();
    let independent_len: usize = data
        .chunks(noise.len())
        .map(|c| lz4_codec::raw::compress(c, Mode::Default).unwrap().len())
        .sum();
    assert!(linked_len < independent_len / 4);
}

#[test]
fn records_split_back_apart() {
    let data = text(100_000);
    let mut settings = StreamSettings::default();
    settings.length_prefix(LengthPrefix::U32).buffer_size(10_000);

    let mut compressor = CompressStream::with_settings(&settings).unwrap();
    let mut records = Vec::new();
    for chunk in data.chunks(10_000) {
        records.extend(compressor.compress_chunk(chunk).unwrap());
    }

    let mut decompressor = DecompressStream::with_settings(&settings).unwrap();
    let mut restored = Vec::new();
    let mut rest = &records[..];
    while !rest.is_empty() {
        let (block, used) = decompressor.split_block(rest).unwrap();
        restored.extend(decompressor.decompress_chunk(block, 10_000).unwrap());
        rest = &rest[used..];
    }
    assert_eq!(restored, data);
}

#[test]
fn dictionary_and_reset() {
    let dict = text(80_000);
    let data = text(30_000);
    let mut compressor = CompressStream::new(30_000).unwrap();
    compressor.set_dictionary(&dict);
    let first = compressor.compress_chunk(&data).unwrap();
    compressor.reset();
    // after a reset the stream starts over from the dictionary
    assert_eq!(compressor.compress_chunk(&data).unwrap(), first);

    let mut decompressor = DecompressStream::with_settings(StreamSettings::default().buffer_size(30_000)).unwrap();
    decompressor.set_dictionary(&dict);
    assert_eq!(decompressor.decompress_chunk(&first, data.len()).unwrap(), data);
}

#[test]
fn invalid_settings() {
    assert!(CompressStream::new(0).is_err());
    assert!(CompressStream::new(usize::MAX).is_err());
}

proptest! {
    #[test]
    fn arbitrary_chunking(
        data in proptest::collection::vec(0u8..8, 0..30_000),
        sizes in proptest::collection::vec(100usize..40_000, 1..8),
    ) {
        let mut settings = StreamSettings::default();
        settings.buffer_size(40_000);
        prop_assert_eq!(through_stream(&data, &sizes, &settings), data);
    }
}
