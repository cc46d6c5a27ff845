use lz4_codec::raw::{
    compress, compress_into, compress_prepend_size, compress_with_dict, decompress, decompress_into,
    decompress_size_prepended, decompress_with_dict, hc,
};
use lz4_codec::{compress_bound, Error, Mode};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MODES: &[Mode] = &[Mode::Default, Mode::Fast(1), Mode::Fast(17), Mode::Fast(70_000), Mode::High(1), Mode::High(9), Mode::High(12)];

fn roundtrip(input: &[u8], mode: Mode) {
    let compressed = compress(input, mode).unwrap();
    assert!(compressed.len() <= compress_bound(input.len()).unwrap());
    assert_eq!(decompress(&compressed, input.len()).unwrap(), input);
}

/// Half zeroes, half noise, with some repeated text in between.
fn mixed(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill(&mut data[len / 4..len / 2]);
    for chunk in data[len / 2..].chunks_mut(64) {
        let phrase = b"mixed content with runs, noise and text; ";
        let n = chunk.len().min(phrase.len());
        chunk[..n].copy_from_slice(&phrase[..n]);
    }
    data
}

#[test]
fn thirty_two_as() {
    let input = b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    let compressed = compress(input, Mode::Default).unwrap();
    assert!(compressed.len() < 32);
    assert_eq!(decompress(&compressed, 32).unwrap(), &input[..]);
}

#[test]
fn tiny_inputs_every_mode() {
    for &mode in MODES {
        for len in 0..=20 {
            roundtrip(&b"abababababababababababab"[..len], mode);
        }
        roundtrip(b"x", mode);
    }
}

#[test]
fn multi_megabyte_every_mode() {
    let input = mixed(3 * 1024 * 1024, 1);
    for &mode in &[Mode::Default, Mode::Fast(4), Mode::High(3)] {
        roundtrip(&input, mode);
    }
}

#[test]
fn every_hc_level() {
    let input = mixed(200_000, 2);
    for level in hc::LEVEL_MIN..=hc::LEVEL_MAX {
        roundtrip(&input, Mode::High(level));
    }
    // out of range levels are clamped rather than rejected
    roundtrip(&input, Mode::High(-3));
    roundtrip(&input, Mode::High(99));
}

#[test]
fn noise_stays_within_bound() {
    let mut rng = StdRng::seed_from_u64(3);
    for &len in &[1usize, 255, 256, 4096, 70_000] {
        let mut input = vec![0u8; len];
        rng.fill(&mut input[..]);
        for &mode in MODES {
            roundtrip(&input, mode);
        }
    }
}

#[test]
fn exact_output_buffers() {
    let input = mixed(10_000, 4);
    let compressed = compress(&input, Mode::Default).unwrap();

    let mut exact = vec![0u8; compressed.len()];
    assert_eq!(compress_into(&input, &mut exact, Mode::Default).unwrap(), compressed.len());
    assert_eq!(exact, compressed);

    let mut short = vec![0u8; compressed.len() - 1];
    assert!(matches!(compress_into(&input, &mut short, Mode::Default), Err(Error::BufferTooSmall { .. })));

    let mut out = vec![0u8; input.len()];
    assert_eq!(decompress_into(&compressed, &mut out).unwrap(), input.len());
    assert_eq!(out, input);
    assert!(decompress(&compressed, input.len() - 1).unwrap_err().is_corruption());
}

#[test]
fn dictionary_helps_and_is_required() {
    let dict = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n".repeat(4);
    let request = b"GET /about.html HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";

    let plain = compress(request, Mode::Default).unwrap();
    let with_dict = compress_with_dict(request, &dict, Mode::Default).unwrap();
    assert!(with_dict.len() < plain.len());
    assert_eq!(decompress_with_dict(&with_dict, &dict, request.len()).unwrap(), &request[..]);
    assert!(decompress(&with_dict, request.len()).is_err());
}

#[test]
fn size_prepended() {
    let input = mixed(50_000, 5);
    let compressed = compress_prepend_size(&input, Mode::High(9)).unwrap();
    assert_eq!(decompress_size_prepended(&compressed).unwrap(), input);
}

proptest! {
    #[test]
    fn roundtrip_arbitrary(input in proptest::collection::vec(any::<u8>(), 0..5000), mode in 0..MODES.len()) {
        let compressed = compress(&input, MODES[mode]).unwrap();
        prop_assert!(compressed.len() <= compress_bound(input.len()).unwrap());
        prop_assert_eq!(decompress(&compressed, input.len()).unwrap(), input);
    }

    #[test]
    fn roundtrip_repetitive(seed in proptest::collection::vec(0u8..4, 1..32), repeats in 1usize..300) {
        let input: Vec<u8> = seed.iter().cycle().take(seed.len() * repeats).copied().collect();
        for &mode in &[Mode::Default, Mode::High(9)] {
            let compressed = compress(&input, mode).unwrap();
            prop_assert_eq!(decompress(&compressed, input.len()).unwrap(), input.clone());
        }
    }

    #[test]
    fn garbage_never_panics(input in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = decompress(&input, 4096);
        let _ = decompress_with_dict(&input, b"some dictionary", 4096);
        let _ = decompress_size_prepended(&input);
    }
}
