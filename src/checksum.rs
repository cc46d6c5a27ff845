//! xxHash32, the checksum used by the frame format for header, block and content checksums.

use std::hash::Hasher;
use twox_hash::XxHash32;

/// Incremental checksum over data fed piece by piece.
pub type ContentHasher = XxHash32;

pub fn content_hasher() -> ContentHasher {
    XxHash32::with_seed(0)
}

/// xxHash32 with seed 0 over `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = content_hasher();
    hasher.write(data);
    hasher.finish() as u32
}

/// The frame header checksum: the second byte of the descriptor's xxHash32.
pub(crate) fn header_checksum(descriptor: &[u8]) -> u8 {
    (checksum(descriptor) >> 8) as u8
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(checksum(b""), 0x02CC_5D05);
        assert_eq!(checksum(b"a"), 0x550D_7456);
    }

    #[test]
    fn incremental_equals_oneshot() {
        let mut hasher = content_hasher();
        hasher.write(b"hello ");
        hasher.write(b"world");
        assert_eq!(hasher.finish() as u32, checksum(b"hello world"));
    }
}
