//! Chunk compression.
//!
//! Chunks of a compressed dataset are stored as zlib streams prefixed with
//! the uncompressed length. A chunk that does not shrink is stored raw and
//! flagged as such in the chunk table.

use std::io::{Read, Write};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::util::{Error, Result};

/// Highest accepted compression level.
pub const MAX_LEVEL: u32 = 9;

/// Compress data using zlib.
///
/// Returns `None` when compression is disabled (`level == 0`), the input is
/// empty, or the compressed form would not be smaller than the input.
/// Otherwise returns `[uncompressed_size: u64 LE][zlib stream]`.
pub fn compress(data: &[u8], level: u32) -> Result<Option<Vec<u8>>> {
    if level == 0 || data.is_empty() {
        return Ok(None);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(MAX_LEVEL)));
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;

    if compressed.len() + 8 >= data.len() {
        return Ok(None);
    }

    let mut result = Vec::with_capacity(8 + compressed.len());
    result.extend_from_slice(&(data.len() as u64).to_le_bytes());
    result.extend_from_slice(&compressed);
    Ok(Some(result))
}

/// Decompress data produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 8 {
        return Err(Error::invalid("Compressed chunk shorter than its header"));
    }

    let mut size = [0u8; 8];
    size.copy_from_slice(&data[..8]);
    let uncompressed_size = usize::try_from(u64::from_le_bytes(size))
        .map_err(|_| Error::invalid("Compressed chunk size does not fit in memory"))?;

    let mut decoder = ZlibDecoder::new(&data[8..]);
    let mut decompressed = Vec::with_capacity(uncompressed_size.min(64 * 1024 * 1024));
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::invalid(format!("Corrupt compressed chunk: {}", e)))?;

    if decompressed.len() != uncompressed_size {
        return Err(Error::invalid(format!(
            "Compressed chunk expands to {} bytes, header says {}",
            decompressed.len(),
            uncompressed_size
        )));
    }
    Ok(decompressed)
}

/// Check if data carries a zlib header after the size prefix.
pub fn is_compressed(data: &[u8]) -> bool {
    if data.len() < 10 {
        return false;
    }

    // zlib header: 0x78 followed by 0x01, 0x5E, 0x9C, or 0xDA
    data[8] == 0x78 && matches!(data[9], 0x01 | 0x5E | 0x9C | 0xDA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let original = b"Hello, World! This is some test data that should compress well when repeated. ".repeat(100);

        let compressed = compress(&original, 6).unwrap().expect("should compress");
        assert!(compressed.len() < original.len());
        assert!(is_compressed(&compressed));

        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn test_no_compression_level_zero() {
        assert!(compress(b"Short data", 0).unwrap().is_none());
    }

    #[test]
    fn test_no_compression_if_larger() {
        assert!(compress(b"Hi", 9).unwrap().is_none());
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let mut bogus = 100u64.to_le_bytes().to_vec();
        bogus.extend_from_slice(b"not zlib at all");
        assert!(matches!(decompress(&bogus), Err(Error::InvalidStructure(_))));
        assert!(decompress(b"tiny").is_err());
    }
}
