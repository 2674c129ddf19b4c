//! Snapshot persistence.
//!
//! Captured machine state is persisted gzip-compressed at maximum level and
//! must decompress back to byte-identical content. The blob itself stays
//! opaque: these helpers move bytes, nothing more.

pub mod capture;
pub mod transport;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::engine::StateBlob;

/// Compress at the maximum level; both the boot image and the snapshot use
/// the same scheme.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(bytes).context("compressing snapshot")?;
    Ok(encoder.finish()?)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("decompressing snapshot")?;
    Ok(out)
}

/// Persist a captured blob compressed. Returns the compressed size.
pub fn save_state(state: &StateBlob, path: &Path) -> Result<u64> {
    let compressed = compress(state.as_bytes())?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating snapshot directory '{}'", parent.display()))?;
    }
    fs::write(path, &compressed)
        .with_context(|| format!("writing snapshot '{}'", path.display()))?;
    Ok(compressed.len() as u64)
}

/// Read a persisted snapshot back into an opaque blob.
pub fn load_state(path: &Path) -> Result<StateBlob> {
    let compressed =
        fs::read(path).with_context(|| format!("reading snapshot '{}'", path.display()))?;
    Ok(StateBlob::new(decompress(&compressed)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_empty_buffer() {
        let original: Vec<u8> = Vec::new();
        assert_eq!(decompress(&compress(&original).unwrap()).unwrap(), original);
    }

    #[test]
    fn test_round_trip_single_byte() {
        let original = vec![0xA5u8];
        assert_eq!(decompress(&compress(&original).unwrap()).unwrap(), original);
    }

    #[test]
    fn test_round_trip_large_buffer() {
        // > 1 MiB with enough structure that compression actually shrinks it.
        let original: Vec<u8> = (0..2 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress(&original).unwrap();
        assert!(compressed.len() < original.len());
        assert_eq!(decompress(&compressed).unwrap(), original);
    }

    #[test]
    fn test_corrupt_data_is_an_error() {
        assert!(decompress(b"definitely not a gzip stream").is_err());

        let mut compressed = compress(b"some machine state").unwrap();
        compressed.truncate(compressed.len() / 2);
        assert!(decompress(&compressed).is_err());
    }

    #[test]
    fn test_save_and_load_state() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dist/initial_state.bin");
        let blob = StateBlob::new(b"opaque engine state".to_vec());

        let compressed_size = save_state(&blob, &path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), compressed_size);

        let restored = load_state(&path).unwrap();
        assert_eq!(restored.as_bytes(), b"opaque engine state");
    }
}
