//! Artifact checksums and the output manifest.
//!
//! Every published artifact gets a `<name>.sha256` sidecar in `sha256sum`
//! format, and the output directory gets a small JSON manifest recording
//! size and digest per artifact so consumers can validate what they fetch.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Extension appended to an artifact path for its checksum sidecar.
pub const CHECKSUM_SUFFIX: &str = "sha256";

/// Manifest filename, written next to the artifacts.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Separator used by `sha256sum` between hash and filename.
const CHECKSUM_SEPARATOR: &str = "  ";

/// Hex sha256 of a file, streamed so large snapshots are not duplicated in
/// memory.
pub fn file_sha256(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("opening '{}' for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write `<artifact>.sha256` next to the artifact.
///
/// Returns the sidecar path.
pub fn write_checksum_sidecar(artifact: &Path) -> Result<PathBuf> {
    let hash = file_sha256(artifact)?;
    let filename = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("artifact '{}' has no usable filename", artifact.display()))?;

    let sidecar = PathBuf::from(format!("{}.{}", artifact.display(), CHECKSUM_SUFFIX));
    let content = format!("{hash}{CHECKSUM_SEPARATOR}{filename}\n");
    fs::write(&sidecar, content)
        .with_context(|| format!("writing checksum sidecar '{}'", sidecar.display()))?;
    Ok(sidecar)
}

/// One artifact line in the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub file: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Build manifest for one output directory.
#[derive(Debug, Serialize)]
pub struct BuildManifest {
    pub built_at_unix: u64,
    pub artifacts: Vec<ManifestEntry>,
}

impl BuildManifest {
    pub fn new() -> Self {
        let built_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            built_at_unix,
            artifacts: Vec::new(),
        }
    }

    /// Record an artifact that already exists on disk.
    pub fn record(&mut self, artifact: &Path) -> Result<()> {
        let meta = fs::metadata(artifact)
            .with_context(|| format!("reading artifact '{}'", artifact.display()))?;
        let file = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("artifact '{}' has no usable filename", artifact.display()))?
            .to_string();
        self.artifacts.push(ManifestEntry {
            file,
            size_bytes: meta.len(),
            sha256: file_sha256(artifact)?,
        });
        Ok(())
    }

    /// Write `manifest.json` into the given directory.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_NAME);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)
            .with_context(|| format!("writing manifest '{}'", path.display()))?;
        Ok(path)
    }
}

impl Default for BuildManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_sha256_known_vector() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vector.txt");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sidecar_keeps_full_artifact_name() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("filesystem.img");
        fs::write(&artifact, b"data").unwrap();

        let sidecar = write_checksum_sidecar(&artifact).unwrap();
        assert_eq!(
            sidecar.file_name().unwrap().to_str().unwrap(),
            "filesystem.img.sha256"
        );
        let content = fs::read_to_string(&sidecar).unwrap();
        let mut parts = content.trim_end().splitn(2, CHECKSUM_SEPARATOR);
        assert_eq!(parts.next().unwrap(), file_sha256(&artifact).unwrap());
        assert_eq!(parts.next().unwrap(), "filesystem.img");
    }

    #[test]
    fn test_manifest_records_artifacts() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("initial_state.bin");
        fs::write(&artifact, b"state bytes").unwrap();

        let mut manifest = BuildManifest::new();
        manifest.record(&artifact).unwrap();
        let path = manifest.write(temp.path()).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed["artifacts"][0]["file"], "initial_state.bin");
        assert_eq!(parsed["artifacts"][0]["size_bytes"], 11);
        assert!(parsed["built_at_unix"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_recording_missing_artifact_fails() {
        let mut manifest = BuildManifest::new();
        assert!(manifest.record(Path::new("/nonexistent/image")).is_err());
    }
}
