//! Permission resolution for archive entries.
//!
//! The permissions document is JSON with two top-level mappings:
//!
//! ```json
//! {
//!     "files": { "/etc/passwd": { "mode": "0640", "uid": 3, "gid": 4 } },
//!     "symlinks": { "/bin/sh": "/bin/busybox" }
//! }
//! ```
//!
//! `files` keys are `/`-rooted paths; archive names are `.`-rooted, so the
//! leading `.` is stripped before lookup. `symlinks` is not walked from
//! disk at all: each entry becomes a synthesized archive record after the
//! regular tree.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::artifact::cpio::EntryKind;

/// Default mode for directories without an override.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Default mode for regular files without an override.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Symlinks always get full permission bits; overrides are ignored.
pub const SYMLINK_MODE: u32 = 0o777;

#[derive(Debug, Deserialize)]
struct PermissionsJson {
    #[serde(default)]
    files: BTreeMap<String, OverrideJson>,
    #[serde(default)]
    symlinks: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverrideJson {
    mode: String,
    uid: u32,
    gid: u32,
}

/// Mode/owner override for one path, with the mode already parsed from its
/// octal string. Holds permission bits only, never type bits.
#[derive(Debug, Clone, Copy)]
pub struct PermissionOverride {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Loaded permissions document.
///
/// Both maps are ordered so that everything derived from them (symlink
/// records in particular) is reproducible across runs.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    files: BTreeMap<String, PermissionOverride>,
    symlinks: BTreeMap<String, String>,
}

impl PermissionSet {
    /// Load and validate the permissions document. A missing or malformed
    /// document aborts the build.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading permissions document '{}'", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("parsing permissions document '{}'", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let parsed: PermissionsJson = serde_json::from_str(text)?;

        let mut files = BTreeMap::new();
        for (path, entry) in parsed.files {
            let mode = parse_octal_mode(&entry.mode)
                .with_context(|| format!("invalid mode for '{path}'"))?;
            files.insert(
                path,
                PermissionOverride {
                    mode,
                    uid: entry.uid,
                    gid: entry.gid,
                },
            );
        }

        Ok(Self {
            files,
            symlinks: parsed.symlinks,
        })
    }

    /// Resolve `(mode, uid, gid)` for an archive name.
    ///
    /// The mode is permission bits only; the encoder composes the type tag.
    pub fn resolve(&self, archive_name: &str, kind: EntryKind) -> (u32, u32, u32) {
        if kind == EntryKind::Symlink {
            // Fixed bits for link records, whatever the document says.
            return (SYMLINK_MODE, 0, 0);
        }

        let key = lookup_key(archive_name);
        match self.files.get(key) {
            Some(entry) => (entry.mode, entry.uid, entry.gid),
            None => {
                let mode = match kind {
                    EntryKind::Directory => DEFAULT_DIR_MODE,
                    _ => DEFAULT_FILE_MODE,
                };
                (mode, 0, 0)
            }
        }
    }

    /// Synthesized symlinks: absolute path -> target string.
    pub fn symlinks(&self) -> &BTreeMap<String, String> {
        &self.symlinks
    }
}

/// Archive names are rooted at `.`; override keys are rooted at `/`. The
/// synthesized root `.` resolves against the `/` key.
fn lookup_key(archive_name: &str) -> &str {
    if archive_name == "." {
        "/"
    } else {
        archive_name.strip_prefix('.').unwrap_or(archive_name)
    }
}

fn parse_octal_mode(text: &str) -> Result<u32> {
    let mode = u32::from_str_radix(text, 8)
        .with_context(|| format!("mode '{text}' is not an octal string"))?;
    if mode > 0o7777 {
        bail!("mode '{text}' has more than permission bits");
    }
    Ok(mode)
}
