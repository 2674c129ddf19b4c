//! Boot image assembly.
//!
//! Walks the staged system tree, resolves permissions per path, and emits
//! the gzip-compressed newc archive the boot loader loads as the initial
//! root filesystem.
//!
//! Output is deterministic for a fixed tree and permissions document:
//! siblings are visited in byte-wise name order, the synthesized root comes
//! first, and table symlinks are appended after the whole tree in sorted
//! order. Identical inputs therefore produce identical archive bytes.

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::artifact::cpio::{CpioEntry, CpioWriter, EntryKind};
use crate::permissions::PermissionSet;

/// Build the uncompressed archive for a staged system tree.
///
/// Pre-order traversal: each directory record precedes its children, so an
/// extractor never sees a path without its parent.
pub fn build_archive(root: &Path, perms: &PermissionSet) -> Result<Vec<u8>> {
    let mut writer = CpioWriter::new();

    let root_meta = fs::metadata(root)
        .with_context(|| format!("reading system root '{}'", root.display()))?;
    let (mode, uid, gid) = perms.resolve(".", EntryKind::Directory);
    writer.append(&CpioEntry::directory(".", mode, uid, gid, unix_mtime(&root_meta)));

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("walking system tree '{}'", root.display()))?;
        let name = archive_name(entry.path().strip_prefix(root)?)?;

        // Follows links: a symlink staged on disk is archived as whatever
        // it points at. Archive symlink records come only from the table.
        let meta = fs::metadata(entry.path())
            .with_context(|| format!("reading metadata for '{}'", entry.path().display()))?;
        let mtime = unix_mtime(&meta);

        if meta.is_dir() {
            let (mode, uid, gid) = perms.resolve(&name, EntryKind::Directory);
            writer.append(&CpioEntry::directory(&name, mode, uid, gid, mtime));
        } else {
            let data = fs::read(entry.path())
                .with_context(|| format!("reading file '{}'", entry.path().display()))?;
            let (mode, uid, gid) = perms.resolve(&name, EntryKind::File);
            writer.append(&CpioEntry::file(&name, mode, uid, gid, mtime, data));
        }
    }

    for (link, target) in perms.symlinks() {
        writer.append(&CpioEntry::symlink(&format!(".{link}"), target));
    }

    Ok(writer.finish())
}

/// Build the archive and write it compressed as the boot image artifact.
///
/// Returns the compressed size in bytes. Trees are small enough that the
/// whole archive is compressed in one buffer; nothing here streams.
pub fn build_image(root: &Path, perms: &PermissionSet, output: &Path) -> Result<u64> {
    let archive = build_archive(root, perms)?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(archive.len() / 2), Compression::best());
    encoder.write_all(&archive)?;
    let compressed = encoder.finish()?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    fs::write(output, &compressed)
        .with_context(|| format!("writing boot image '{}'", output.display()))?;

    Ok(compressed.len() as u64)
}

/// `.`-rooted, slash-separated archive name for a tree-relative path.
fn archive_name(rel: &Path) -> Result<String> {
    let mut name = String::from(".");
    for component in rel.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| anyhow!("non-UTF-8 path component in '{}'", rel.display()))?;
        name.push('/');
        name.push_str(part);
    }
    Ok(name)
}

/// Modification time in whole unix seconds (fractions truncated).
fn unix_mtime(meta: &fs::Metadata) -> u32 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::cpio::{pad4, HEADER_LEN, TRAILER_NAME};
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    struct Record {
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
        nlink: u32,
        data: Vec<u8>,
    }

    /// Minimal newc reader used to check the builder's output.
    fn parse_records(bytes: &[u8]) -> Vec<Record> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let header = &bytes[offset..offset + HEADER_LEN];
            assert_eq!(&header[..6], b"070701");
            let field = |i: usize| {
                let start = 6 + 8 * i;
                let text = std::str::from_utf8(&header[start..start + 8]).unwrap();
                u32::from_str_radix(text, 16).unwrap()
            };

            let name_size = field(11) as usize;
            let file_size = field(6) as usize;
            let name_start = offset + HEADER_LEN;
            let name =
                String::from_utf8(bytes[name_start..name_start + name_size - 1].to_vec()).unwrap();
            assert_eq!(bytes[name_start + name_size - 1], 0);

            let data_start = name_start + name_size + pad4(HEADER_LEN + name_size);
            let data = bytes[data_start..data_start + file_size].to_vec();
            offset = data_start + file_size + pad4(file_size);

            let done = name == TRAILER_NAME;
            records.push(Record {
                name,
                mode: field(1),
                uid: field(2),
                gid: field(3),
                nlink: field(4),
                data,
            });
            if done {
                assert_eq!(offset, bytes.len());
                return records;
            }
        }
    }

    fn sample_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("etc/passwd"), "root:x:0:0\n").unwrap();
        fs::write(root.join("init"), "#!/bin/sh\n").unwrap();
        temp
    }

    #[test]
    fn test_root_record_comes_first() {
        let temp = sample_tree();
        let bytes = build_archive(temp.path(), &PermissionSet::default()).unwrap();
        let records = parse_records(&bytes);
        assert_eq!(records[0].name, ".");
        assert_eq!(records[0].mode, 0o040755);
        assert_eq!(records[0].nlink, 2);
    }

    #[test]
    fn test_traversal_is_sorted_and_preorder() {
        let temp = sample_tree();
        let bytes = build_archive(temp.path(), &PermissionSet::default()).unwrap();
        let names: Vec<String> = parse_records(&bytes).into_iter().map(|r| r.name).collect();
        // bin < etc < init byte-wise; directories precede their children.
        assert_eq!(
            names,
            vec![".", "./bin", "./etc", "./etc/passwd", "./init", TRAILER_NAME]
        );
    }

    #[test]
    fn test_default_modes_apply() {
        let temp = sample_tree();
        let bytes = build_archive(temp.path(), &PermissionSet::default()).unwrap();
        let records = parse_records(&bytes);
        let find = |name: &str| records.iter().find(|r| r.name == name).unwrap();

        let file = find("./etc/passwd");
        assert_eq!(file.mode, 0o100644);
        assert_eq!((file.uid, file.gid), (0, 0));
        assert_eq!(file.nlink, 1);
        assert_eq!(file.data, b"root:x:0:0\n");

        let dir = find("./etc");
        assert_eq!(dir.mode, 0o040755);
        assert_eq!(dir.nlink, 2);
        assert!(dir.data.is_empty());
    }

    #[test]
    fn test_overrides_compose_with_type_bits() {
        let temp = sample_tree();
        let perms = PermissionSet::from_json(
            r#"{"files": {"/etc/passwd": {"mode": "0640", "uid": 3, "gid": 4}}}"#,
        )
        .unwrap();
        let bytes = build_archive(temp.path(), &perms).unwrap();
        let records = parse_records(&bytes);
        let file = records.iter().find(|r| r.name == "./etc/passwd").unwrap();
        assert_eq!(file.mode, 0o100640);
        assert_eq!((file.uid, file.gid), (3, 4));
    }

    #[test]
    fn test_symlinks_follow_the_tree() {
        let temp = sample_tree();
        let perms = PermissionSet::from_json(
            r#"{"symlinks": {"/bin/sh": "/bin/busybox", "/amber.sh": "/tmp/out.sh"}}"#,
        )
        .unwrap();
        let bytes = build_archive(temp.path(), &perms).unwrap();
        let records = parse_records(&bytes);

        let link = records.iter().find(|r| r.name == "./bin/sh").unwrap();
        assert_eq!(link.mode, 0o120777);
        assert_eq!((link.uid, link.gid), (0, 0));
        assert_eq!(link.nlink, 1);
        // Raw target bytes, no null terminator appended.
        assert_eq!(link.data, b"/bin/busybox");

        // Both links sit between the last tree entry and the trailer.
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let init = names.iter().position(|n| *n == "./init").unwrap();
        assert_eq!(&names[init + 1..], &["./amber.sh", "./bin/sh", TRAILER_NAME]);
    }

    #[test]
    fn test_archive_is_deterministic() {
        let temp = sample_tree();
        let perms = PermissionSet::from_json(
            r#"{"files": {"/init": {"mode": "0755", "uid": 0, "gid": 0}},
                "symlinks": {"/bin/sh": "/bin/busybox"}}"#,
        )
        .unwrap();
        let first = build_archive(temp.path(), &perms).unwrap();
        let second = build_archive(temp.path(), &perms).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_image_round_trips_through_gzip() {
        let temp = sample_tree();
        let out = TempDir::new().unwrap();
        let image = out.path().join("assets/filesystem.img");
        let perms = PermissionSet::default();

        let compressed_size = build_image(temp.path(), &perms, &image).unwrap();
        assert_eq!(fs::metadata(&image).unwrap().len(), compressed_size);

        let mut decoder = GzDecoder::new(fs::File::open(&image).unwrap());
        let mut archive = Vec::new();
        decoder.read_to_end(&mut archive).unwrap();
        assert_eq!(archive, build_archive(temp.path(), &perms).unwrap());

        // The decompressed stream parses back to the original set of paths
        // and ends at the trailer.
        let records = parse_records(&archive);
        assert_eq!(records.last().unwrap().name, TRAILER_NAME);
        assert_eq!(records.last().unwrap().nlink, 1);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let err =
            build_archive(Path::new("/nonexistent/system"), &PermissionSet::default()).unwrap_err();
        assert!(format!("{err:#}").contains("system root"));
    }
}
