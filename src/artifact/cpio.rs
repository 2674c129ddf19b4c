//! newc cpio archive encoding.
//!
//! The boot loader consumes the boot image as an initrd, which must be a
//! newc-format cpio stream: fixed-width ASCII-hex headers, null-terminated
//! names, and 4-byte alignment after both the name and the payload. The
//! encoder is in-process (no `cpio` host tool) because the archive bytes
//! must be reproducible for caching and reuse.

/// Magic that opens every record header.
pub const MAGIC: &str = "070701";

/// Name of the terminal record that closes the stream.
pub const TRAILER_NAME: &str = "TRAILER!!!";

/// Fixed header length: 6-byte magic plus 13 fields of 8 hex characters.
pub const HEADER_LEN: usize = 110;

/// First inode handed out by a writer. Inodes only need to be unique within
/// one archive; starting from a fixed value keeps the output reproducible.
const INODE_SEED: u32 = 721956;

/// Archive-bound node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

impl EntryKind {
    /// Type tag OR'd into the mode field at encode time. Permission lookup
    /// stays agnostic of these bits.
    pub fn type_bits(self) -> u32 {
        match self {
            EntryKind::Directory => 0o040000,
            EntryKind::File => 0o100000,
            EntryKind::Symlink => 0o120000,
        }
    }

    /// Directories are reachable as both `.` and `..`; everything else once.
    pub fn nlink(self) -> u32 {
        match self {
            EntryKind::Directory => 2,
            _ => 1,
        }
    }
}

/// One entry headed for the archive.
///
/// `mode` holds permission bits only; the kind's type tag is composed in
/// when the record is written.
#[derive(Debug, Clone)]
pub struct CpioEntry {
    pub name: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
    pub data: Vec<u8>,
}

impl CpioEntry {
    pub fn directory(name: &str, mode: u32, uid: u32, gid: u32, mtime: u32) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Directory,
            mode,
            uid,
            gid,
            mtime,
            data: Vec::new(),
        }
    }

    pub fn file(name: &str, mode: u32, uid: u32, gid: u32, mtime: u32, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::File,
            mode,
            uid,
            gid,
            mtime,
            data,
        }
    }

    /// Synthesized symlink record. The payload is the raw target path with
    /// no null terminator (only names are null-terminated), and the mode is
    /// always 0777 regardless of any override.
    pub fn symlink(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Symlink,
            mode: 0o777,
            uid: 0,
            gid: 0,
            mtime: 0,
            data: target.as_bytes().to_vec(),
        }
    }

    fn composed_mode(&self) -> u32 {
        self.kind.type_bits() | self.mode
    }
}

/// Serializes entries into one newc byte stream.
///
/// The writer owns the inode counter, so one build produces one archive
/// with one consistent inode sequence and no process-wide state.
pub struct CpioWriter {
    buf: Vec<u8>,
    next_inode: u32,
}

impl CpioWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            next_inode: INODE_SEED,
        }
    }

    /// Append one entry, assigning it the next inode.
    pub fn append(&mut self, entry: &CpioEntry) {
        let ino = self.next_inode;
        self.next_inode += 1;
        self.record(
            ino,
            &entry.name,
            entry.composed_mode(),
            entry.uid,
            entry.gid,
            entry.kind.nlink(),
            entry.mtime,
            &entry.data,
        );
    }

    /// Close the stream with the trailer record and return the archive
    /// bytes. The trailer carries all-zero fields (inode included) except
    /// for a single hard link.
    pub fn finish(mut self) -> Vec<u8> {
        self.record(0, TRAILER_NAME, 0, 0, 0, 1, 0, &[]);
        self.buf
    }

    fn record(
        &mut self,
        ino: u32,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        nlink: u32,
        mtime: u32,
        data: &[u8],
    ) {
        let name_size = name.len() + 1;
        let file_size = data.len() as u32;

        let mut header = String::with_capacity(HEADER_LEN);
        header.push_str(MAGIC);
        let fields = [
            ino,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            file_size,
            0, // devmajor
            0, // devminor
            0, // rdevmajor
            0, // rdevminor
            name_size as u32,
            0, // check (not computed in this format variant)
        ];
        for field in fields {
            header.push_str(&format!("{field:08x}"));
        }

        self.buf.extend_from_slice(header.as_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        self.buf
            .extend(std::iter::repeat(0u8).take(pad4(HEADER_LEN + name_size)));
        self.buf.extend_from_slice(data);
        self.buf.extend(std::iter::repeat(0u8).take(pad4(data.len())));
    }
}

impl Default for CpioWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero bytes needed to reach the next 4-byte boundary.
pub fn pad4(len: usize) -> usize {
    (4 - len % 4) % 4
}
