use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FsError, FsResult};

/// Reserved inode id of the filesystem root. Always present in the delta
/// after first open.
pub const ROOT_INO: u64 = 1;

/// Content chunk granularity for `CHUNK/` keys.
pub(crate) const CHUNK_SIZE: u64 = 64 * 1024;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// Which side of the overlay a record or key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Layer {
    /// Immutable, pre-seeded content.
    Base,
    /// All modifications made after mount.
    Delta,
}

/// Where an inode record came from.
///
/// `CopiedUp` records keep the base id they were materialized from; that id
/// equality is the inode-stability contract external inode caches depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Provenance {
    Base,
    Delta,
    CopiedUp { origin: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

/// Persistent inode record.
///
/// Encoded packed little-endian as
/// `mode:u32 uid:u32 gid:u32 nlink:u32 size:u64 atime:i64 mtime:i64
/// ctime:i64 provenance:u8 origin_ino:u64` (57 bytes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct InodeRecord {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub provenance: Provenance,
}

pub(crate) const INODE_RECORD_LEN: usize = 57;

impl InodeRecord {
    pub fn new_file(mode: u32, now: i64, provenance: Provenance) -> Self {
        Self::new(S_IFREG | (mode & 0o7777), now, provenance)
    }

    pub fn new_dir(mode: u32, now: i64, provenance: Provenance) -> Self {
        Self::new(S_IFDIR | (mode & 0o7777), now, provenance)
    }

    pub fn new_symlink(target_len: u64, now: i64, provenance: Provenance) -> Self {
        let mut rec = Self::new(S_IFLNK | 0o777, now, provenance);
        rec.size = target_len;
        rec
    }

    fn new(mode: u32, now: i64, provenance: Provenance) -> Self {
        InodeRecord {
            mode,
            uid: 0,
            gid: 0,
            nlink: 1,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            provenance,
        }
    }

    pub fn kind(&self) -> FileKind {
        match self.mode & S_IFMT {
            S_IFDIR => FileKind::Dir,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::File,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Dir
    }

    /// Replace the permission bits, keeping the file type bits.
    pub fn set_permissions(&mut self, mode: u32) {
        self.mode = (self.mode & S_IFMT) | (mode & 0o7777);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INODE_RECORD_LEN);
        out.extend_from_slice(&self.mode.to_le_bytes());
        out.extend_from_slice(&self.uid.to_le_bytes());
        out.extend_from_slice(&self.gid.to_le_bytes());
        out.extend_from_slice(&self.nlink.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.atime.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.ctime.to_le_bytes());
        let (tag, origin) = match self.provenance {
            Provenance::Base => (0u8, 0u64),
            Provenance::Delta => (1, 0),
            Provenance::CopiedUp { origin } => (2, origin),
        };
        out.push(tag);
        out.extend_from_slice(&origin.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> FsResult<Self> {
        if bytes.len() != INODE_RECORD_LEN {
            return Err(FsError::corruption(format!(
                "inode record has {} bytes, expected {}",
                bytes.len(),
                INODE_RECORD_LEN
            )));
        }
        let u32_at = |off: usize| u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        let u64_at = |off: usize| u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        let i64_at = |off: usize| i64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());

        let provenance = match bytes[48] {
            0 => Provenance::Base,
            1 => Provenance::Delta,
            2 => Provenance::CopiedUp {
                origin: u64_at(49),
            },
            tag => {
                return Err(FsError::corruption(format!(
                    "unknown provenance tag {tag}"
                )))
            }
        };

        Ok(InodeRecord {
            mode: u32_at(0),
            uid: u32_at(4),
            gid: u32_at(8),
            nlink: u32_at(12),
            size: u64_at(16),
            atime: i64_at(24),
            mtime: i64_at(32),
            ctime: i64_at(40),
            provenance,
        })
    }
}

/// Attributes returned by `stat`/`lstat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub ino: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Stats {
    pub fn kind(&self) -> FileKind {
        match self.mode & S_IFMT {
            S_IFDIR => FileKind::Dir,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::File,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind() == FileKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == FileKind::Symlink
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Whole-filesystem accounting returned by `statfs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub inodes: u64,
    pub bytes_used: u64,
}

/// One logical directory entry as returned by `readdir`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub kind: FileKind,
}

/// Current time in whole seconds since the epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
