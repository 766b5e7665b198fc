//! Base-layer seeding.
//!
//! The base layer is immutable after mount, so it is populated through a
//! dedicated builder that writes `BASE/` records and entries directly.
//! Base ids come from the same persisted counter as delta ids, which is
//! what reserves the base range: the allocator is always strictly above
//! every seeded id, and copy-up can re-key records at their base id
//! without collision.

use std::path::Path;

use crate::error::{FsError, FsResult};
use crate::store::{keys, WriteTxn};

use super::types::{unix_now, InodeRecord, Layer, Provenance, CHUNK_SIZE, ROOT_INO};
use super::{dir, inode, path_resolver, AgentFs};

/// Builder handed to [`AgentFs::seed_base`] closures. All writes land in
/// one transaction; an error discards the entire seed.
pub struct BaseSeeder<'a, 's> {
    txn: &'a WriteTxn<'s>,
    now: i64,
}

impl BaseSeeder<'_, '_> {
    /// Create a base-layer directory. Parents must already exist.
    pub fn dir(&self, path: &str, mode: u32) -> FsResult<u64> {
        let rec = InodeRecord::new_dir(mode, self.now, Provenance::Base);
        self.create_node(path, rec)
    }

    /// Create a base-layer regular file with `content`.
    pub fn file(&self, path: &str, mode: u32, content: &[u8]) -> FsResult<u64> {
        let mut rec = InodeRecord::new_file(mode, self.now, Provenance::Base);
        rec.size = content.len() as u64;
        let ino = self.create_node(path, rec)?;
        for (index, chunk) in content.chunks(CHUNK_SIZE as usize).enumerate() {
            self.txn
                .put(&keys::chunk(Layer::Base, ino, index as u64), chunk)?;
        }
        Ok(ino)
    }

    /// Create a base-layer symlink pointing at `target`.
    pub fn symlink(&self, path: &str, target: &str) -> FsResult<u64> {
        if target.is_empty() {
            return Err(FsError::invalid("empty symlink target"));
        }
        let rec = InodeRecord::new_symlink(target.len() as u64, self.now, Provenance::Base);
        let ino = self.create_node(path, rec)?;
        self.txn
            .put(&keys::symlink(Layer::Base, ino), target.as_bytes())?;
        Ok(ino)
    }

    /// Attach an extended attribute to an already-seeded object.
    pub fn xattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        if name.is_empty() {
            return Err(FsError::invalid("empty xattr name"));
        }
        let norm = path_resolver::normalize(path)?;
        let ino = self.resolve_base(&norm)?;
        self.txn.put(&keys::xattr(Layer::Base, ino, name), value)
    }

    fn create_node(&self, path: &str, rec: InodeRecord) -> FsResult<u64> {
        let norm = path_resolver::normalize(path)?;
        if norm == "/" {
            return Err(FsError::Exists);
        }
        let (parent_path, name) = path_resolver::split_parent(&norm)?;
        dir::check_name(name)?;

        let parent = self.resolve_base(parent_path)?;
        let (parent_rec, _) = inode::load_required(self.txn, parent)?;
        if !parent_rec.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if dir::base_entry(self.txn, parent, name)?.is_some() {
            return Err(FsError::Exists);
        }

        let ino = inode::alloc_ino(self.txn)?;
        inode::put(self.txn, Layer::Base, ino, &rec)?;
        dir::insert_base_entry(self.txn, parent, name, ino)?;
        Ok(ino)
    }

    /// Walk a normalized path through base-layer entries only. Seeding
    /// never consults the delta and never follows symlinks.
    fn resolve_base(&self, norm: &str) -> FsResult<u64> {
        let mut cur = ROOT_INO;
        if norm == "/" {
            return Ok(cur);
        }
        for name in norm[1..].split('/') {
            cur = dir::base_entry(self.txn, cur, name)?.ok_or(FsError::NotFound)?;
        }
        Ok(cur)
    }
}

impl AgentFs {
    /// Populate the base layer programmatically. The closure's writes are
    /// committed atomically; base ids allocated here stay below every
    /// future delta id.
    pub fn seed_base<F>(&self, build: F) -> FsResult<()>
    where
        F: FnOnce(&BaseSeeder<'_, '_>) -> FsResult<()>,
    {
        self.check_canceled()?;
        let txn = self.store.begin_write()?;
        let seeder = BaseSeeder {
            txn: &txn,
            now: unix_now(),
        };
        build(&seeder)?;
        txn.commit()
    }

    /// Ingest a host directory tree as the base layer.
    pub fn seed_base_from_dir(&self, root: &Path) -> FsResult<()> {
        self.check_canceled()?;
        let txn = self.store.begin_write()?;
        let seeder = BaseSeeder {
            txn: &txn,
            now: unix_now(),
        };
        ingest_dir(&seeder, root, "")?;
        txn.commit()?;
        tracing::info!(root = %root.display(), "seeded base layer from host directory");
        Ok(())
    }
}

fn host_err(err: std::io::Error) -> FsError {
    FsError::Storage(format!("host read failed: {err}"))
}

fn host_mode(metadata: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        if metadata.is_dir() {
            0o755
        } else {
            0o644
        }
    }
}

fn ingest_dir(seeder: &BaseSeeder<'_, '_>, host_dir: &Path, fs_prefix: &str) -> FsResult<()> {
    for entry in std::fs::read_dir(host_dir).map_err(host_err)? {
        let entry = entry.map_err(host_err)?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 name");
            continue;
        };
        let fs_path = format!("{fs_prefix}/{name}");
        let file_type = entry.file_type().map_err(host_err)?;

        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path()).map_err(host_err)?;
            match target.to_str() {
                Some(target) => {
                    seeder.symlink(&fs_path, target)?;
                }
                None => {
                    tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 symlink target");
                }
            }
        } else if file_type.is_dir() {
            let metadata = entry.metadata().map_err(host_err)?;
            seeder.dir(&fs_path, host_mode(&metadata))?;
            ingest_dir(seeder, &entry.path(), &fs_path)?;
        } else if file_type.is_file() {
            let metadata = entry.metadata().map_err(host_err)?;
            let content = std::fs::read(entry.path()).map_err(host_err)?;
            seeder.file(&fs_path, host_mode(&metadata), &content)?;
        }
        // Sockets, fifos, and devices have no representation here.
    }
    Ok(())
}
