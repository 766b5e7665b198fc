//! The overlay engine and its public path-addressed API.
//!
//! [`AgentFs`] presents a POSIX-like hierarchy composed from an immutable
//! base layer and a mutable delta layer living in the same database. Reads
//! fall through to the base when a path is untouched; the first mutation of
//! a base object materializes it into the delta (copy-up) *at the same
//! inode id*, so external inode caches stay coherent.
//!
//! The core is stateless per call: every operation takes an absolute path,
//! re-resolves it (through the optional resolution cache), and runs inside
//! one storage transaction. Mutations are atomic at commit; a failed
//! copy-up or mutation rolls back and leaves the base view intact.

mod content;
mod copy_up;
mod dir;
mod inode;
mod path_cache;
mod path_resolver;
mod seed;
pub(crate) mod types;
mod whiteout;

use std::collections::BTreeSet;

use crate::config::{AgentFsOptions, CancelToken};
use crate::error::{FsError, FsResult};
use crate::store::{self, keys, ReadTxn, Store, WriteTxn};

use path_cache::PathCache;
use path_resolver::normalize;
use types::{unix_now, InodeRecord, Layer, Provenance};

pub use path_cache::CacheStats;
pub use seed::BaseSeeder;
pub use types::{DirEntry, FileKind, FsStats, Stats, ROOT_INO};

/// A mounted overlay filesystem instance.
pub struct AgentFs {
    store: Store,
    cache: Option<PathCache>,
    cancel: Option<CancelToken>,
}

impl AgentFs {
    /// Open (creating and initializing if necessary) the filesystem whose
    /// state lives at `options.path`.
    ///
    /// Refuses to mount a database whose id allocator does not clear the
    /// seeded base id range; copy-up stability is unimplementable past that
    /// point.
    pub fn open(options: AgentFsOptions) -> FsResult<AgentFs> {
        let store = Store::open(&options.path)?;

        let txn = store.begin_write()?;
        match txn.get(keys::VERSION)? {
            None => {
                txn.put_u32(keys::VERSION, Store::schema_version())?;
                txn.put_u64(keys::ROOT_INO, ROOT_INO)?;
                txn.put_u64(keys::NEXT_INO, ROOT_INO + 1)?;
                let root = InodeRecord::new_dir(0o755, unix_now(), Provenance::Delta);
                inode::put(&txn, Layer::Delta, ROOT_INO, &root)?;
                tracing::info!(path = %options.path, "initialized filesystem database");
            }
            Some(bytes) => {
                let version = store::decode_u32(keys::VERSION, &bytes)?;
                if version != Store::schema_version() {
                    return Err(FsError::corruption(format!(
                        "unsupported database version {version}"
                    )));
                }
                if inode::load(&txn, ROOT_INO)?.is_none() {
                    return Err(FsError::corruption("root inode missing"));
                }
            }
        }

        let next = txn
            .get_u64(keys::NEXT_INO)?
            .ok_or_else(|| FsError::corruption("META/next_ino missing"))?;
        if let Some(max_base) = inode::max_base_ino(&txn)? {
            if next <= max_base {
                return Err(FsError::corruption(format!(
                    "next_ino {next} does not clear the base id range (max base id {max_base})"
                )));
            }
        }
        txn.commit()?;

        let cache = options
            .cache
            .enabled
            .then(|| PathCache::new(options.cache.effective_max_entries()));

        Ok(AgentFs {
            store,
            cache,
            cancel: options.cancel,
        })
    }

    fn check_canceled(&self) -> FsResult<()> {
        if let Some(token) = &self.cancel {
            if token.is_canceled() {
                return Err(FsError::Canceled);
            }
        }
        Ok(())
    }

    /// Begin a write transaction, honoring cancellation between
    /// transactions (a started transaction always runs to completion).
    fn begin_mutation(&self) -> FsResult<WriteTxn<'_>> {
        self.check_canceled()?;
        self.store.begin_write()
    }

    /// Resolve a path for a read-class operation, consulting the cache.
    ///
    /// Symlink bindings are never cached: follow and no-follow lookups of
    /// the same key would disagree about the result.
    fn resolve_read(
        &self,
        txn: &ReadTxn<'_>,
        norm: &str,
        follow_final: bool,
    ) -> FsResult<(u64, InodeRecord, Layer)> {
        let Some(cache) = &self.cache else {
            return path_resolver::resolve(txn, norm, follow_final);
        };

        if let Some((ino, kind)) = cache.lookup(norm) {
            if kind != FileKind::Symlink {
                if let Some((rec, layer)) = inode::load(txn, ino)? {
                    return Ok((ino, rec, layer));
                }
                // The binding outlived its inode; fall through to a walk.
                cache.invalidate(norm);
            }
        }

        let snapshot = cache.begin();
        let (ino, rec, layer) = path_resolver::resolve(txn, norm, follow_final)?;
        if rec.kind() != FileKind::Symlink {
            cache.insert_if_current(norm.to_string(), ino, rec.kind(), snapshot);
        }
        Ok((ino, rec, layer))
    }

    fn invalidate(&self, norm: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(norm);
        }
    }

    fn invalidate_subtree(&self, norm: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_subtree(norm);
        }
    }

    // ----- read-class operations -------------------------------------

    /// Attributes of the object at `path`, following symlinks.
    pub fn stat(&self, path: &str) -> FsResult<Stats> {
        self.stat_inner(path, true)
    }

    /// Attributes of the object at `path` itself, without following a
    /// final symlink.
    pub fn lstat(&self, path: &str) -> FsResult<Stats> {
        self.stat_inner(path, false)
    }

    fn stat_inner(&self, path: &str, follow: bool) -> FsResult<Stats> {
        self.check_canceled()?;
        let norm = normalize(path)?;
        let txn = self.store.begin_read()?;
        let (ino, rec, _) = self.resolve_read(&txn, &norm, follow)?;
        stats_from(&txn, ino, &rec)
    }

    /// Read up to `len` bytes at `offset`. Reads never trigger copy-up and
    /// never update atime.
    pub fn pread(&self, path: &str, offset: u64, len: u64) -> FsResult<Vec<u8>> {
        self.check_canceled()?;
        let norm = normalize(path)?;
        let txn = self.store.begin_read()?;
        let (ino, rec, layer) = self.resolve_read(&txn, &norm, true)?;
        if rec.is_dir() {
            return Err(FsError::IsDirectory);
        }
        content::read(&txn, layer, ino, rec.size, offset, len)
    }

    /// Read the entire content of the file at `path`.
    pub fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        self.check_canceled()?;
        let norm = normalize(path)?;
        let txn = self.store.begin_read()?;
        let (ino, rec, layer) = self.resolve_read(&txn, &norm, true)?;
        if rec.is_dir() {
            return Err(FsError::IsDirectory);
        }
        content::read(&txn, layer, ino, rec.size, 0, rec.size)
    }

    /// Target of the symlink at `path`.
    pub fn readlink(&self, path: &str) -> FsResult<String> {
        self.check_canceled()?;
        let norm = normalize(path)?;
        let txn = self.store.begin_read()?;
        let (ino, rec, layer) = self.resolve_read(&txn, &norm, false)?;
        if rec.kind() != FileKind::Symlink {
            return Err(FsError::invalid(format!("{norm} is not a symlink")));
        }
        inode::symlink_target(&txn, ino, layer)
    }

    /// Logical listing of the directory at `path`, in lexicographic order.
    /// `.` and `..` are not included.
    pub fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        self.check_canceled()?;
        let norm = normalize(path)?;
        let txn = self.store.begin_read()?;
        let (ino, rec, _) = self.resolve_read(&txn, &norm, true)?;
        if !rec.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let mut entries = Vec::new();
        for (name, child) in dir::list(&txn, ino)? {
            let (child_rec, _) = inode::load_required(&txn, child)?;
            entries.push(DirEntry {
                name,
                ino: child,
                kind: child_rec.kind(),
            });
        }
        Ok(entries)
    }

    /// Extended attribute value. Never triggers copy-up.
    pub fn getxattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        self.check_canceled()?;
        let norm = normalize(path)?;
        let txn = self.store.begin_read()?;
        let (ino, _, layer) = self.resolve_read(&txn, &norm, true)?;
        txn.get(&keys::xattr(layer, ino, name))?.ok_or(FsError::NotFound)
    }

    /// Names of all extended attributes on the object at `path`.
    pub fn listxattr(&self, path: &str) -> FsResult<Vec<String>> {
        self.check_canceled()?;
        let norm = normalize(path)?;
        let txn = self.store.begin_read()?;
        let (ino, _, layer) = self.resolve_read(&txn, &norm, true)?;
        let names = txn
            .scan_prefix_keys(&keys::xattr_prefix(layer, ino))?
            .iter()
            .map(|key| keys::name_segment(key).to_string())
            .collect();
        Ok(names)
    }

    /// Whole-filesystem accounting: live inode count and content bytes.
    pub fn statfs(&self) -> FsResult<FsStats> {
        self.check_canceled()?;
        let txn = self.store.begin_read()?;

        let mut ids = BTreeSet::new();
        for layer in [Layer::Base, Layer::Delta] {
            for key in txn.scan_prefix_keys(&keys::inode_prefix(layer))? {
                if let Some(ino) = keys::hex_segment(&key) {
                    ids.insert(ino);
                }
            }
        }
        let bytes_used = txn.sum_value_len_prefix(keys::chunk_prefix_all())?;

        Ok(FsStats {
            inodes: ids.len() as u64,
            bytes_used,
        })
    }

    // ----- write-class operations ------------------------------------

    /// Create an empty regular file. Fails with `Exists` if the name is
    /// already bound.
    pub fn create(&self, path: &str, mode: u32) -> FsResult<()> {
        let norm = normalize(path)?;
        if norm == "/" {
            return Err(FsError::Exists);
        }
        let txn = self.begin_mutation()?;
        let (parent, name) = prepare_parent(&txn, &norm)?;
        if dir::lookup_child(&txn, parent, &name)?.is_some() {
            return Err(FsError::Exists);
        }
        let ino = inode::alloc_ino(&txn)?;
        let rec = InodeRecord::new_file(mode, unix_now(), Provenance::Delta);
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        dir::insert_delta_entry(&txn, parent, &name, ino)?;
        touch_parent(&txn, parent)?;
        txn.commit()
    }

    /// Write `data` at `offset`, creating the file (mode 0644) if absent.
    /// Writing to a base-layer file copies it up first; the inode id is
    /// unchanged.
    pub fn pwrite(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<()> {
        let norm = normalize(path)?;
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| FsError::invalid("write range overflows"))?;
        let txn = self.begin_mutation()?;
        let (ino, mut rec) = resolve_file_for_write(&txn, &norm, true)?;
        content::write(&txn, ino, offset, data)?;
        let now = unix_now();
        rec.size = rec.size.max(end);
        rec.mtime = now;
        rec.ctime = now;
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        txn.commit()
    }

    /// Replace the entire content of the file at `path`, creating it
    /// (mode 0644) if absent.
    pub fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let norm = normalize(path)?;
        let txn = self.begin_mutation()?;
        let (ino, mut rec) = resolve_file_for_write(&txn, &norm, true)?;
        content::clear(&txn, ino)?;
        content::write(&txn, ino, 0, data)?;
        let now = unix_now();
        rec.size = data.len() as u64;
        rec.mtime = now;
        rec.ctime = now;
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        txn.commit()
    }

    /// Set the file size, dropping or zero-extending content.
    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let norm = normalize(path)?;
        let txn = self.begin_mutation()?;
        let (ino, mut rec) = resolve_file_for_write(&txn, &norm, false)?;
        content::truncate(&txn, ino, size)?;
        let now = unix_now();
        rec.size = size;
        rec.mtime = now;
        rec.ctime = now;
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        txn.commit()
    }

    /// Ensure `offset + len` bytes are allocated, growing the file if
    /// needed. Holes read back as zeros.
    pub fn fallocate(&self, path: &str, offset: u64, len: u64) -> FsResult<()> {
        let norm = normalize(path)?;
        let end = offset
            .checked_add(len)
            .ok_or_else(|| FsError::invalid("allocation range overflows"))?;
        let txn = self.begin_mutation()?;
        let (ino, mut rec) = resolve_file_for_write(&txn, &norm, false)?;
        if end > rec.size {
            let now = unix_now();
            rec.size = end;
            rec.mtime = now;
            rec.ctime = now;
            inode::put(&txn, Layer::Delta, ino, &rec)?;
        }
        txn.commit()
    }

    /// Change permission bits, keeping the file type.
    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.update_metadata(path, |rec| rec.set_permissions(mode))
    }

    /// Change ownership.
    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.update_metadata(path, |rec| {
            rec.uid = uid;
            rec.gid = gid;
        })
    }

    /// Set access and modification times explicitly. This is the only
    /// operation that writes atime; reads leave it untouched.
    pub fn utimes(&self, path: &str, atime: i64, mtime: i64) -> FsResult<()> {
        self.update_metadata(path, |rec| {
            rec.atime = atime;
            rec.mtime = mtime;
        })
    }

    fn update_metadata<F>(&self, path: &str, apply: F) -> FsResult<()>
    where
        F: FnOnce(&mut InodeRecord),
    {
        let norm = normalize(path)?;
        let txn = self.begin_mutation()?;
        let (ino, _, _) = path_resolver::resolve(&txn, &norm, true)?;
        let mut rec = copy_up::ensure_in_delta(&txn, ino)?;
        apply(&mut rec);
        rec.ctime = unix_now();
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        txn.commit()
    }

    /// Create a directory.
    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let norm = normalize(path)?;
        if norm == "/" {
            return Err(FsError::Exists);
        }
        let txn = self.begin_mutation()?;
        let (parent, name) = prepare_parent(&txn, &norm)?;
        if dir::lookup_child(&txn, parent, &name)?.is_some() {
            return Err(FsError::Exists);
        }
        let ino = inode::alloc_ino(&txn)?;
        let rec = InodeRecord::new_dir(mode, unix_now(), Provenance::Delta);
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        dir::insert_delta_entry(&txn, parent, &name, ino)?;
        touch_parent(&txn, parent)?;
        txn.commit()
    }

    /// Create a directory and any missing ancestors. Existing directories
    /// along the way are fine; a non-directory component fails.
    pub fn mkdir_all(&self, path: &str, mode: u32) -> FsResult<()> {
        let norm = normalize(path)?;
        if norm == "/" {
            return Ok(());
        }
        let txn = self.begin_mutation()?;
        let mut cur = ROOT_INO;
        for name in norm[1..].split('/') {
            dir::check_name(name)?;
            match dir::lookup_child(&txn, cur, name)? {
                Some(child) => {
                    let (rec, _) = inode::load_required(&txn, child)?;
                    if !rec.is_dir() {
                        return Err(FsError::NotDirectory);
                    }
                    cur = child;
                }
                None => {
                    copy_up::ensure_in_delta(&txn, cur)?;
                    let child = inode::alloc_ino(&txn)?;
                    let rec = InodeRecord::new_dir(mode, unix_now(), Provenance::Delta);
                    inode::put(&txn, Layer::Delta, child, &rec)?;
                    dir::insert_delta_entry(&txn, cur, name, child)?;
                    touch_parent(&txn, cur)?;
                    cur = child;
                }
            }
        }
        txn.commit()
    }

    /// Remove the file or symlink at `path`. A base-visible name gets a
    /// whiteout; a delta object is deleted once its link count drops to
    /// zero.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        self.remove_inner(path, RemoveKind::File)
    }

    /// Remove the empty directory at `path`.
    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        self.remove_inner(path, RemoveKind::Dir)
    }

    /// Remove whatever is at `path`, dispatching on its kind.
    pub fn remove(&self, path: &str) -> FsResult<()> {
        self.remove_inner(path, RemoveKind::Any)
    }

    fn remove_inner(&self, path: &str, kind: RemoveKind) -> FsResult<()> {
        let norm = normalize(path)?;
        if norm == "/" {
            return Err(match kind {
                RemoveKind::File => FsError::IsDirectory,
                _ => FsError::Permission,
            });
        }
        let txn = self.begin_mutation()?;
        let (parent, name) = path_resolver::resolve_parent(&txn, &norm)?;
        let child = dir::lookup_child(&txn, parent, &name)?.ok_or(FsError::NotFound)?;
        let (child_rec, _) = inode::load_required(&txn, child)?;
        let is_dir = child_rec.is_dir();

        match kind {
            RemoveKind::File if is_dir => return Err(FsError::IsDirectory),
            RemoveKind::Dir if !is_dir => return Err(FsError::NotDirectory),
            _ => {}
        }
        if is_dir && dir::has_any_child(&txn, child)? {
            return Err(FsError::NotEmpty);
        }

        copy_up::ensure_in_delta(&txn, parent)?;
        dir::remove_delta_entry(&txn, parent, &name)?;
        if dir::base_entry(&txn, parent, &name)?.is_some() {
            whiteout::insert(&txn, parent, &name)?;
        }

        if is_dir {
            dir::clear_delta_listing(&txn, child)?;
            if matches!(inode::load(&txn, child)?, Some((_, Layer::Delta))) {
                inode::delete_delta_object(&txn, child)?;
            }
        } else {
            // Whether the name was bound in the delta or whited out of the
            // base, a delta record (native or copied-up) loses one link.
            drop_delta_link(&txn, child)?;
        }

        touch_parent(&txn, parent)?;
        txn.commit()?;

        if is_dir {
            self.invalidate_subtree(&norm);
        } else {
            self.invalidate(&norm);
        }
        Ok(())
    }

    /// Atomically move `src` to `dst`. The moved inode keeps its id; a
    /// base-layer source is copied up first. An existing destination is
    /// replaced (`NotEmpty` for non-empty directories).
    pub fn rename(&self, src: &str, dst: &str) -> FsResult<()> {
        let src_norm = normalize(src)?;
        let dst_norm = normalize(dst)?;
        if src_norm == "/" || dst_norm == "/" {
            return Err(FsError::Permission);
        }
        if src_norm == dst_norm {
            return Ok(());
        }
        if dst_norm.starts_with(&format!("{src_norm}/")) {
            return Err(FsError::invalid(
                "cannot move a directory underneath itself",
            ));
        }

        let txn = self.begin_mutation()?;
        let (sparent, sname) = path_resolver::resolve_parent(&txn, &src_norm)?;
        let src_ino = dir::lookup_child(&txn, sparent, &sname)?.ok_or(FsError::NotFound)?;
        let (dparent, dname) = path_resolver::resolve_parent(&txn, &dst_norm)?;

        let src_rec = copy_up::ensure_in_delta(&txn, src_ino)?;
        let src_is_dir = src_rec.is_dir();
        copy_up::ensure_in_delta(&txn, sparent)?;
        copy_up::ensure_in_delta(&txn, dparent)?;

        let mut replaced_dir = false;
        if let Some(existing) = dir::lookup_child(&txn, dparent, &dname)? {
            if existing == src_ino {
                // Hard links to the same inode; POSIX calls this a no-op.
                drop(txn);
                return Ok(());
            }
            let (ex_rec, _) = inode::load_required(&txn, existing)?;
            if ex_rec.is_dir() {
                if !src_is_dir {
                    return Err(FsError::IsDirectory);
                }
                if dir::has_any_child(&txn, existing)? {
                    return Err(FsError::NotEmpty);
                }
                replaced_dir = true;
                dir::clear_delta_listing(&txn, existing)?;
                if matches!(inode::load(&txn, existing)?, Some((_, Layer::Delta))) {
                    inode::delete_delta_object(&txn, existing)?;
                }
            } else {
                if src_is_dir {
                    return Err(FsError::NotDirectory);
                }
                dir::remove_delta_entry(&txn, dparent, &dname)?;
                drop_delta_link(&txn, existing)?;
            }
        }

        dir::insert_delta_entry(&txn, dparent, &dname, src_ino)?;
        dir::remove_delta_entry(&txn, sparent, &sname)?;
        if dir::base_entry(&txn, sparent, &sname)?.is_some() {
            whiteout::insert(&txn, sparent, &sname)?;
        }

        let mut rec = src_rec;
        rec.ctime = unix_now();
        inode::put(&txn, Layer::Delta, src_ino, &rec)?;
        touch_parent(&txn, sparent)?;
        if dparent != sparent {
            touch_parent(&txn, dparent)?;
        }
        txn.commit()?;

        if src_is_dir || replaced_dir {
            self.invalidate_subtree(&src_norm);
            self.invalidate_subtree(&dst_norm);
        } else {
            self.invalidate(&src_norm);
            self.invalidate(&dst_norm);
        }
        Ok(())
    }

    /// Create a hard link `dst` to the inode at `src`. The link shares the
    /// source's inode id; a base-layer source is copied up first so the
    /// link count lives in the delta.
    pub fn link(&self, src: &str, dst: &str) -> FsResult<()> {
        let src_norm = normalize(src)?;
        let dst_norm = normalize(dst)?;
        if dst_norm == "/" {
            return Err(FsError::Exists);
        }
        let txn = self.begin_mutation()?;
        let (ino, rec, _) = path_resolver::resolve(&txn, &src_norm, false)?;
        if rec.is_dir() {
            return Err(FsError::Permission);
        }
        let mut rec = copy_up::ensure_in_delta(&txn, ino)?;
        let (dparent, dname) = prepare_parent(&txn, &dst_norm)?;
        if dir::lookup_child(&txn, dparent, &dname)?.is_some() {
            return Err(FsError::Exists);
        }
        dir::insert_delta_entry(&txn, dparent, &dname, ino)?;
        rec.nlink += 1;
        rec.ctime = unix_now();
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        touch_parent(&txn, dparent)?;
        txn.commit()
    }

    /// Create a symlink at `linkpath` pointing at `target`. The target is
    /// stored verbatim and resolved lazily during walks.
    pub fn symlink(&self, target: &str, linkpath: &str) -> FsResult<()> {
        let norm = normalize(linkpath)?;
        if norm == "/" {
            return Err(FsError::Exists);
        }
        if target.is_empty() {
            return Err(FsError::invalid("empty symlink target"));
        }
        let txn = self.begin_mutation()?;
        let (parent, name) = prepare_parent(&txn, &norm)?;
        if dir::lookup_child(&txn, parent, &name)?.is_some() {
            return Err(FsError::Exists);
        }
        let ino = inode::alloc_ino(&txn)?;
        let rec = InodeRecord::new_symlink(target.len() as u64, unix_now(), Provenance::Delta);
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        txn.put(&keys::symlink(Layer::Delta, ino), target.as_bytes())?;
        dir::insert_delta_entry(&txn, parent, &name, ino)?;
        touch_parent(&txn, parent)?;
        txn.commit()
    }

    /// Set an extended attribute, copying the object up if needed.
    pub fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        if name.is_empty() {
            return Err(FsError::invalid("empty xattr name"));
        }
        let norm = normalize(path)?;
        let txn = self.begin_mutation()?;
        let (ino, _, _) = path_resolver::resolve(&txn, &norm, true)?;
        let mut rec = copy_up::ensure_in_delta(&txn, ino)?;
        txn.put(&keys::xattr(Layer::Delta, ino, name), value)?;
        rec.ctime = unix_now();
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        txn.commit()
    }

    /// Remove an extended attribute. `NotFound` if it is not set.
    pub fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        let norm = normalize(path)?;
        let txn = self.begin_mutation()?;
        let (ino, _, _) = path_resolver::resolve(&txn, &norm, true)?;
        let mut rec = copy_up::ensure_in_delta(&txn, ino)?;
        if !txn.delete(&keys::xattr(Layer::Delta, ino, name))? {
            return Err(FsError::NotFound);
        }
        rec.ctime = unix_now();
        inode::put(&txn, Layer::Delta, ino, &rec)?;
        txn.commit()
    }

    /// Durably flush committed state for the filesystem containing `path`.
    pub fn fsync(&self, path: &str) -> FsResult<()> {
        self.check_canceled()?;
        let norm = normalize(path)?;
        {
            let txn = self.store.begin_read()?;
            self.resolve_read(&txn, &norm, true)?;
        }
        self.store.flush()
    }

    // ----- cache surface ---------------------------------------------

    /// Cache counters, or `None` when the cache is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Drop every cached resolution binding.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RemoveKind {
    File,
    Dir,
    Any,
}

/// Resolve the parent directory of `norm` and make it mutable: the parent
/// record is copied up so the new binding and mtime land in the delta.
fn prepare_parent(txn: &WriteTxn<'_>, norm: &str) -> FsResult<(u64, String)> {
    let (parent, name) = path_resolver::resolve_parent(txn, norm)?;
    copy_up::ensure_in_delta(txn, parent)?;
    Ok((parent, name))
}

/// Account the loss of one name binding on a delta record, deleting the
/// object once no names remain. Pure base records are immutable and stay.
fn drop_delta_link(txn: &WriteTxn<'_>, ino: u64) -> FsResult<()> {
    if let Some((mut rec, Layer::Delta)) = inode::load(txn, ino)? {
        rec.nlink = rec.nlink.saturating_sub(1);
        if rec.nlink == 0 {
            inode::delete_delta_object(txn, ino)?;
        } else {
            rec.ctime = unix_now();
            inode::put(txn, Layer::Delta, ino, &rec)?;
        }
    }
    Ok(())
}

fn touch_parent(txn: &WriteTxn<'_>, parent: u64) -> FsResult<()> {
    let (mut rec, layer) = inode::load_required(txn, parent)?;
    debug_assert_eq!(layer, Layer::Delta);
    let now = unix_now();
    rec.mtime = now;
    rec.ctime = now;
    inode::put(txn, Layer::Delta, parent, &rec)
}

/// Resolve a path for a content mutation, copying the file up. With
/// `create_missing`, an unbound final name creates a fresh delta file.
fn resolve_file_for_write(
    txn: &WriteTxn<'_>,
    norm: &str,
    create_missing: bool,
) -> FsResult<(u64, InodeRecord)> {
    match path_resolver::resolve(txn, norm, true) {
        Ok((ino, rec, _)) => {
            if rec.is_dir() {
                return Err(FsError::IsDirectory);
            }
            let rec = copy_up::ensure_in_delta(txn, ino)?;
            Ok((ino, rec))
        }
        Err(FsError::NotFound) if create_missing => {
            let (parent, name) = prepare_parent(txn, norm)?;
            if dir::lookup_child(txn, parent, &name)?.is_some() {
                // The final component is a dangling symlink.
                return Err(FsError::NotFound);
            }
            let ino = inode::alloc_ino(txn)?;
            let rec = InodeRecord::new_file(0o644, unix_now(), Provenance::Delta);
            inode::put(txn, Layer::Delta, ino, &rec)?;
            dir::insert_delta_entry(txn, parent, &name, ino)?;
            touch_parent(txn, parent)?;
            Ok((ino, rec))
        }
        Err(e) => Err(e),
    }
}

fn stats_from(txn: &ReadTxn<'_>, ino: u64, rec: &InodeRecord) -> FsResult<Stats> {
    // Directory link counts are derived, not stored: one for the entry
    // naming the directory (the root counts as one), plus one iff it has
    // any live logical child.
    let nlink = if rec.is_dir() {
        1 + dir::has_any_child(txn, ino)? as u32
    } else {
        rec.nlink
    };
    Ok(Stats {
        ino,
        mode: rec.mode,
        uid: rec.uid,
        gid: rec.gid,
        nlink,
        size: rec.size,
        atime: rec.atime,
        mtime: rec.mtime,
        ctime: rec.ctime,
    })
}
