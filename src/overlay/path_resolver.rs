//! Path normalization and component-by-component resolution against the
//! overlay view.
//!
//! Paths are absolute. Normalization is lexical: empty and `.` components
//! drop, `..` resolves toward the root and never above it. The walk costs
//! one directory probe per component and chases symlinks up to a fixed
//! depth bound.

use crate::error::{FsError, FsResult};
use crate::store::ReadTxn;

use super::dir;
use super::inode;
use super::types::{FileKind, InodeRecord, Layer, ROOT_INO};

/// Symlink expansions tolerated per resolution before `TooManyLinks`.
pub(crate) const MAX_SYMLINK_DEPTH: u32 = 40;

/// Longest permitted path component, in bytes.
pub(crate) const MAX_NAME_LEN: usize = 255;

/// Lexically normalize an absolute path. The result is `/` or a string of
/// `/`-joined non-empty components; it is the canonical cache key for the
/// path.
pub(crate) fn normalize(path: &str) -> FsResult<String> {
    if !path.starts_with('/') {
        return Err(FsError::invalid(format!("path must be absolute: {path:?}")));
    }
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    if parts.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}

/// Components of a normalized path; empty for the root.
fn components(norm: &str) -> Vec<&str> {
    if norm == "/" {
        Vec::new()
    } else {
        norm[1..].split('/').collect()
    }
}

/// Split a normalized path into its parent directory and final name.
pub(crate) fn split_parent(norm: &str) -> FsResult<(&str, &str)> {
    if norm == "/" {
        return Err(FsError::invalid("the root has no parent entry"));
    }
    let idx = norm.rfind('/').unwrap_or(0);
    let parent = if idx == 0 { "/" } else { &norm[..idx] };
    Ok((parent, &norm[idx + 1..]))
}

/// Resolve a normalized path to `(ino, record, layer)`.
///
/// Symlinks in intermediate components are always followed; the final
/// component follows only when `follow_final` is set (`stat` vs `lstat`).
pub(crate) fn resolve(
    txn: &ReadTxn<'_>,
    norm: &str,
    follow_final: bool,
) -> FsResult<(u64, InodeRecord, Layer)> {
    let mut depth = 0;
    resolve_inner(txn, norm, follow_final, &mut depth)
}

fn resolve_inner(
    txn: &ReadTxn<'_>,
    norm: &str,
    follow_final: bool,
    depth: &mut u32,
) -> FsResult<(u64, InodeRecord, Layer)> {
    let comps = components(norm);
    let (mut cur_ino, mut cur_rec, mut cur_layer) = root(txn)?;

    for (i, name) in comps.iter().enumerate() {
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        if cur_rec.kind() != FileKind::Dir {
            return Err(FsError::NotDirectory);
        }

        let child = dir::lookup_child(txn, cur_ino, name)?.ok_or(FsError::NotFound)?;
        let (rec, layer) = inode::load_required(txn, child)?;

        let is_last = i == comps.len() - 1;
        if rec.kind() == FileKind::Symlink && (!is_last || follow_final) {
            *depth += 1;
            if *depth > MAX_SYMLINK_DEPTH {
                return Err(FsError::TooManyLinks);
            }
            let target = inode::symlink_target(txn, child, layer)?;
            let rest = comps[i + 1..].join("/");
            let joined = if target.starts_with('/') {
                format!("{target}/{rest}")
            } else {
                let parent = if i == 0 {
                    String::new()
                } else {
                    format!("/{}", comps[..i].join("/"))
                };
                format!("{parent}/{target}/{rest}")
            };
            let renormalized = normalize(&joined)?;
            tracing::trace!(from = norm, to = %renormalized, "following symlink");
            return resolve_inner(txn, &renormalized, follow_final, depth);
        }

        cur_ino = child;
        cur_rec = rec;
        cur_layer = layer;
    }

    Ok((cur_ino, cur_rec, cur_layer))
}

/// Resolve the parent directory of a normalized path, returning the parent
/// inode and the final name. Intermediate symlinks are followed; the final
/// name itself is not resolved.
pub(crate) fn resolve_parent(txn: &ReadTxn<'_>, norm: &str) -> FsResult<(u64, String)> {
    let (parent, name) = split_parent(norm)?;
    dir::check_name(name)?;
    let (parent_ino, parent_rec, _) = resolve(txn, parent, true)?;
    if parent_rec.kind() != FileKind::Dir {
        return Err(FsError::NotDirectory);
    }
    Ok((parent_ino, name.to_string()))
}

fn root(txn: &ReadTxn<'_>) -> FsResult<(u64, InodeRecord, Layer)> {
    let (rec, layer) = inode::load(txn, ROOT_INO)?
        .ok_or_else(|| FsError::corruption("root inode missing"))?;
    Ok((ROOT_INO, rec, layer))
}
