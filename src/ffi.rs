//! C-compatible FFI layer for host file-system extensions.
//!
//! This module provides a stable C ABI over [`AgentFs`] so extension
//! shells (FSKit, FUSE hosts, SDK bindings) can call into the core. All
//! functions use C-compatible types; buffers and strings handed out are
//! owned by the caller and released through `agentfs_free_buffer` /
//! `agentfs_free_string`.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use crate::config::AgentFsOptions;
use crate::error::FsError;
use crate::overlay::AgentFs;

/// Opaque handle to an open filesystem instance.
pub struct AgentFsHandle {
    fs: AgentFs,
}

/// File statistics mirrored into C-compatible types.
#[repr(C)]
pub struct FfiStats {
    pub ino: i64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// Filesystem statistics for statfs.
#[repr(C)]
pub struct FfiFilesystemStats {
    pub inodes: u64,
    pub bytes_used: u64,
}

/// Result of an FFI operation.
///
/// `error_code` is 0 on success and a positive errno value on failure.
#[repr(C)]
pub struct FfiResult {
    pub success: bool,
    pub error_code: i32,
}

impl FfiResult {
    fn ok() -> Self {
        FfiResult {
            success: true,
            error_code: 0,
        }
    }

    fn err(errno: i32) -> Self {
        FfiResult {
            success: false,
            error_code: errno,
        }
    }

    fn from_fs(err: &FsError) -> Self {
        Self::err(err.errno())
    }

    fn invalid_arg() -> Self {
        Self::err(libc::EINVAL)
    }
}

/// Owned buffer for returning variable-length data.
///
/// Release with `agentfs_free_buffer`.
#[repr(C)]
pub struct FfiBuffer {
    pub data: *mut u8,
    pub len: usize,
    pub capacity: usize,
}

impl FfiBuffer {
    fn null() -> Self {
        FfiBuffer {
            data: ptr::null_mut(),
            len: 0,
            capacity: 0,
        }
    }

    fn from_vec(v: Vec<u8>) -> Self {
        let mut v = v.into_boxed_slice();
        let len = v.len();
        let data = v.as_mut_ptr();
        std::mem::forget(v);
        FfiBuffer {
            data,
            len,
            capacity: len,
        }
    }
}

unsafe fn cstr_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn stats_out(stats: crate::overlay::Stats) -> FfiStats {
    FfiStats {
        ino: stats.ino as i64,
        mode: stats.mode,
        nlink: stats.nlink,
        uid: stats.uid,
        gid: stats.gid,
        size: stats.size as i64,
        atime: stats.atime,
        mtime: stats.mtime,
        ctime: stats.ctime,
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Open a filesystem database and return a handle, or null on failure.
///
/// # Safety
/// `db_path` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn agentfs_open(db_path: *const c_char) -> *mut AgentFsHandle {
    agentfs_open_with_cache(db_path, 0)
}

/// Open a filesystem database with the path-resolution cache enabled.
/// `cache_max_entries` of 0 leaves the cache disabled.
///
/// # Safety
/// `db_path` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn agentfs_open_with_cache(
    db_path: *const c_char,
    cache_max_entries: u32,
) -> *mut AgentFsHandle {
    let Some(path) = cstr_arg(db_path) else {
        return ptr::null_mut();
    };
    let mut options = AgentFsOptions::new(path);
    if cache_max_entries > 0 {
        options = options.with_cache(cache_max_entries);
    }
    match AgentFs::open(options) {
        Ok(fs) => Box::into_raw(Box::new(AgentFsHandle { fs })),
        Err(_) => ptr::null_mut(),
    }
}

/// Close and free a handle.
///
/// # Safety
/// `handle` must be a valid handle returned by `agentfs_open`, or null.
/// The handle must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn agentfs_close(handle: *mut AgentFsHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Get file statistics, following symlinks.
///
/// # Safety
/// All pointers must be valid; `path` must be null-terminated.
#[no_mangle]
pub unsafe extern "C" fn agentfs_stat(
    handle: *const AgentFsHandle,
    path: *const c_char,
    out_stats: *mut FfiStats,
) -> FfiResult {
    if handle.is_null() || out_stats.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.stat(path) {
        Ok(stats) => {
            *out_stats = stats_out(stats);
            FfiResult::ok()
        }
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Get file statistics without following a final symlink.
///
/// # Safety
/// Same as `agentfs_stat`.
#[no_mangle]
pub unsafe extern "C" fn agentfs_lstat(
    handle: *const AgentFsHandle,
    path: *const c_char,
    out_stats: *mut FfiStats,
) -> FfiResult {
    if handle.is_null() || out_stats.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.lstat(path) {
        Ok(stats) => {
            *out_stats = stats_out(stats);
            FfiResult::ok()
        }
        Err(e) => FfiResult::from_fs(&e),
    }
}

// ============================================================================
// File I/O
// ============================================================================

/// Read up to `size` bytes from `path` at `offset` into an owned buffer.
///
/// # Safety
/// All pointers must be valid; the buffer written to `out_buffer` must be
/// released with `agentfs_free_buffer`.
#[no_mangle]
pub unsafe extern "C" fn agentfs_pread(
    handle: *const AgentFsHandle,
    path: *const c_char,
    offset: u64,
    size: u64,
    out_buffer: *mut FfiBuffer,
) -> FfiResult {
    if handle.is_null() || out_buffer.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.pread(path, offset, size) {
        Ok(data) => {
            *out_buffer = FfiBuffer::from_vec(data);
            FfiResult::ok()
        }
        Err(e) => {
            *out_buffer = FfiBuffer::null();
            FfiResult::from_fs(&e)
        }
    }
}

/// Write `data_len` bytes to `path` at `offset`, creating the file if it
/// does not exist.
///
/// # Safety
/// `data` must point to at least `data_len` readable bytes (or be null
/// with `data_len == 0`).
#[no_mangle]
pub unsafe extern "C" fn agentfs_pwrite(
    handle: *const AgentFsHandle,
    path: *const c_char,
    offset: u64,
    data: *const u8,
    data_len: usize,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    let data_slice: &[u8] = if data.is_null() || data_len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, data_len)
    };
    match (*handle).fs.pwrite(path, offset, data_slice) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Read an entire file.
///
/// # Safety
/// Same as `agentfs_pread`.
#[no_mangle]
pub unsafe extern "C" fn agentfs_read_file(
    handle: *const AgentFsHandle,
    path: *const c_char,
    out_buffer: *mut FfiBuffer,
) -> FfiResult {
    if handle.is_null() || out_buffer.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.read_file(path) {
        Ok(data) => {
            *out_buffer = FfiBuffer::from_vec(data);
            FfiResult::ok()
        }
        Err(e) => {
            *out_buffer = FfiBuffer::null();
            FfiResult::from_fs(&e)
        }
    }
}

/// Replace an entire file's content, creating it if needed.
///
/// # Safety
/// Same as `agentfs_pwrite`.
#[no_mangle]
pub unsafe extern "C" fn agentfs_write_file(
    handle: *const AgentFsHandle,
    path: *const c_char,
    data: *const u8,
    data_len: usize,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    let data_slice: &[u8] = if data.is_null() || data_len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, data_len)
    };
    match (*handle).fs.write_file(path, data_slice) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Truncate a file to `size`.
///
/// # Safety
/// `handle` must be valid; `path` must be null-terminated.
#[no_mangle]
pub unsafe extern "C" fn agentfs_truncate(
    handle: *const AgentFsHandle,
    path: *const c_char,
    size: u64,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.truncate(path, size) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

// ============================================================================
// Directories and namespace
// ============================================================================

/// Create a directory.
///
/// # Safety
/// `handle` must be valid; `path` must be null-terminated.
#[no_mangle]
pub unsafe extern "C" fn agentfs_mkdir(
    handle: *const AgentFsHandle,
    path: *const c_char,
    mode: u32,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.mkdir(path, mode) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Remove a file, symlink, or empty directory.
///
/// # Safety
/// `handle` must be valid; `path` must be null-terminated.
#[no_mangle]
pub unsafe extern "C" fn agentfs_remove(
    handle: *const AgentFsHandle,
    path: *const c_char,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.remove(path) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Rename/move `src` to `dst`.
///
/// # Safety
/// `handle` must be valid; both paths must be null-terminated.
#[no_mangle]
pub unsafe extern "C" fn agentfs_rename(
    handle: *const AgentFsHandle,
    src: *const c_char,
    dst: *const c_char,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let (Some(src), Some(dst)) = (cstr_arg(src), cstr_arg(dst)) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.rename(src, dst) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Create a symlink at `linkpath` pointing at `target`.
///
/// # Safety
/// `handle` must be valid; both strings must be null-terminated.
#[no_mangle]
pub unsafe extern "C" fn agentfs_symlink(
    handle: *const AgentFsHandle,
    target: *const c_char,
    linkpath: *const c_char,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let (Some(target), Some(linkpath)) = (cstr_arg(target), cstr_arg(linkpath)) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.symlink(target, linkpath) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Read a symlink target into a newly allocated C string.
///
/// # Safety
/// `out_target` receives a string that must be released with
/// `agentfs_free_string`.
#[no_mangle]
pub unsafe extern "C" fn agentfs_readlink(
    handle: *const AgentFsHandle,
    path: *const c_char,
    out_target: *mut *mut c_char,
) -> FfiResult {
    if handle.is_null() || out_target.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.readlink(path) {
        Ok(target) => match CString::new(target) {
            Ok(cstr) => {
                *out_target = cstr.into_raw();
                FfiResult::ok()
            }
            Err(_) => {
                *out_target = ptr::null_mut();
                FfiResult::err(libc::EIO)
            }
        },
        Err(e) => {
            *out_target = ptr::null_mut();
            FfiResult::from_fs(&e)
        }
    }
}

/// Read directory entries as a JSON array of names, lexicographically
/// ordered: `["a", "b", "c"]`.
///
/// # Safety
/// `out_entries` receives a string that must be released with
/// `agentfs_free_string`.
#[no_mangle]
pub unsafe extern "C" fn agentfs_readdir(
    handle: *const AgentFsHandle,
    path: *const c_char,
    out_entries: *mut *mut c_char,
) -> FfiResult {
    if handle.is_null() || out_entries.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.readdir(path) {
        Ok(entries) => {
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            let json = match serde_json::to_string(&names) {
                Ok(json) => json,
                Err(_) => {
                    *out_entries = ptr::null_mut();
                    return FfiResult::err(libc::EIO);
                }
            };
            match CString::new(json) {
                Ok(cstr) => {
                    *out_entries = cstr.into_raw();
                    FfiResult::ok()
                }
                Err(_) => {
                    *out_entries = ptr::null_mut();
                    FfiResult::err(libc::EIO)
                }
            }
        }
        Err(e) => {
            *out_entries = ptr::null_mut();
            FfiResult::from_fs(&e)
        }
    }
}

// ============================================================================
// Extended attributes, durability, accounting
// ============================================================================

/// Set an extended attribute.
///
/// # Safety
/// `value` must point to at least `value_len` readable bytes (or be null
/// with `value_len == 0`).
#[no_mangle]
pub unsafe extern "C" fn agentfs_setxattr(
    handle: *const AgentFsHandle,
    path: *const c_char,
    name: *const c_char,
    value: *const u8,
    value_len: usize,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let (Some(path), Some(name)) = (cstr_arg(path), cstr_arg(name)) else {
        return FfiResult::invalid_arg();
    };
    let value_slice: &[u8] = if value.is_null() || value_len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(value, value_len)
    };
    match (*handle).fs.setxattr(path, name, value_slice) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Remove an extended attribute.
///
/// # Safety
/// `handle` must be valid; both strings must be null-terminated.
#[no_mangle]
pub unsafe extern "C" fn agentfs_removexattr(
    handle: *const AgentFsHandle,
    path: *const c_char,
    name: *const c_char,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let (Some(path), Some(name)) = (cstr_arg(path), cstr_arg(name)) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.removexattr(path, name) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Flush committed state durably to disk.
///
/// # Safety
/// `handle` must be valid; `path` must be null-terminated.
#[no_mangle]
pub unsafe extern "C" fn agentfs_fsync(
    handle: *const AgentFsHandle,
    path: *const c_char,
) -> FfiResult {
    if handle.is_null() {
        return FfiResult::invalid_arg();
    }
    let Some(path) = cstr_arg(path) else {
        return FfiResult::invalid_arg();
    };
    match (*handle).fs.fsync(path) {
        Ok(()) => FfiResult::ok(),
        Err(e) => FfiResult::from_fs(&e),
    }
}

/// Filesystem-wide statistics.
///
/// # Safety
/// `out_stats` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn agentfs_statfs(
    handle: *const AgentFsHandle,
    out_stats: *mut FfiFilesystemStats,
) -> FfiResult {
    if handle.is_null() || out_stats.is_null() {
        return FfiResult::invalid_arg();
    }
    match (*handle).fs.statfs() {
        Ok(stats) => {
            *out_stats = FfiFilesystemStats {
                inodes: stats.inodes,
                bytes_used: stats.bytes_used,
            };
            FfiResult::ok()
        }
        Err(e) => FfiResult::from_fs(&e),
    }
}

// ============================================================================
// Memory management
// ============================================================================

/// Release a buffer returned by a read operation.
///
/// # Safety
/// `buffer` must have been produced by this library and not freed before.
#[no_mangle]
pub unsafe extern "C" fn agentfs_free_buffer(buffer: FfiBuffer) {
    if !buffer.data.is_null() {
        drop(Vec::from_raw_parts(buffer.data, buffer.len, buffer.capacity));
    }
}

/// Release a string returned by `agentfs_readlink` or `agentfs_readdir`.
///
/// # Safety
/// `s` must have been produced by this library and not freed before.
#[no_mangle]
pub unsafe extern "C" fn agentfs_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn open_memory() -> *mut AgentFsHandle {
        let path = CString::new(":memory:").unwrap();
        let handle = unsafe { agentfs_open(path.as_ptr()) };
        assert!(!handle.is_null());
        handle
    }

    #[test]
    fn test_write_stat_read_roundtrip() {
        let handle = open_memory();
        let path = CString::new("/hello.txt").unwrap();

        let result = unsafe {
            agentfs_write_file(handle, path.as_ptr(), b"hello".as_ptr(), 5)
        };
        assert!(result.success);

        let mut stats = FfiStats {
            ino: 0,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        };
        let result = unsafe { agentfs_stat(handle, path.as_ptr(), &mut stats) };
        assert!(result.success);
        assert_eq!(stats.size, 5);

        let mut buffer = FfiBuffer::null();
        let result = unsafe { agentfs_pread(handle, path.as_ptr(), 0, 5, &mut buffer) };
        assert!(result.success);
        let data = unsafe { std::slice::from_raw_parts(buffer.data, buffer.len) };
        assert_eq!(data, b"hello");
        unsafe { agentfs_free_buffer(buffer) };

        unsafe { agentfs_close(handle) };
    }

    #[test]
    fn test_missing_path_maps_to_enoent() {
        let handle = open_memory();
        let path = CString::new("/nope").unwrap();
        let mut stats = FfiStats {
            ino: 0,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        };
        let result = unsafe { agentfs_stat(handle, path.as_ptr(), &mut stats) };
        assert!(!result.success);
        assert_eq!(result.error_code, libc::ENOENT);
        unsafe { agentfs_close(handle) };
    }

    #[test]
    fn test_readdir_returns_json_names() {
        let handle = open_memory();
        let dir = CString::new("/docs").unwrap();
        let file = CString::new("/docs/a.txt").unwrap();
        unsafe {
            assert!(agentfs_mkdir(handle, dir.as_ptr(), 0o755).success);
            assert!(agentfs_write_file(handle, file.as_ptr(), b"x".as_ptr(), 1).success);
        }

        let root = CString::new("/docs").unwrap();
        let mut out: *mut c_char = ptr::null_mut();
        let result = unsafe { agentfs_readdir(handle, root.as_ptr(), &mut out) };
        assert!(result.success);
        let json = unsafe { CStr::from_ptr(out) }.to_str().unwrap().to_string();
        assert_eq!(json, r#"["a.txt"]"#);
        unsafe { agentfs_free_string(out) };
        unsafe { agentfs_close(handle) };
    }

    #[test]
    fn test_null_arguments_are_einval() {
        let result = unsafe { agentfs_stat(ptr::null(), ptr::null(), ptr::null_mut()) };
        assert!(!result.success);
        assert_eq!(result.error_code, libc::EINVAL);
    }
}
