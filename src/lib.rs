//! AgentFS: a user-space copy-on-write overlay filesystem whose entire
//! persistent state lives in a single database file.
//!
//! The hierarchy is composed from an immutable base layer (seeded content)
//! and a mutable delta layer (all modifications). Reads fall through to the
//! base until a path is touched; the first mutation materializes the object
//! into the delta while preserving its inode number, so kernel-side inode
//! caches stay coherent across copy-up.
//!
//! ```no_run
//! use agentfs::{AgentFs, AgentFsOptions};
//!
//! let fs = AgentFs::open(AgentFsOptions::in_memory().with_cache(1000))?;
//! fs.write_file("/hello.txt", b"hello world")?;
//! assert_eq!(fs.read_file("/hello.txt")?, b"hello world");
//! # Ok::<(), agentfs::FsError>(())
//! ```

pub mod config;
pub mod error;
pub mod ffi;
pub mod overlay;
pub mod store;

pub use config::{AgentFsOptions, CacheOptions, CancelToken, MEMORY_PATH};
pub use error::{FsError, FsResult};
pub use overlay::{
    AgentFs, BaseSeeder, CacheStats, DirEntry, FileKind, FsStats, Stats, ROOT_INO,
};
