use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Database path selecting the in-memory backend.
pub const MEMORY_PATH: &str = ":memory:";

/// Default bound for the path-resolution cache when enabled without an
/// explicit limit.
pub const DEFAULT_CACHE_MAX_ENTRIES: u32 = 10_000;

/// Path-resolution cache options.
///
/// The cache is off by default; hosts opt in at open time. A `max_entries`
/// of zero means "use the default bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CacheOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_entries: u32,
}

impl CacheOptions {
    pub fn enabled(max_entries: u32) -> Self {
        CacheOptions {
            enabled: true,
            max_entries,
        }
    }

    pub(crate) fn effective_max_entries(&self) -> usize {
        if self.max_entries == 0 {
            DEFAULT_CACHE_MAX_ENTRIES as usize
        } else {
            self.max_entries as usize
        }
    }
}

/// Open-time configuration for a filesystem instance.
///
/// `path` is either a database file path or [`MEMORY_PATH`]. The struct is
/// serde-friendly so host front-ends can embed it in their own config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFsOptions {
    pub path: String,
    #[serde(default)]
    pub cache: CacheOptions,
    /// Optional cooperative cancellation token, honored between transactions.
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl AgentFsOptions {
    pub fn new(path: impl Into<String>) -> Self {
        AgentFsOptions {
            path: path.into(),
            cache: CacheOptions::default(),
            cancel: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    pub fn with_cache(mut self, max_entries: u32) -> Self {
        self.cache = CacheOptions::enabled(max_entries);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Cooperative cancellation token.
///
/// Cancellation is checked at operation entry and before each transaction
/// begins; a transaction that has started always runs to completion, so no
/// partial state is ever observable. A canceled operation surfaces as
/// [`crate::FsError::Canceled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
