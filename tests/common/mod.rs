#![allow(dead_code)]

use agentfs::{AgentFs, AgentFsOptions};

/// Open a fresh in-memory filesystem.
pub fn open_memory() -> AgentFs {
    AgentFs::open(AgentFsOptions::in_memory()).unwrap()
}

/// Open a fresh in-memory filesystem with the resolution cache enabled.
pub fn open_memory_cached(max_entries: u32) -> AgentFs {
    AgentFs::open(AgentFsOptions::in_memory().with_cache(max_entries)).unwrap()
}

/// Seed a single base-layer file and return its inode id.
pub fn seed_file(fs: &AgentFs, path: &str, mode: u32, content: &[u8]) -> u64 {
    fs.seed_base(|seed| {
        seed.file(path, mode, content)?;
        Ok(())
    })
    .unwrap();
    fs.stat(path).unwrap().ino
}

/// Seed a base-layer directory and return its inode id.
pub fn seed_dir(fs: &AgentFs, path: &str) -> u64 {
    fs.seed_base(|seed| {
        seed.dir(path, 0o755)?;
        Ok(())
    })
    .unwrap();
    fs.stat(path).unwrap().ino
}

/// Names from a readdir, in returned order.
pub fn names(fs: &AgentFs, path: &str) -> Vec<String> {
    fs.readdir(path)
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect()
}
