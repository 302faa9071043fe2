// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Durable JSON caches for resolved blocks and daily rewards.
//!
//! Saves run as a locked read-modify-merge: an exclusive lock on a sibling
//! `.lock` file is held across re-reading the file, merging the in-memory
//! entries into the on-disk state and atomically replacing the file, so
//! concurrent flushes never drop each other's entries. Bypass mode makes
//! lookups miss while saves still merge through the same path.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use ctc_chain::BlockRef;

/// Date (ISO) to resolved block
pub type BlockMap = HashMap<String, BlockRef>;
/// Account name to date (ISO) to decimal reward
pub type RewardMap = HashMap<String, HashMap<String, f64>>;

fn load_map<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    match fs::read(path).ok().and_then(|bytes| serde_json::from_slice(&bytes).ok()) {
        Some(map) => map,
        None => {
            tracing::warn!("cache file {} is unreadable, starting empty", path.display());
            T::default()
        }
    }
}

/// Merge the in-memory entries into the current file contents under an
/// exclusive file lock, then atomically replace the file.
fn save_merged<T, F>(path: &Path, merge: F) -> Result<()>
where
    T: Default + Serialize + DeserializeOwned,
    F: FnOnce(&mut T),
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating cache directory {}", parent.display()))?;
    }

    let lock_path = path.with_extension("lock");
    let lock = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("opening lock file {}", lock_path.display()))?;
    lock.lock_exclusive()
        .with_context(|| format!("locking {}", lock_path.display()))?;

    let result = (|| -> Result<()> {
        let mut on_disk: T = load_map(path);
        merge(&mut on_disk);

        let tmp_path = path.with_extension("tmp");
        let tmp = File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        serde_json::to_writer(std::io::BufWriter::new(tmp), &on_disk)
            .context("serializing cache")?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    })();

    let _ = FileExt::unlock(&lock);
    result
}

/// Durable date-to-block cache.
pub struct BlockCache {
    path: PathBuf,
    entries: BlockMap,
    bypass: bool,
}

impl BlockCache {
    pub fn open(path: impl Into<PathBuf>, bypass: bool) -> Self {
        let path = path.into();
        let entries = if bypass { BlockMap::new() } else { load_map(&path) };
        Self { path, entries, bypass }
    }

    /// Whether this date can be skipped. Always false in bypass mode.
    pub fn is_cached(&self, date: &str) -> bool {
        !self.bypass && self.entries.contains_key(date)
    }

    /// The resolved block for a date, cached or freshly inserted.
    pub fn lookup(&self, date: &str) -> Option<&BlockRef> {
        self.entries.get(date)
    }

    pub fn insert(&mut self, date: String, block: BlockRef) {
        self.entries.insert(date, block);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let entries = self.entries.clone();
        save_merged::<BlockMap, _>(&self.path, move |on_disk| {
            for (date, block) in entries {
                on_disk.insert(date, block);
            }
        })
    }
}

/// Durable per-account daily reward cache.
pub struct RewardCache {
    path: PathBuf,
    entries: RewardMap,
    bypass: bool,
}

impl RewardCache {
    pub fn open(path: impl Into<PathBuf>, bypass: bool) -> Self {
        let path = path.into();
        let entries = if bypass { RewardMap::new() } else { load_map(&path) };
        Self { path, entries, bypass }
    }

    /// Whether this account/date pair can be skipped. Always false in
    /// bypass mode.
    pub fn contains(&self, name: &str, date: &str) -> bool {
        !self.bypass
            && self.entries.get(name).map(|dates| dates.contains_key(date)).unwrap_or(false)
    }

    pub fn amount(&self, name: &str, date: &str) -> Option<f64> {
        self.entries.get(name).and_then(|dates| dates.get(date)).copied()
    }

    pub fn insert(&mut self, name: String, date: String, amount: f64) {
        self.entries.entry(name).or_default().insert(date, amount);
    }

    pub fn entries(&self) -> &RewardMap {
        &self.entries
    }

    pub fn save(&self) -> Result<()> {
        let entries = self.entries.clone();
        save_merged::<RewardMap, _>(&self.path, move |on_disk| {
            for (name, dates) in entries {
                let account = on_disk.entry(name).or_default();
                for (date, amount) in dates {
                    account.insert(date, amount);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn block(number: u64) -> BlockRef {
        BlockRef { number, hash: format!("0x{number:064x}") }
    }

    #[test]
    fn block_cache_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("block_cache.json");

        let mut cache = BlockCache::open(&path, false);
        cache.insert("2024-08-29".into(), block(1));
        cache.save().unwrap();

        let reopened = BlockCache::open(&path, false);
        assert!(reopened.is_cached("2024-08-29"));
        assert_eq!(reopened.lookup("2024-08-29"), Some(&block(1)));
    }

    #[test]
    fn resolving_twice_yields_identical_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("block_cache.json");

        let mut cache = BlockCache::open(&path, false);
        let resolved = block(5760);
        cache.insert("2024-08-30".into(), resolved.clone());
        cache.save().unwrap();

        // Second run: the date is served from cache, identical to the first.
        let second = BlockCache::open(&path, false);
        assert_eq!(second.lookup("2024-08-30"), Some(&resolved));
    }

    #[test]
    fn concurrent_writers_keep_each_others_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("block_cache.json");

        let mut first = BlockCache::open(&path, false);
        let mut second = BlockCache::open(&path, false);
        first.insert("2024-09-01".into(), block(100));
        second.insert("2024-09-02".into(), block(200));

        first.save().unwrap();
        second.save().unwrap();

        let merged = BlockCache::open(&path, false);
        assert_eq!(merged.lookup("2024-09-01"), Some(&block(100)));
        assert_eq!(merged.lookup("2024-09-02"), Some(&block(200)));
    }

    #[test]
    fn bypass_skips_reads_but_still_saves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("block_cache.json");

        let mut seeded = BlockCache::open(&path, false);
        seeded.insert("2024-09-01".into(), block(100));
        seeded.save().unwrap();

        let mut bypassing = BlockCache::open(&path, true);
        assert!(!bypassing.is_cached("2024-09-01"));
        bypassing.insert("2024-09-02".into(), block(200));
        bypassing.save().unwrap();

        let merged = BlockCache::open(&path, false);
        assert_eq!(merged.lookup("2024-09-01"), Some(&block(100)));
        assert_eq!(merged.lookup("2024-09-02"), Some(&block(200)));
    }

    #[test]
    fn malformed_cache_file_starts_empty_and_recovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("block_cache.json");
        fs::write(&path, b"{ not json").unwrap();

        let mut cache = BlockCache::open(&path, false);
        assert!(cache.is_empty());
        cache.insert("2024-09-03".into(), block(300));
        cache.save().unwrap();

        let reopened = BlockCache::open(&path, false);
        assert_eq!(reopened.lookup("2024-09-03"), Some(&block(300)));
    }

    #[test]
    fn reward_cache_merges_per_account_and_date() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reward_cache.json");

        let mut first = RewardCache::open(&path, false);
        first.insert("alice".into(), "2024-09-01".into(), 1.5);
        first.save().unwrap();

        let mut second = RewardCache::open(&path, false);
        second.insert("alice".into(), "2024-09-02".into(), 2.5);
        second.insert("bob".into(), "2024-09-01".into(), 0.0);
        second.save().unwrap();

        let merged = RewardCache::open(&path, false);
        assert_eq!(merged.amount("alice", "2024-09-01"), Some(1.5));
        assert_eq!(merged.amount("alice", "2024-09-02"), Some(2.5));
        assert_eq!(merged.amount("bob", "2024-09-01"), Some(0.0));
        assert!(merged.contains("bob", "2024-09-01"));
        assert!(!merged.contains("bob", "2024-09-02"));
    }
}
