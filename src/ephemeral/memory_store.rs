use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::ephemeral::store_trait::{EphemeralStore, WindowUpdate};
use crate::error_handling::types::EphemeralError;

const SHARD_COUNT: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum ValueKind {
    Flag,
    Counter(i64),
    Window {
        /// member -> score (ms)
        members: HashMap<String, i64>,
        /// score (ms) -> member count at that score
        by_score: BTreeMap<i64, u32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    expires_at_ms: i64,
    value: ValueKind,
}

impl Entry {
    fn expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Default)]
struct Shard {
    entries: HashMap<String, Entry>,
}

/// In-process ephemeral store.
///
/// Keys are sharded over independent mutexes; every trait operation locks
/// exactly one shard for the duration of the (non-blocking) mutation, which
/// makes each single-key operation atomic. Expiry is lazy on access plus a
/// full purge whenever a snapshot is taken.
pub struct MemoryEphemeralStore {
    shards: Vec<Mutex<Shard>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
            snapshot_path: None,
        }
    }

    /// Open a store that persists snapshots at `path`, loading any previous
    /// snapshot so markers survive a process restart.
    pub fn with_snapshot<P: AsRef<Path>>(path: P) -> Result<Self, EphemeralError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new();
        store.snapshot_path = Some(path.clone());
        if path.exists() {
            store.load_snapshot(&path)?;
        }
        Ok(store)
    }

    fn shard_for(&self, key: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn load_snapshot(&self, path: &Path) -> Result<(), EphemeralError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<(String, Entry)> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("discarding unreadable ephemeral snapshot {}: {}", path.display(), e);
                return Ok(());
            }
        };
        let now_ms = Utc::now().timestamp_millis();
        let mut restored = 0usize;
        for (key, entry) in entries {
            if entry.expired(now_ms) {
                continue;
            }
            let mut shard = self
                .shard_for(&key)
                .lock()
                .map_err(|_| EphemeralError::LockPoisoned)?;
            shard.entries.insert(key, entry);
            restored += 1;
        }
        info!("restored {} ephemeral entries from {}", restored, path.display());
        Ok(())
    }

    /// Write all live entries to the configured snapshot path, dropping
    /// expired ones along the way. A no-op when no path was configured.
    pub fn snapshot(&self) -> Result<(), EphemeralError> {
        let Some(ref path) = self.snapshot_path else {
            return Ok(());
        };
        let now_ms = Utc::now().timestamp_millis();
        let mut entries: Vec<(String, Entry)> = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.lock().map_err(|_| EphemeralError::LockPoisoned)?;
            guard.entries.retain(|_, e| !e.expired(now_ms));
            for (key, entry) in guard.entries.iter() {
                entries.push((key.clone(), entry.clone()));
            }
        }
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string(&entries)
            .map_err(|e| EphemeralError::SnapshotFailed(std::io::Error::other(e)))?;
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, path)?;
        debug!("ephemeral snapshot of {} entries written to {}", entries.len(), path.display());
        Ok(())
    }
}

impl Default for MemoryEphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

fn expiry(now_ms: i64, ttl: Duration) -> i64 {
    now_ms + ttl.as_millis() as i64
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, EphemeralError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| EphemeralError::LockPoisoned)?;
        match shard.entries.get(key) {
            Some(entry) if !entry.expired(now_ms) => Ok(false),
            _ => {
                shard.entries.insert(
                    key.to_string(),
                    Entry {
                        expires_at_ms: expiry(now_ms, ttl),
                        value: ValueKind::Flag,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<(), EphemeralError> {
        let mut shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| EphemeralError::LockPoisoned)?;
        shard.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, EphemeralError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| EphemeralError::LockPoisoned)?;
        match shard.entries.get_mut(key) {
            Some(entry) if !entry.expired(now_ms) => match entry.value {
                ValueKind::Counter(ref mut n) => {
                    *n += 1;
                    Ok(*n)
                }
                // Key collision across kinds; reset as a counter.
                _ => {
                    entry.value = ValueKind::Counter(1);
                    Ok(1)
                }
            },
            _ => {
                shard.entries.insert(
                    key.to_string(),
                    Entry {
                        expires_at_ms: expiry(now_ms, ttl),
                        value: ValueKind::Counter(1),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn window_add_and_count(
        &self,
        key: &str,
        member: &str,
        score_ms: i64,
        prune_before_ms: i64,
        count_from_ms: i64,
        count_to_ms: i64,
        ttl: Duration,
    ) -> Result<WindowUpdate, EphemeralError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| EphemeralError::LockPoisoned)?;

        let entry = shard.entries.entry(key.to_string()).or_insert_with(|| Entry {
            expires_at_ms: expiry(now_ms, ttl),
            value: ValueKind::Window {
                members: HashMap::new(),
                by_score: BTreeMap::new(),
            },
        });
        if entry.expired(now_ms) || !matches!(entry.value, ValueKind::Window { .. }) {
            entry.value = ValueKind::Window {
                members: HashMap::new(),
                by_score: BTreeMap::new(),
            };
        }
        // Each touch refreshes the set's TTL, like EXPIRE after ZADD.
        entry.expires_at_ms = expiry(now_ms, ttl);

        let ValueKind::Window {
            ref mut members,
            ref mut by_score,
        } = entry.value
        else {
            unreachable!("window entry was just normalized");
        };

        let newly_added = !members.contains_key(member);
        if newly_added {
            members.insert(member.to_string(), score_ms);
            *by_score.entry(score_ms).or_insert(0) += 1;
        }

        let stale: Vec<i64> = by_score
            .range(..=prune_before_ms)
            .map(|(score, _)| *score)
            .collect();
        for score in stale {
            by_score.remove(&score);
        }
        members.retain(|_, score| *score > prune_before_ms);

        let count = by_score
            .range(count_from_ms..=count_to_ms)
            .map(|(_, n)| u64::from(*n))
            .sum();

        Ok(WindowUpdate { newly_added, count })
    }

    async fn window_count(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<u64, EphemeralError> {
        let now_ms = Utc::now().timestamp_millis();
        let shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| EphemeralError::LockPoisoned)?;
        match shard.entries.get(key) {
            Some(entry) if !entry.expired(now_ms) => match entry.value {
                ValueKind::Window { ref by_score, .. } => Ok(by_score
                    .range(from_ms..=to_ms)
                    .map(|(_, n)| u64::from(*n))
                    .sum()),
                _ => Ok(0),
            },
            _ => Ok(0),
        }
    }
}
