//! Batch progress tracking for bulk submissions.
//!
//! Counters are plain atomics mirrored into a Fjall partition, the same
//! scheme the queue uses for its sequence numbers. Result URLs are keyed
//! by completion order so a range scan returns them in the order jobs
//! finished.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Batch already exists: {0}")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, BatchError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchMeta {
    total: u64,
    created_at: DateTime<Utc>,
}

/// Point-in-time view of one batch.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub total: u64,
    pub completed: u64,
    pub urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl BatchProgress {
    pub fn percentage(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        self.completed * 100 / self.total
    }

    /// Every item reached a terminal state. Failed items count toward
    /// completion but contribute no URL, so this can be true with fewer
    /// URLs than `total`.
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Tracks per-batch completion counters and result URLs.
///
/// Partition layout:
/// - `batches` partition: batch id → BatchMeta (JSON)
/// - `counters` partition: batch id → u64 (big-endian), completions so far
/// - `results` partition: batch id ++ 0x00 ++ u64 (big-endian) → URL
pub struct BatchStore {
    keyspace: Keyspace,
    batches: PartitionHandle,
    counters: PartitionHandle,
    results: PartitionHandle,
    live_counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl BatchStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening batch store at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;
        let batches = keyspace.open_partition("batches", PartitionCreateOptions::default())?;
        let counters = keyspace.open_partition("counters", PartitionCreateOptions::default())?;
        let results = keyspace.open_partition("results", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            batches,
            counters,
            results,
            live_counters: Mutex::new(HashMap::new()),
        })
    }

    /// Register a new batch with a fixed item count. Duplicate ids are
    /// rejected so a retried bulk submission cannot corrupt the counter.
    pub fn init_batch(&self, batch_id: &str, total: u64) -> Result<()> {
        if self.batches.get(batch_id.as_bytes())?.is_some() {
            return Err(BatchError::Duplicate(batch_id.to_string()));
        }

        let meta = BatchMeta {
            total,
            created_at: Utc::now(),
        };
        self.batches
            .insert(batch_id.as_bytes(), serde_json::to_vec(&meta)?)?;
        self.counters.insert(batch_id.as_bytes(), 0u64.to_be_bytes())?;

        debug!(batch_id, total, "Batch registered");

        Ok(())
    }

    /// Count one finished item. `url` is `None` for items that failed
    /// permanently; they still advance the counter so the batch can reach
    /// 100% even with failures.
    ///
    /// The increment and the mirrored write happen under one lock, so the
    /// persisted value is never overwritten by a slower writer carrying a
    /// stale lower count.
    pub fn record_completion(&self, batch_id: &str, url: Option<&str>) -> Result<u64> {
        let mut live = self.live_counters.lock().unwrap_or_else(|e| e.into_inner());
        let counter = Self::counter_entry(&self.counters, &mut live, batch_id)?;
        let completed = counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .insert(batch_id.as_bytes(), completed.to_be_bytes())?;

        if let Some(url) = url {
            self.results.insert(result_key(batch_id, completed), url)?;
        }
        drop(live);

        debug!(batch_id, completed, "Batch item finished");

        Ok(completed)
    }

    pub fn progress(&self, batch_id: &str) -> Result<Option<BatchProgress>> {
        let Some(raw) = self.batches.get(batch_id.as_bytes())? else {
            return Ok(None);
        };
        let meta: BatchMeta = serde_json::from_slice(&raw)?;
        let completed = self.counter_for(batch_id)?.load(Ordering::SeqCst);

        let mut urls = Vec::new();
        let mut prefix = batch_id.as_bytes().to_vec();
        prefix.push(0);
        for item in self.results.prefix(prefix) {
            let (_, value) = item?;
            urls.push(String::from_utf8_lossy(&value).into_owned());
        }

        Ok(Some(BatchProgress {
            total: meta.total,
            completed,
            urls,
            created_at: meta.created_at,
        }))
    }

    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// In-memory counter for a batch, seeded from the persisted value the
    /// first time it is touched after a restart.
    fn counter_for(&self, batch_id: &str) -> Result<Arc<AtomicU64>> {
        let mut live = self.live_counters.lock().unwrap_or_else(|e| e.into_inner());
        Self::counter_entry(&self.counters, &mut live, batch_id)
    }

    fn counter_entry(
        counters: &PartitionHandle,
        live: &mut HashMap<String, Arc<AtomicU64>>,
        batch_id: &str,
    ) -> Result<Arc<AtomicU64>> {
        if let Some(counter) = live.get(batch_id) {
            return Ok(Arc::clone(counter));
        }

        let persisted = counters
            .get(batch_id.as_bytes())?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);
        let counter = Arc::new(AtomicU64::new(persisted));
        live.insert(batch_id.to_string(), Arc::clone(&counter));
        Ok(counter)
    }
}

fn result_key(batch_id: &str, seq: u64) -> Vec<u8> {
    let mut key = batch_id.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn duplicate_batch_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = BatchStore::open(temp_dir.path()).unwrap();

        store.init_batch("b1", 5).unwrap();
        let err = store.init_batch("b1", 5).unwrap_err();
        assert!(matches!(err, BatchError::Duplicate(_)));
    }

    #[test]
    fn progress_counts_and_urls() {
        let temp_dir = TempDir::new().unwrap();
        let store = BatchStore::open(temp_dir.path()).unwrap();

        store.init_batch("b1", 3).unwrap();
        store
            .record_completion("b1", Some("https://cdn/x1.pdf"))
            .unwrap();
        store.record_completion("b1", None).unwrap();

        let progress = store.progress("b1").unwrap().unwrap();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.percentage(), 66);
        assert!(!progress.is_complete());
        // the failed item advanced the counter but left no URL
        assert_eq!(progress.urls, vec!["https://cdn/x1.pdf".to_string()]);

        store
            .record_completion("b1", Some("https://cdn/x3.pdf"))
            .unwrap();
        let progress = store.progress("b1").unwrap().unwrap();
        assert_eq!(progress.percentage(), 100);
        assert!(progress.is_complete());
    }

    #[test]
    fn empty_batch_is_vacuously_complete() {
        let progress = BatchProgress {
            total: 0,
            completed: 0,
            urls: Vec::new(),
            created_at: Utc::now(),
        };
        assert!(progress.is_complete());
        assert_eq!(progress.percentage(), 0);
    }

    #[test]
    fn unknown_batch_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = BatchStore::open(temp_dir.path()).unwrap();
        assert!(store.progress("nope").unwrap().is_none());
    }

    #[test]
    fn counter_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = BatchStore::open(temp_dir.path()).unwrap();
            store.init_batch("b1", 2).unwrap();
            store
                .record_completion("b1", Some("https://cdn/a.pdf"))
                .unwrap();
            store.flush().unwrap();
        }

        let store = BatchStore::open(temp_dir.path()).unwrap();
        let progress = store.progress("b1").unwrap().unwrap();
        assert_eq!(progress.completed, 1);

        store
            .record_completion("b1", Some("https://cdn/b.pdf"))
            .unwrap();
        let progress = store.progress("b1").unwrap().unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.urls.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_completions_all_counted() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(BatchStore::open(temp_dir.path()).unwrap());
        store.init_batch("b1", 20).unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .record_completion("b1", Some(&format!("https://cdn/{i}.pdf")))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let progress = store.progress("b1").unwrap().unwrap();
        assert_eq!(progress.completed, 20);
        assert_eq!(progress.urls.len(), 20);
        assert!(progress.is_complete());
    }

    #[tokio::test]
    async fn concurrent_completions_persist_the_final_count() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = Arc::new(BatchStore::open(temp_dir.path()).unwrap());
            store.init_batch("b1", 64).unwrap();

            let mut handles = Vec::new();
            for _ in 0..64 {
                let store = Arc::clone(&store);
                handles.push(tokio::task::spawn_blocking(move || {
                    store.record_completion("b1", None).unwrap();
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
            store.flush().unwrap();
        }

        // a mid-batch restart must seed from the true count, not a value
        // some slow writer left behind
        let store = BatchStore::open(temp_dir.path()).unwrap();
        let progress = store.progress("b1").unwrap().unwrap();
        assert_eq!(progress.completed, 64);
        assert!(progress.is_complete());
    }
}
