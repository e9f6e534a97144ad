//! Per-caller usage ledger.
//!
//! Records are written best-effort after each successful render; a write
//! failure is logged and never fails the job that produced it.

use std::path::Path;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::job::OutputKind;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, UsageError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub caller_id: String,
    pub job_id: Uuid,
    pub output: OutputKind,
    pub bytes: u64,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

/// Fjall-backed usage log, keyed by caller and time so one caller's
/// history is a single prefix scan.
#[derive(Clone)]
pub struct UsageLedger {
    keyspace: Keyspace,
    entries: PartitionHandle,
}

impl UsageLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening usage ledger at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;
        let entries = keyspace.open_partition("entries", PartitionCreateOptions::default())?;

        Ok(Self { keyspace, entries })
    }

    pub fn record(&self, entry: &UsageEntry) -> Result<()> {
        let key = encode_key(&entry.caller_id, entry.at, entry.job_id);
        self.entries.insert(key, serde_json::to_vec(entry)?)?;
        debug!(caller_id = %entry.caller_id, job_id = %entry.job_id, "Usage recorded");
        Ok(())
    }

    /// A caller's entries in chronological order, up to `limit`.
    pub fn for_caller(&self, caller_id: &str, limit: usize) -> Result<Vec<UsageEntry>> {
        let mut prefix = caller_id.as_bytes().to_vec();
        prefix.push(0);

        let mut out = Vec::new();
        for item in self.entries.prefix(prefix).take(limit) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

fn encode_key(caller_id: &str, at: DateTime<Utc>, job_id: Uuid) -> Vec<u8> {
    let mut key = caller_id.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&(at.timestamp_millis().max(0) as u64).to_be_bytes());
    key.extend_from_slice(job_id.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(caller: &str, bytes: u64) -> UsageEntry {
        UsageEntry {
            caller_id: caller.to_string(),
            job_id: Uuid::now_v7(),
            output: OutputKind::Pdf,
            bytes,
            duration_ms: 120,
            at: Utc::now(),
        }
    }

    #[test]
    fn record_and_scan_by_caller() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = UsageLedger::open(temp_dir.path()).unwrap();

        ledger.record(&entry("acme", 100)).unwrap();
        ledger.record(&entry("acme", 200)).unwrap();
        ledger.record(&entry("other", 300)).unwrap();
        ledger.persist().unwrap();

        let acme = ledger.for_caller("acme", 10).unwrap();
        assert_eq!(acme.len(), 2);
        assert!(acme.iter().all(|e| e.caller_id == "acme"));

        let none = ledger.for_caller("missing", 10).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn limit_caps_results() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = UsageLedger::open(temp_dir.path()).unwrap();

        for i in 0..5 {
            ledger.record(&entry("acme", i)).unwrap();
        }
        assert_eq!(ledger.for_caller("acme", 3).unwrap().len(), 3);
    }
}
