use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::job::{JobResult, JobState, RenderJob};
use crate::queue::{FailureOutcome, JobQueue, JobRecord, QueueError, Result};

/// Durable queue on top of a Fjall keyspace.
///
/// Partition layout:
/// - `jobs` partition: uuid (16 bytes) → JobRecord (JSON)
/// - `pending` partition: u64 (big-endian) → uuid, a FIFO index into `jobs`
/// - `metadata` partition: "next_seq" → u64 (atomic counter)
///
/// The sequence counter lives in memory and is mirrored to `metadata`
/// after every allocation. Allocation and mirror happen under one lock,
/// so the persisted value only ever grows; reopening after a crash
/// resumes at (or past) the last persisted value and never reuses a key.
pub struct FjallJobQueue {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    pending: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
    max_attempts: u32,
    // serializes claims so two workers never dequeue the same job
    claim: Mutex<()>,
    // serializes sequence allocation with its mirror to `metadata`
    seq_guard: Mutex<()>,
}

impl FjallJobQueue {
    pub fn open<P: AsRef<Path>>(path: P, max_attempts: u32) -> Result<Self> {
        info!("Opening job queue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let pending = keyspace.open_partition("pending", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!("Job queue opened, current sequence: {}", current_seq);

        Ok(Self {
            keyspace,
            jobs,
            pending,
            metadata,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
            max_attempts,
            claim: Mutex::new(()),
            seq_guard: Mutex::new(()),
        })
    }

    /// Flush all writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    fn next_seq(&self) -> u64 {
        self.seq_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn put_record(&self, record: &JobRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.jobs.insert(record.id.as_bytes(), value)?;
        Ok(())
    }

    fn load_record(&self, id: Uuid) -> Result<JobRecord> {
        let raw = self
            .jobs
            .get(id.as_bytes())?
            .ok_or(QueueError::JobNotFound(id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn push_pending(&self, id: Uuid) -> Result<u64> {
        let _guard = self.seq_guard.lock().unwrap_or_else(|e| e.into_inner());
        let seq = self.next_seq();
        self.pending.insert(seq.to_be_bytes(), id.as_bytes())?;
        self.metadata
            .insert(b"next_seq", (seq + 1).to_be_bytes())?;
        Ok(seq)
    }
}

#[async_trait]
impl JobQueue for FjallJobQueue {
    async fn enqueue(&self, job: RenderJob) -> Result<Uuid> {
        let record = JobRecord::new(job);
        self.put_record(&record)?;
        let seq = self.push_pending(record.id)?;

        debug!(seq, job_id = %record.id, "Job enqueued");

        Ok(record.id)
    }

    async fn enqueue_many(&self, jobs: Vec<RenderJob>) -> Result<Vec<Uuid>> {
        let records: Vec<JobRecord> = jobs.into_iter().map(JobRecord::new).collect();

        // Single write batch: either every job lands or none do. The
        // sequence guard covers allocation through commit so a concurrent
        // enqueue cannot mirror a lower next_seq afterwards.
        let _guard = self.seq_guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut batch = self.keyspace.batch();
        let mut last_seq = 0u64;
        for record in &records {
            batch.insert(&self.jobs, record.id.as_bytes(), serde_json::to_vec(record)?);
            let seq = self.next_seq();
            batch.insert(&self.pending, seq.to_be_bytes(), record.id.as_bytes());
            last_seq = seq;
        }
        if !records.is_empty() {
            batch.insert(&self.metadata, b"next_seq", (last_seq + 1).to_be_bytes());
        }
        batch.commit()?;
        drop(_guard);

        debug!(count = records.len(), "Batch of jobs enqueued");

        Ok(records.iter().map(|r| r.id).collect())
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>> {
        let _guard = self.claim.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            let entry = match self.pending.iter().next() {
                None => return Ok(None),
                Some(item) => item?,
            };
            let (seq_key, id_bytes) = entry;
            self.pending.remove(seq_key)?;

            let Some(raw) = self.jobs.get(&id_bytes)? else {
                warn!("pending entry without a job record, skipping");
                continue;
            };
            let mut record: JobRecord = serde_json::from_slice(&raw)?;
            if record.state != JobState::Queued {
                continue;
            }

            record.state = JobState::Active;
            record.attempts += 1;
            record.updated_at = Utc::now();
            self.put_record(&record)?;

            debug!(job_id = %record.id, attempt = record.attempts, "Job claimed");

            return Ok(Some(record));
        }
    }

    async fn complete(&self, id: Uuid, result: JobResult) -> Result<()> {
        let mut record = self.load_record(id)?;
        record.state = JobState::Completed;
        record.result = Some(result);
        record.error = None;
        record.updated_at = Utc::now();
        self.put_record(&record)?;

        debug!(job_id = %id, "Job completed");

        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<FailureOutcome> {
        let mut record = self.load_record(id)?;
        record.error = Some(error.to_string());
        record.updated_at = Utc::now();

        if record.attempts >= self.max_attempts {
            record.state = JobState::Failed;
            self.put_record(&record)?;
            info!(job_id = %id, attempts = record.attempts, "Job failed permanently");
            return Ok(FailureOutcome::Terminal);
        }

        record.state = JobState::Queued;
        self.put_record(&record)?;
        self.push_pending(id)?;
        debug!(job_id = %id, attempts = record.attempts, "Job re-queued after failure");

        Ok(FailureOutcome::Retried)
    }

    async fn status(&self, id: Uuid) -> Result<Option<JobRecord>> {
        match self.jobs.get(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn prune_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(7));
        let mut removed = 0usize;

        let mut stale = Vec::new();
        for item in self.jobs.iter() {
            let (key, value) = item?;
            let record: JobRecord = match serde_json::from_slice(&value) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "unreadable job record, removing");
                    stale.push(key);
                    continue;
                }
            };
            if record.is_terminal() && record.updated_at < cutoff {
                stale.push(key);
            }
        }
        for key in stale {
            self.jobs.remove(key)?;
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "Pruned expired job records");
        }

        Ok(removed)
    }
}
