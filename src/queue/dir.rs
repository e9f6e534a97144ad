use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::job::{JobResult, JobState, RenderJob};
use crate::queue::{FailureOutcome, JobQueue, JobRecord, QueueError, Result};

/// Filesystem-backed queue: one JSON file per job.
///
/// Meant for local development and tests where an embedded database is
/// overkill. Records are written to a `.tmp` sibling and renamed into
/// place so readers never see a partial file. FIFO order falls out of
/// the v7 job ids, which sort by creation time.
pub struct DirQueue {
    root: PathBuf,
    max_attempts: u32,
    claim: Mutex<()>,
}

impl DirQueue {
    pub async fn open(root: impl Into<PathBuf>, max_attempts: u32) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!("Opening directory queue at: {}", root.display());
        Ok(Self {
            root,
            max_attempts,
            claim: Mutex::new(()),
        })
    }

    fn job_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn write_record(&self, record: &JobRecord) -> Result<()> {
        let path = self.job_path(record.id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_record(&self, id: Uuid) -> Result<Option<JobRecord>> {
        match fs::read(self.job_path(id)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Job ids on disk, oldest first.
    async fn list_ids(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                match stem.parse::<Uuid>() {
                    Ok(id) => ids.push(id),
                    Err(_) => warn!(file = %path.display(), "ignoring non-job file in queue dir"),
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl JobQueue for DirQueue {
    async fn enqueue(&self, job: RenderJob) -> Result<Uuid> {
        let record = JobRecord::new(job);
        self.write_record(&record).await?;
        debug!(job_id = %record.id, "Job enqueued");
        Ok(record.id)
    }

    async fn enqueue_many(&self, jobs: Vec<RenderJob>) -> Result<Vec<Uuid>> {
        let records: Vec<JobRecord> = jobs.into_iter().map(JobRecord::new).collect();

        // Stage every record first; publishing is the rename step, so a
        // serialization or write failure leaves nothing visible.
        let mut staged = Vec::with_capacity(records.len());
        for record in &records {
            let tmp = self.job_path(record.id).with_extension("tmp");
            let encoded = match serde_json::to_vec_pretty(record) {
                Ok(encoded) => encoded,
                Err(err) => {
                    cleanup_staged(&staged).await;
                    return Err(err.into());
                }
            };
            if let Err(err) = fs::write(&tmp, encoded).await {
                cleanup_staged(&staged).await;
                return Err(err.into());
            }
            staged.push(tmp);
        }
        for (record, tmp) in records.iter().zip(&staged) {
            fs::rename(tmp, self.job_path(record.id)).await?;
        }

        debug!(count = records.len(), "Batch of jobs enqueued");

        Ok(records.iter().map(|r| r.id).collect())
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>> {
        let _guard = self.claim.lock().await;

        for id in self.list_ids().await? {
            let Some(mut record) = self.load_record(id).await? else {
                continue;
            };
            if record.state != JobState::Queued {
                continue;
            }
            record.state = JobState::Active;
            record.attempts += 1;
            record.updated_at = Utc::now();
            self.write_record(&record).await?;
            debug!(job_id = %record.id, attempt = record.attempts, "Job claimed");
            return Ok(Some(record));
        }

        Ok(None)
    }

    async fn complete(&self, id: Uuid, result: JobResult) -> Result<()> {
        let mut record = self
            .load_record(id)
            .await?
            .ok_or(QueueError::JobNotFound(id))?;
        record.state = JobState::Completed;
        record.result = Some(result);
        record.error = None;
        record.updated_at = Utc::now();
        self.write_record(&record).await?;
        debug!(job_id = %id, "Job completed");
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<FailureOutcome> {
        let mut record = self
            .load_record(id)
            .await?
            .ok_or(QueueError::JobNotFound(id))?;
        record.error = Some(error.to_string());
        record.updated_at = Utc::now();

        if record.attempts >= self.max_attempts {
            record.state = JobState::Failed;
            self.write_record(&record).await?;
            info!(job_id = %id, attempts = record.attempts, "Job failed permanently");
            return Ok(FailureOutcome::Terminal);
        }

        record.state = JobState::Queued;
        self.write_record(&record).await?;
        debug!(job_id = %id, attempts = record.attempts, "Job re-queued after failure");
        Ok(FailureOutcome::Retried)
    }

    async fn status(&self, id: Uuid) -> Result<Option<JobRecord>> {
        self.load_record(id).await
    }

    async fn prune_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(7));
        let mut removed = 0usize;

        for id in self.list_ids().await? {
            let Some(record) = self.load_record(id).await? else {
                continue;
            };
            if record.is_terminal() && record.updated_at < cutoff {
                fs::remove_file(self.job_path(id)).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Pruned expired job records");
        }

        Ok(removed)
    }
}

async fn cleanup_staged(staged: &[PathBuf]) {
    for tmp in staged {
        if let Err(err) = fs::remove_file(tmp).await {
            warn!(file = %tmp.display(), error = %err, "failed to remove staged job file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSource, OutputKind, RenderOptions};
    use tempfile::TempDir;

    fn html_job(markup: &str) -> RenderJob {
        RenderJob {
            output: OutputKind::Pdf,
            source: JobSource::Html(markup.to_string()),
            data: None,
            options: RenderOptions::default(),
            caller_id: None,
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn file_per_job_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let queue = DirQueue::open(temp_dir.path(), 3).await.unwrap();

        let id = queue.enqueue(html_job("<p>hi</p>")).await.unwrap();
        assert!(temp_dir.path().join(format!("{id}.json")).exists());

        let claimed = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.state, JobState::Active);

        // dequeue skips active jobs
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_is_oldest_first() {
        let temp_dir = TempDir::new().unwrap();
        let queue = DirQueue::open(temp_dir.path(), 3).await.unwrap();

        let first = queue.enqueue(html_job("<p>1</p>")).await.unwrap();
        let second = queue.enqueue(html_job("<p>2</p>")).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, first);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn terminal_failure_after_max_attempts() {
        let temp_dir = TempDir::new().unwrap();
        let queue = DirQueue::open(temp_dir.path(), 1).await.unwrap();

        let id = queue.enqueue(html_job("<p>hi</p>")).await.unwrap();
        queue.dequeue().await.unwrap();

        let outcome = queue.fail(id, "render blew up").await.unwrap();
        assert_eq!(outcome, FailureOutcome::Terminal);

        let record = queue.status(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
    }

    #[tokio::test]
    async fn ignores_unrelated_files() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("notes.json"), b"{}")
            .await
            .unwrap();
        tokio::fs::write(temp_dir.path().join("README.md"), b"hello")
            .await
            .unwrap();

        let queue = DirQueue::open(temp_dir.path(), 3).await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());
    }
}
