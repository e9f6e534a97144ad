use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::BatchStore;
use crate::observability::Metrics;
use crate::queue::{FailureOutcome, JobQueue, JobRecord};
use crate::usage::{UsageEntry, UsageLedger};
use crate::worker::{JobProcessor, RateLimiter};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub rate_limit: u32,
    pub rate_window: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_millis(500),
            rate_limit: 10,
            rate_window: Duration::from_secs(1),
        }
    }
}

/// Polls the queue with N concurrent workers behind a shared rate limit.
///
/// Completion bookkeeping order matters: the queue record is finalized
/// first, then the batch counter, then the usage ledger. Batch and usage
/// writes are best-effort and never change the job's outcome.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    batches: Arc<BatchStore>,
    usage: Arc<UsageLedger>,
    processor: Arc<dyn JobProcessor>,
    metrics: Arc<Metrics>,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        batches: Arc<BatchStore>,
        usage: Arc<UsageLedger>,
        processor: Arc<dyn JobProcessor>,
        metrics: Arc<Metrics>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            batches,
            usage,
            processor,
            metrics,
            settings,
        }
    }

    /// Spawn the worker tasks. They run until `shutdown` is cancelled.
    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let limiter = Arc::new(RateLimiter::new(
            self.settings.rate_limit,
            self.settings.rate_window,
        ));

        info!(
            concurrency = self.settings.concurrency,
            rate_limit = self.settings.rate_limit,
            "Starting worker pool"
        );

        (0..self.settings.concurrency)
            .map(|worker_id| {
                let worker = Worker {
                    worker_id,
                    queue: Arc::clone(&self.queue),
                    batches: Arc::clone(&self.batches),
                    usage: Arc::clone(&self.usage),
                    processor: Arc::clone(&self.processor),
                    metrics: Arc::clone(&self.metrics),
                    limiter: Arc::clone(&limiter),
                    poll_interval: self.settings.poll_interval,
                };
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run(shutdown).await })
            })
            .collect()
    }
}

struct Worker {
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    batches: Arc<BatchStore>,
    usage: Arc<UsageLedger>,
    processor: Arc<dyn JobProcessor>,
    metrics: Arc<Metrics>,
    limiter: Arc<RateLimiter>,
    poll_interval: Duration,
}

impl Worker {
    async fn run(&self, shutdown: CancellationToken) {
        debug!(worker_id = self.worker_id, "Worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.limiter.acquire() => {}
            }

            let record = match self.queue.dequeue().await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    continue;
                }
                Err(err) => {
                    error!(worker_id = self.worker_id, error = %err, "dequeue failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    continue;
                }
            };

            self.handle(record).await;
        }

        debug!(worker_id = self.worker_id, "Worker stopped");
    }

    async fn handle(&self, record: JobRecord) {
        match self.processor.process(&record).await {
            Ok(processed) => {
                let url = processed.result.url.clone();
                let duration_ms = processed.result.duration_ms;
                if let Err(err) = self.queue.complete(record.id, processed.result).await {
                    error!(job_id = %record.id, error = %err, "failed to mark job completed");
                    return;
                }
                self.metrics.job_completed();

                if let Some(batch_id) = &record.job.batch_id {
                    if let Err(err) = self.batches.record_completion(batch_id, url.as_deref()) {
                        warn!(batch_id, job_id = %record.id, error = %err, "batch bookkeeping failed");
                    }
                }

                if let Some(caller_id) = &record.job.caller_id {
                    let entry = UsageEntry {
                        caller_id: caller_id.clone(),
                        job_id: record.id,
                        output: record.job.output,
                        bytes: processed.artifact_bytes,
                        duration_ms,
                        at: chrono::Utc::now(),
                    };
                    let usage = Arc::clone(&self.usage);
                    // best effort, off the hot path
                    tokio::spawn(async move {
                        if let Err(err) = usage.record(&entry) {
                            warn!(job_id = %entry.job_id, error = %err, "usage write failed");
                        }
                    });
                }
            }
            Err(err) => {
                warn!(
                    job_id = %record.id,
                    attempt = record.attempts,
                    error = %err,
                    "job attempt failed"
                );
                match self.queue.fail(record.id, &err.to_string()).await {
                    Ok(FailureOutcome::Retried) => {}
                    Ok(FailureOutcome::Terminal) => {
                        self.metrics.job_failed();
                        // failed items still advance the batch so it can finish
                        if let Some(batch_id) = &record.job.batch_id {
                            if let Err(err) = self.batches.record_completion(batch_id, None) {
                                warn!(batch_id, error = %err, "batch bookkeeping failed");
                            }
                        }
                    }
                    Err(err) => {
                        error!(job_id = %record.id, error = %err, "failed to record job failure");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobResult, JobSource, JobState, OutputKind, RenderJob, RenderOptions};
    use crate::queue::FjallJobQueue;
    use crate::usage::UsageLedger;
    use crate::worker::{JobProcessor, ProcessError, ProcessedJob};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct StubProcessor {
        fail_markers: Vec<String>,
    }

    #[async_trait]
    impl JobProcessor for StubProcessor {
        async fn process(&self, record: &JobRecord) -> Result<ProcessedJob, ProcessError> {
            let JobSource::Html(markup) = &record.job.source else {
                return Err(ProcessError::Other("expected html".to_string()));
            };
            if self.fail_markers.iter().any(|m| markup.contains(m)) {
                return Err(ProcessError::Other("stub failure".to_string()));
            }
            Ok(ProcessedJob {
                result: JobResult {
                    url: Some(format!("https://cdn.test/{}.pdf", record.id)),
                    inline: None,
                    content_type: "application/pdf".to_string(),
                    duration_ms: 1,
                },
                artifact_bytes: 128,
            })
        }
    }

    fn job(markup: &str, batch_id: Option<&str>) -> RenderJob {
        RenderJob {
            output: OutputKind::Pdf,
            source: JobSource::Html(markup.to_string()),
            data: None,
            options: RenderOptions::default(),
            caller_id: None,
            batch_id: batch_id.map(str::to_string),
        }
    }

    struct Fixture {
        _temp: TempDir,
        queue: Arc<dyn JobQueue>,
        batches: Arc<BatchStore>,
        usage: Arc<UsageLedger>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> =
            Arc::new(FjallJobQueue::open(temp.path().join("queue"), 1).unwrap());
        let batches = Arc::new(BatchStore::open(temp.path().join("batches")).unwrap());
        let usage = Arc::new(UsageLedger::open(temp.path().join("usage")).unwrap());
        Fixture {
            _temp: temp,
            queue,
            batches,
            usage,
        }
    }

    async fn wait_for<F>(mut check: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn pool_drains_queue_and_tracks_batch() {
        let fx = fixture();
        fx.batches.init_batch("batch-1", 3).unwrap();
        for i in 0..3 {
            fx.queue
                .enqueue(job(&format!("<p>{i}</p>"), Some("batch-1")))
                .await
                .unwrap();
        }

        let pool = WorkerPool::new(
            Arc::clone(&fx.queue),
            Arc::clone(&fx.batches),
            Arc::clone(&fx.usage),
            Arc::new(StubProcessor {
                fail_markers: vec![],
            }),
            Arc::new(Metrics::new()),
            WorkerSettings {
                concurrency: 2,
                poll_interval: Duration::from_millis(20),
                ..WorkerSettings::default()
            },
        );

        let shutdown = CancellationToken::new();
        let handles = pool.spawn(shutdown.clone());

        let batches = Arc::clone(&fx.batches);
        wait_for(move || {
            batches
                .progress("batch-1")
                .unwrap()
                .map(|p| p.is_complete())
                .unwrap_or(false)
        })
        .await;

        let progress = fx.batches.progress("batch-1").unwrap().unwrap();
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.urls.len(), 3);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn terminal_failure_still_advances_batch() {
        let fx = fixture();
        fx.batches.init_batch("batch-2", 2).unwrap();
        let good = fx
            .queue
            .enqueue(job("<p>fine</p>", Some("batch-2")))
            .await
            .unwrap();
        let bad = fx
            .queue
            .enqueue(job("<p>EXPLODE</p>", Some("batch-2")))
            .await
            .unwrap();

        let pool = WorkerPool::new(
            Arc::clone(&fx.queue),
            Arc::clone(&fx.batches),
            Arc::clone(&fx.usage),
            Arc::new(StubProcessor {
                fail_markers: vec!["EXPLODE".to_string()],
            }),
            Arc::new(Metrics::new()),
            WorkerSettings {
                concurrency: 1,
                poll_interval: Duration::from_millis(20),
                ..WorkerSettings::default()
            },
        );

        let shutdown = CancellationToken::new();
        let handles = pool.spawn(shutdown.clone());

        let batches = Arc::clone(&fx.batches);
        wait_for(move || {
            batches
                .progress("batch-2")
                .unwrap()
                .map(|p| p.is_complete())
                .unwrap_or(false)
        })
        .await;

        let progress = fx.batches.progress("batch-2").unwrap().unwrap();
        assert_eq!(progress.completed, 2);
        // the failed job contributed no URL
        assert_eq!(progress.urls.len(), 1);

        assert_eq!(
            fx.queue.status(good).await.unwrap().unwrap().state,
            JobState::Completed
        );
        assert_eq!(
            fx.queue.status(bad).await.unwrap().unwrap().state,
            JobState::Failed
        );

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
