use std::sync::Arc;

use crate::archive::ArtifactFetcher;
use crate::batch::BatchStore;
use crate::browser::BrowserPool;
use crate::config::Config;
use crate::observability::Metrics;
use crate::queue::JobQueue;
use crate::usage::UsageLedger;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub queue: Arc<dyn JobQueue>,
    pub batches: Arc<BatchStore>,
    pub usage: Arc<UsageLedger>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub browser: Arc<BrowserPool>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        queue: Arc<dyn JobQueue>,
        batches: Arc<BatchStore>,
        usage: Arc<UsageLedger>,
        fetcher: Arc<dyn ArtifactFetcher>,
        browser: Arc<BrowserPool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            queue,
            batches,
            usage,
            fetcher,
            browser,
            metrics,
        }
    }
}
