//! BrowserPool owns exactly one warm Chromium process.
//!
//! All concurrent jobs share the process; each job gets its own isolated
//! browser context from the render executor. The pool's job is lifecycle:
//!
//! 1. `acquire()` returns the live process, launching it on first use.
//!    The launch happens while holding the pool mutex, so concurrent
//!    acquisitions during a launch wait for it instead of spawning a
//!    second process (single-flight).
//! 2. A spawned task drains the CDP event handler; when that stream ends
//!    the process is gone (crash, external kill) and an `alive` flag flips,
//!    making the next `acquire()` relaunch. In-flight jobs holding the dead
//!    handle fail and surface as job failures.
//! 3. `shutdown()` closes the process at exit. Jobs never close it.
//!
//! Launch failures propagate to the caller; retry is the queue's concern.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
}

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Launch configuration for the shared process.
#[derive(Debug, Clone, Default)]
pub struct BrowserSettings {
    /// Explicit Chromium binary path; auto-detected when absent.
    pub executable: Option<String>,
}

struct SharedBrowser {
    browser: Arc<Browser>,
    alive: Arc<AtomicBool>,
    handler_task: JoinHandle<()>,
}

/// Mutex-guarded optional handle to the one browser process.
pub struct BrowserPool {
    settings: BrowserSettings,
    slot: Mutex<Option<SharedBrowser>>,
}

impl BrowserPool {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            slot: Mutex::new(None),
        }
    }

    /// Return the live browser process, launching one if needed.
    ///
    /// The slot lock is held for the whole launch, which is what makes the
    /// launch single-flight: a second caller blocks here and then finds the
    /// fresh handle instead of launching its own.
    pub async fn acquire(&self) -> Result<Arc<Browser>> {
        let mut slot = self.slot.lock().await;

        if let Some(shared) = slot.as_ref() {
            if shared.alive.load(Ordering::SeqCst) {
                return Ok(shared.browser.clone());
            }
            warn!("cached browser handle is dead, relaunching");
        }

        if let Some(stale) = slot.take() {
            stale.handler_task.abort();
        }

        let shared = self.launch().await?;
        let browser = shared.browser.clone();
        *slot = Some(shared);
        Ok(browser)
    }

    async fn launch(&self) -> Result<SharedBrowser> {
        let config = build_config(&self.settings)?;

        info!("launching headless browser");
        let (browser, mut handler) = Browser::launch(config).await?;

        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        // The handler stream must be polled for CDP traffic to flow. It ends
        // when the process disconnects, which is our crash signal.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
            warn!("browser process disconnected");
        });

        Ok(SharedBrowser {
            browser: Arc::new(browser),
            alive,
            handler_task,
        })
    }

    /// True when a launched process is currently believed healthy.
    pub async fn is_warm(&self) -> bool {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .map(|s| s.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Close the browser process. Process-exit teardown only, never mid-job.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        let Some(shared) = slot.take() else {
            return;
        };

        shared.handler_task.abort();
        match Arc::try_unwrap(shared.browser) {
            Ok(mut browser) => {
                if let Err(e) = browser.close().await {
                    warn!(error = %e, "browser close failed");
                }
                let _ = browser.wait().await;
            }
            Err(_still_shared) => {
                // A job still holds the Arc; dropping our reference lets the
                // process die with the last holder.
                warn!("browser still in use at shutdown, dropping pool reference");
            }
        }
        info!("browser pool shut down");
    }
}

fn build_config(settings: &BrowserSettings) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        // Sandboxing off for containerized execution, GPU off for headless
        // stability; same flag set the service has always run with.
        .no_sandbox()
        .args(vec![
            "--disable-gpu",
            "--disable-dev-shm-usage",
            "--disable-setuid-sandbox",
            "--no-zygote",
        ]);

    if let Some(path) = &settings.executable {
        builder = builder.chrome_executable(path);
    }

    builder.build().map_err(BrowserError::Launch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_config_custom_executable() {
        let settings = BrowserSettings {
            executable: Some("/usr/bin/chromium".to_string()),
        };
        assert!(build_config(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_pool_starts_cold() {
        let pool = BrowserPool::new(BrowserSettings::default());
        assert!(!pool.is_warm().await);
    }

    #[tokio::test]
    async fn test_shutdown_without_launch_is_noop() {
        let pool = BrowserPool::new(BrowserSettings::default());
        pool.shutdown().await;
        assert!(!pool.is_warm().await);
    }
}
