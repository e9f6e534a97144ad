use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Fixed-window rate limiter shared by all workers.
///
/// At most `max` permits per `window`; callers past the limit sleep
/// until the window rolls over.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    started: Instant,
    used: u32,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            state: Mutex::new(WindowState {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.started) >= self.window {
                    state.started = now;
                    state.used = 0;
                }
                if state.used < self.max {
                    state.used += 1;
                    return;
                }
                state.started + self.window
            };
            tokio::time::sleep_until(wake_at).await;
        }
    }
}
