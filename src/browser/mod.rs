//! Shared headless-browser process with single-flight launch.

mod pool;

pub use pool::{BrowserError, BrowserPool, BrowserSettings};
