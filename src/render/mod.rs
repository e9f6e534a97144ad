//! Render executor: one job in, one artifact out.

mod executor;

pub use executor::{RenderError, RenderExecutor, RenderedArtifact};
