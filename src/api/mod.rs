mod error;
pub mod models;
mod router;
pub mod services;
pub mod state;
pub(crate) mod utils;

pub use error::ApiError;
pub use router::build_router;
