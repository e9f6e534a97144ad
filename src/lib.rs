pub mod api;
pub mod archive;
pub mod batch;
pub mod browser;
pub mod config;
pub mod job;
pub mod observability;
pub mod queue;
pub mod render;
pub mod storage;
pub mod template;
pub mod usage;
pub mod worker;
