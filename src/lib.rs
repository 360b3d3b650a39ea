pub mod config;
pub mod error;
pub mod event_log;
pub mod pipeline;
pub mod session;
pub mod song_catalog;
pub mod songplays;
pub mod storage;
pub mod transform;

pub use config::{PipelineConfig, Scope};
pub use error::PipelineError;
pub use pipeline::{run, RunSummary};
