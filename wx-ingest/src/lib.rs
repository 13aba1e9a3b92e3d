pub mod backfill;
pub mod config;
pub mod latest;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use config::AppConfig;
pub use pipeline::{Envelope, Pipeline, PipelineError};
