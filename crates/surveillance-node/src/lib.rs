pub mod acquisition;
pub mod alerting;
pub mod annotate;
pub mod config;
pub mod controller;
pub mod error;
pub mod event_log;
pub mod glyphs;
pub mod mock;
pub mod processing;
pub mod queue;
pub mod source;

pub use config::{NodeConfig, PipelineConfig};
pub use controller::{PipelineBuilder, SurveillancePipeline};
pub use error::PipelineError;
