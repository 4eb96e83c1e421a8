pub mod args;
pub mod audio;
pub mod caption;
pub mod compose;
pub mod config;
pub mod error;
pub mod job;
pub mod llm;
pub mod media;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod reddit;
pub mod retry;
pub mod segment;
pub mod text;
pub mod tts;
pub mod utils;
pub mod zapcap;

pub use caption::{CaptionEngine, CaptionService, CaptionSettings};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use job::{Job, JobStatus, Stage};
pub use output::OutputArtifact;
pub use pipeline::{JobReport, Orchestrator, Stages};
