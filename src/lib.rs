pub mod audio;
pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod storage;
pub mod subtitle;
pub mod synthesize;
pub mod timeline;
pub mod transcribe;
pub mod translate;

pub use config::Config;
pub use error::{DubError, Result};
pub use job::{Job, JobId, JobStatus, JobStore, Segment, SubtitleMode};
pub use pipeline::{
    print_summary, DubbingPipeline, JobOutcome, PipelineOptions, Providers, WorkerPool,
};
pub use storage::{LocalObjectStore, ObjectStore};
pub use timeline::{TimelineReport, TimelineSynthesizer};
