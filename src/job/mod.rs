//! Job and segment data model.
//!
//! A [`Job`] is one dubbing request; its [`Segment`]s are the time-aligned
//! utterances produced by transcription and enriched by later stages.

pub mod store;

pub use store::{JobRecord, JobStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DubError, Result};

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Extracting,
    Transcribing,
    Translating,
    Synthesizing,
    Muxing,
    Completed,
    Failed,
}

impl JobStatus {
    /// The five working stages, in execution order.
    pub const STAGES: [JobStatus; 5] = [
        JobStatus::Extracting,
        JobStatus::Transcribing,
        JobStatus::Translating,
        JobStatus::Synthesizing,
        JobStatus::Muxing,
    ];

    /// Successor on the happy path. `None` for terminal states.
    pub fn next(self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => Some(JobStatus::Extracting),
            JobStatus::Extracting => Some(JobStatus::Transcribing),
            JobStatus::Transcribing => Some(JobStatus::Translating),
            JobStatus::Translating => Some(JobStatus::Synthesizing),
            JobStatus::Synthesizing => Some(JobStatus::Muxing),
            JobStatus::Muxing => Some(JobStatus::Completed),
            JobStatus::Completed | JobStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Progress recorded on entering and on leaving a status.
    pub fn progress_checkpoints(self) -> (u8, u8) {
        match self {
            JobStatus::Pending => (0, 0),
            JobStatus::Extracting => (10, 20),
            JobStatus::Transcribing => (30, 40),
            JobStatus::Translating => (50, 60),
            JobStatus::Synthesizing => (70, 80),
            JobStatus::Muxing => (90, 90),
            JobStatus::Completed => (100, 100),
            JobStatus::Failed => (0, 0),
        }
    }

    /// Name stored in `Job::current_stage`.
    pub fn stage_name(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Extracting => "extract_audio",
            JobStatus::Transcribing => "transcribe",
            JobStatus::Translating => "translate",
            JobStatus::Synthesizing => "synthesize",
            JobStatus::Muxing => "mux",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Extracting => "extracting",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Translating => "translating",
            JobStatus::Synthesizing => "synthesizing",
            JobStatus::Muxing => "muxing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubtitleMode {
    None,
    External,
    #[default]
    Burn,
}

impl std::fmt::Display for SubtitleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtitleMode::None => write!(f, "none"),
            SubtitleMode::External => write!(f, "external"),
            SubtitleMode::Burn => write!(f, "burn"),
        }
    }
}

impl std::str::FromStr for SubtitleMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(SubtitleMode::None),
            "external" => Ok(SubtitleMode::External),
            "burn" => Ok(SubtitleMode::Burn),
            _ => Err(format!(
                "Unknown subtitle mode: {}. Use 'none', 'external', or 'burn'",
                s
            )),
        }
    }
}

/// One dubbing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_language: String,
    pub target_language: String,
    pub status: JobStatus,
    pub current_stage: Option<String>,
    pub progress: u8,
    pub error_message: Option<String>,
    pub subtitle_mode: SubtitleMode,
    pub total_duration_ms: Option<u64>,
    /// Object-store key of the uploaded source video.
    pub input_ref: String,
    pub source_audio_ref: Option<String>,
    pub dubbed_audio_ref: Option<String>,
    pub subtitle_ref: Option<String>,
    pub output_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        subtitle_mode: SubtitleMode,
        input_ref: impl Into<String>,
    ) -> Result<Self> {
        let source_language = source_language.into();
        let target_language = target_language.into();
        let input_ref = input_ref.into();

        if target_language.trim().is_empty() {
            return Err(DubError::Validation("target language is required".to_string()));
        }
        if input_ref.trim().is_empty() {
            return Err(DubError::Validation("input video reference is required".to_string()));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            source_language,
            target_language,
            status: JobStatus::Pending,
            current_stage: None,
            progress: 0,
            error_message: None,
            subtitle_mode,
            total_duration_ms: None,
            input_ref,
            source_audio_ref: None,
            dubbed_audio_ref: None,
            subtitle_ref: None,
            output_ref: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// Move to `status` (or stay in the current one) and record `progress`.
    ///
    /// Only the immediate successor is accepted; progress never goes down.
    pub fn advance_to(&mut self, status: JobStatus, progress: u8) -> Result<()> {
        if self.status.is_terminal() || (status != self.status && self.status.next() != Some(status))
        {
            return Err(DubError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }

        self.status = status;
        self.current_stage = Some(status.stage_name().to_string());
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = Utc::now();
        if status == JobStatus::Completed {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Mark the job failed. Already-terminal jobs are left untouched.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        let mut message = message.into();
        if message.trim().is_empty() {
            message = format!("{} failed", self.status);
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(message);
        self.updated_at = Utc::now();
    }

    /// Full restart: back to PENDING so the chain can run again from scratch.
    pub fn restart(&mut self) {
        self.status = JobStatus::Pending;
        self.current_stage = None;
        self.progress = 0;
        self.error_message = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
    }
}

/// Stable address of a segment: owning job plus its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId {
    pub job_id: JobId,
    pub segment_index: usize,
}

/// One utterance span within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub job_id: JobId,
    pub segment_index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub original_text: String,
    pub translated_text: Option<String>,
    pub speaker_id: Option<String>,
    pub emotion: Option<String>,
    pub confidence: Option<f32>,
    pub synthesized_audio_ref: Option<String>,
}

impl Segment {
    pub fn new(
        job_id: JobId,
        segment_index: usize,
        start_ms: u64,
        end_ms: u64,
        original_text: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            segment_index,
            start_ms,
            end_ms: end_ms.max(start_ms),
            original_text: original_text.into(),
            translated_text: None,
            speaker_id: None,
            emotion: None,
            confidence: None,
            synthesized_audio_ref: None,
        }
    }

    pub fn id(&self) -> SegmentId {
        SegmentId {
            job_id: self.job_id,
            segment_index: self.segment_index,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("en", "es", SubtitleMode::None, "jobs/x/input/video.mp4").unwrap()
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_new_job_requires_target() {
        assert!(matches!(
            Job::new("en", " ", SubtitleMode::None, "in.mp4"),
            Err(DubError::Validation(_))
        ));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        for status in JobStatus::STAGES {
            let (enter, exit) = status.progress_checkpoints();
            job.advance_to(status, enter).unwrap();
            job.advance_to(status, exit).unwrap();
        }
        job.advance_to(JobStatus::Completed, 100).unwrap();
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        assert_eq!(job.current_stage.as_deref(), Some("completed"));
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let mut job = job();
        job.advance_to(JobStatus::Extracting, 10).unwrap();
        let err = job.advance_to(JobStatus::Translating, 50).unwrap_err();
        assert!(matches!(err, DubError::InvalidTransition { .. }));
    }

    #[test]
    fn test_no_reentry_of_previous_stage() {
        let mut job = job();
        job.advance_to(JobStatus::Extracting, 10).unwrap();
        job.advance_to(JobStatus::Transcribing, 30).unwrap();
        assert!(job.advance_to(JobStatus::Extracting, 10).is_err());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = job();
        job.advance_to(JobStatus::Extracting, 20).unwrap();
        job.advance_to(JobStatus::Extracting, 10).unwrap();
        assert_eq!(job.progress, 20);
    }

    #[test]
    fn test_fail_from_running_stage() {
        let mut job = job();
        job.advance_to(JobStatus::Extracting, 10).unwrap();
        job.fail("ffmpeg exited with 1");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("ffmpeg exited with 1"));
        assert!(job.advance_to(JobStatus::Transcribing, 30).is_err());
    }

    #[test]
    fn test_fail_never_leaves_empty_message() {
        let mut job = job();
        job.fail("");
        assert!(!job.error_message.unwrap().is_empty());
    }

    #[test]
    fn test_restart_resets_to_pending() {
        let mut job = job();
        job.advance_to(JobStatus::Extracting, 10).unwrap();
        job.fail("boom");
        job.restart();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.error_message.is_none());
        job.advance_to(JobStatus::Extracting, 10).unwrap();
    }

    #[test]
    fn test_subtitle_mode_parsing() {
        assert_eq!("burn".parse::<SubtitleMode>().unwrap(), SubtitleMode::Burn);
        assert_eq!("EXTERNAL".parse::<SubtitleMode>().unwrap(), SubtitleMode::External);
        assert_eq!("none".parse::<SubtitleMode>().unwrap(), SubtitleMode::None);
        assert!("soft".parse::<SubtitleMode>().is_err());
    }

    #[test]
    fn test_segment_end_never_before_start() {
        let seg = Segment::new(Uuid::new_v4(), 0, 500, 200, "hi");
        assert_eq!(seg.end_ms, 500);
        assert_eq!(seg.duration_ms(), 0);
    }
}
