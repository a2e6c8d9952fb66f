//! Five-stage dubbing state machine.
//!
//! `EXTRACTING -> TRANSCRIBING -> TRANSLATING -> SYNTHESIZING -> MUXING`.
//! Every stage reads what it needs from the job store and object store,
//! so a job can be resumed from its id alone. A stage that fails or times
//! out marks the job FAILED and stops the chain.

mod stages;
pub mod worker;
pub mod workspace;

pub use worker::WorkerPool;
pub use workspace::StageWorkspace;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::audio::{FfmpegAtempo, ResampleStretch, TimeStretch};
use crate::config::{Config, StretchBackend};
use crate::error::{DubError, Result};
use crate::job::{Job, JobId, JobStatus, JobStore, SubtitleMode};
use crate::media::{FfmpegMedia, MediaProcessor};
use crate::storage::{layout, ObjectStore};
use crate::subtitle::SubtitleFormat;
use crate::synthesize::{OpenAiTts, SpeechSynthesizer};
use crate::timeline::{TimelineConfig, TimelineReport};
use crate::transcribe::{SpeechRecognizer, WhisperClient};
use crate::translate::{create_translator, ChunkerConfig, Translator};

/// External collaborators, injected at construction.
#[derive(Clone)]
pub struct Providers {
    pub media: Arc<dyn MediaProcessor>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub stretcher: Arc<dyn TimeStretch>,
}

impl Providers {
    /// Production adapters selected by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let openai_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| DubError::Config("OPENAI_API_KEY not set".to_string()))?;

        let stretcher: Arc<dyn TimeStretch> = match config.stretch {
            StretchBackend::Ffmpeg => Arc::new(FfmpegAtempo),
            StretchBackend::Resample => {
                Arc::new(ResampleStretch::new(config.timeline.max_stage_ratio))
            }
        };

        Ok(Self {
            media: Arc::new(FfmpegMedia::new(config.extract_sample_rate)),
            recognizer: Arc::new(
                WhisperClient::new(openai_key.clone())
                    .with_model(config.whisper_model.as_str())
                    .with_base_url(&config.openai_base_url),
            ),
            translator: create_translator(config)?,
            synthesizer: Arc::new(
                OpenAiTts::new(openai_key)
                    .with_model(&config.tts_model)
                    .with_voice(&config.tts_voice)
                    .with_base_url(&config.openai_base_url),
            ),
            stretcher,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Concurrent synthesis calls within one job.
    pub concurrency: usize,
    pub stage_timeout: Duration,
    pub chunker: ChunkerConfig,
    pub timeline: TimelineConfig,
    /// Voice passed to the synthesizer; `None` uses its default.
    pub voice: Option<String>,
    pub subtitle_format: SubtitleFormat,
    pub bilingual_subtitles: bool,
    /// Parent directory for stage workspaces; system temp if unset.
    pub work_root: Option<PathBuf>,
    /// Leave stage workspaces on disk for inspection.
    pub keep_work: bool,
    pub show_progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            stage_timeout: config.stage_timeout(),
            chunker: config.chunker.clone(),
            timeline: config.timeline.clone(),
            voice: None,
            subtitle_format: SubtitleFormat::Srt,
            bilingual_subtitles: config.bilingual_subtitles,
            work_root: None,
            keep_work: false,
            show_progress: false,
        }
    }
}

/// Result of driving one job through the chain.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: Job,
    pub segments: usize,
    pub synthesized: usize,
    pub timeline: Option<TimelineReport>,
    pub stage_times: Vec<(JobStatus, Duration)>,
}

impl JobOutcome {
    pub fn total_time(&self) -> Duration {
        self.stage_times.iter().map(|(_, d)| *d).sum()
    }
}

enum StageOutput {
    Done,
    Timeline(TimelineReport),
}

pub struct DubbingPipeline {
    providers: Providers,
    store: Arc<JobStore>,
    objects: Arc<dyn ObjectStore>,
    options: PipelineOptions,
    cancelled: Arc<AtomicBool>,
}

impl DubbingPipeline {
    pub fn new(
        providers: Providers,
        store: Arc<JobStore>,
        objects: Arc<dyn ObjectStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            providers,
            store,
            objects,
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned cancellation flag (e.g. set from Ctrl+C).
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Upload a local video and create a PENDING job for it.
    pub async fn submit_file(
        &self,
        video: &Path,
        source_language: &str,
        target_language: &str,
        subtitle_mode: SubtitleMode,
    ) -> Result<JobId> {
        let file_name = video
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DubError::Validation(format!("not a file: {}", video.display())))?
            .to_string();
        if !tokio::fs::try_exists(video).await? {
            return Err(DubError::NotFound(video.display().to_string()));
        }

        let mut job = Job::new(source_language, target_language, subtitle_mode, &file_name)?;
        job.input_ref = layout::input(job.id, &file_name);

        self.objects.put_file(&job.input_ref, video).await?;
        let id = self.store.create_job(job)?;
        self.store.persist().await?;
        info!("Submitted job {} for {}", id, video.display());
        Ok(id)
    }

    /// Run every remaining stage of a job in order.
    ///
    /// A stage whose end checkpoint was already recorded is skipped, so a
    /// job interrupted mid-chain resumes at the stage that did not finish.
    pub async fn run_job(&self, job_id: JobId) -> Result<JobOutcome> {
        let job = self.store.job(job_id)?;
        if job.status == JobStatus::Failed {
            return Err(DubError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Extracting,
            });
        }

        let mut stage_times = Vec::new();
        let mut timeline = None;

        for stage in JobStatus::STAGES {
            let current = self.store.job(job_id)?;
            if current.status == JobStatus::Completed {
                break;
            }
            if stage_done(&current, stage) {
                continue;
            }

            if self.cancelled.load(Ordering::Relaxed) {
                warn!("Job {}: cancelled before {}", job_id, stage);
                self.record_failure(job_id, &DubError::Cancelled).await;
                return Err(DubError::Cancelled);
            }

            let started = Instant::now();
            match self.run_stage(job_id, stage).await {
                Ok(StageOutput::Timeline(report)) => timeline = Some(report),
                Ok(StageOutput::Done) => {}
                Err(e) => {
                    error!("Job {}: {} failed: {}", job_id, stage, e);
                    self.record_failure(job_id, &e).await;
                    return Err(e);
                }
            }
            stage_times.push((stage, started.elapsed()));
        }

        let job = self.store.job(job_id)?;
        let segments = self.store.segments_for(job_id)?;
        info!("Job {} finished with status {}", job_id, job.status);
        Ok(JobOutcome {
            job,
            synthesized: segments
                .iter()
                .filter(|s| s.synthesized_audio_ref.is_some())
                .count(),
            segments: segments.len(),
            timeline,
            stage_times,
        })
    }

    /// Full restart of a failed (or finished) job from the first stage.
    ///
    /// Synthesized clips from the previous run are dropped; the input video
    /// is kept.
    pub async fn restart_job(&self, job_id: JobId) -> Result<JobOutcome> {
        self.store.update_job(job_id, |job| {
            job.restart();
            Ok(())
        })?;
        self.objects
            .delete_prefix(&layout::segments_prefix(job_id))
            .await?;
        self.store.persist().await?;
        self.run_job(job_id).await
    }

    async fn run_stage(&self, job_id: JobId, stage: JobStatus) -> Result<StageOutput> {
        let (enter, leave) = stage.progress_checkpoints();
        let job = self.store.update_job(job_id, |job| {
            job.advance_to(stage, enter)?;
            Ok(job.clone())
        })?;
        self.store.persist().await?;
        info!("Job {}: stage {} started ({}%)", job_id, stage, enter);

        let workspace = StageWorkspace::create(
            self.options.work_root.as_deref(),
            job_id,
            stage,
            self.options.keep_work,
        )?;

        let body = async {
            match stage {
                JobStatus::Extracting => self.extract_stage(&job, &workspace).await,
                JobStatus::Transcribing => self.transcribe_stage(&job, &workspace).await,
                JobStatus::Translating => self.translate_stage(&job).await,
                JobStatus::Synthesizing => self.synthesize_stage(&job).await,
                JobStatus::Muxing => self.mux_stage(&job, &workspace).await,
                other => Err(DubError::InvalidTransition {
                    from: job.status,
                    to: other,
                }),
            }
        };

        let output = match tokio::time::timeout(self.options.stage_timeout, body).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DubError::StageTimeout {
                    stage: stage.to_string(),
                    timeout: self.options.stage_timeout,
                })
            }
        };
        drop(workspace);

        let finished = if stage == JobStatus::Muxing {
            JobStatus::Completed
        } else {
            stage
        };
        let (_, done) = finished.progress_checkpoints();
        self.store.update_job(job_id, |job| job.advance_to(finished, leave.max(done)))?;
        self.store.persist().await?;
        info!("Job {}: stage {} finished ({}%)", job_id, stage, leave.max(done));

        Ok(output)
    }

    async fn record_failure(&self, job_id: JobId, err: &DubError) {
        let message = err.to_string();
        if let Err(e) = self.store.update_job(job_id, |job| {
            job.fail(message);
            Ok(())
        }) {
            warn!("Job {}: could not record failure: {}", job_id, e);
        }
        if let Err(e) = self.store.persist().await {
            warn!("Job {}: could not persist failure: {}", job_id, e);
        }
    }
}

pub fn print_summary(outcome: &JobOutcome, output: &Path) {
    let job = &outcome.job;
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                        Dubbing Complete                       ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Job:        {}", job.id);
    println!("  Output:     {}", output.display());
    println!(
        "  Languages:  {} -> {}",
        if job.source_language.is_empty() {
            "auto"
        } else {
            job.source_language.as_str()
        },
        job.target_language
    );
    println!(
        "  Segments:   {} ({} voiced)",
        outcome.segments, outcome.synthesized
    );
    if let Some(ms) = job.total_duration_ms {
        println!("  Duration:   {:.1}s video", ms as f64 / 1000.0);
    }
    if let Some(ref report) = outcome.timeline {
        use crate::timeline::PlacementAction;
        println!(
            "  Timeline:   {} sped up, {} truncated, {} dropped",
            report.count(|a| matches!(a, PlacementAction::SpedUp { .. })),
            report.count(|a| matches!(a, PlacementAction::Truncated { .. })),
            report.count(|a| matches!(a, PlacementAction::NoSlot))
        );
    }
    println!();
    println!("  Timing:");
    for (stage, elapsed) in &outcome.stage_times {
        println!("    {:<14}{:.2}s", format!("{}:", stage), elapsed.as_secs_f64());
    }
    println!("    {:<14}{:.2}s", "total:", outcome.total_time().as_secs_f64());
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}

/// Whether `stage` already ran to completion for `job`.
fn stage_done(job: &Job, stage: JobStatus) -> bool {
    let position = |s: JobStatus| JobStatus::STAGES.iter().position(|x| *x == s);
    match (position(job.status), position(stage)) {
        (Some(current), Some(wanted)) if wanted < current => true,
        (Some(current), Some(wanted)) if wanted == current => {
            let (enter, leave) = stage.progress_checkpoints();
            leave > enter && job.progress >= leave
        }
        _ => job.status == JobStatus::Completed,
    }
}
