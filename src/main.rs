use anyhow::{Context, Result};
use autodub::config::Config;
use autodub::job::{JobId, JobStore, SubtitleMode};
use autodub::media::FfmpegMedia;
use autodub::pipeline::{print_summary, DubbingPipeline, PipelineOptions, Providers};
use autodub::storage::{LocalObjectStore, ObjectStore};
use autodub::subtitle::SubtitleFormat;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autodub")]
#[command(version, about = "Automatic video dubbing using AI")]
#[command(
    long_about = "Transcribe a video, translate the speech, re-voice it with text-to-speech and remux the dubbed audio back into the video."
)]
struct Cli {
    /// Input video file
    #[arg(required_unless_present = "resume")]
    input: Option<PathBuf>,

    /// Output video file (defaults to <input>.<target>.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Source language code (e.g., en, ja); empty lets the recognizer detect it
    #[arg(short, long, default_value = "")]
    source: String,

    /// Target language code (e.g., es, fr)
    #[arg(short, long, required_unless_present = "resume")]
    target: Option<String>,

    /// Subtitles: none, external, burn
    #[arg(long, default_value = "burn")]
    subtitles: String,

    /// Subtitle file format: srt, vtt
    #[arg(long, default_value = "srt")]
    subtitle_format: String,

    /// Text-to-speech voice (overrides the configured voice)
    #[arg(long)]
    voice: Option<String>,

    /// Number of concurrent speech synthesis requests
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Directory for the job store, objects and stage workspaces
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Keep stage workspaces after each stage finishes
    #[arg(long)]
    keep_work: bool,

    /// Resume a previously submitted job by id
    #[arg(long)]
    resume: Option<JobId>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "autodub=debug" } else { "autodub=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn derive_output_path(input: &Path, target: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    let mut output = input.to_path_buf();
    output.set_file_name(format!("{}.{}.mp4", stem.to_string_lossy(), target));
    output
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("autodub")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let subtitle_mode: SubtitleMode = cli
        .subtitles
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let subtitle_format: SubtitleFormat = cli
        .subtitle_format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(c) = cli.concurrency {
        config.concurrency = c;
    }
    config
        .validate()
        .context("Configuration validation failed")?;

    FfmpegMedia::new(config.extract_sample_rate)
        .check()
        .await
        .context("ffmpeg is required")?;

    let work_dir = cli.work_dir.clone().unwrap_or_else(default_work_dir);
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("Failed to create work dir {}", work_dir.display()))?;
    let store = Arc::new(
        JobStore::open(work_dir.join("jobs.json")).context("Failed to open job store")?,
    );
    let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(work_dir.join("objects")));

    let mut options = PipelineOptions::from_config(&config);
    options.voice = cli.voice.clone();
    options.subtitle_format = subtitle_format;
    options.work_root = Some(work_dir.join("work"));
    options.keep_work = cli.keep_work;
    options.show_progress = true;

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupt received, stopping after the current stage");
            cancelled.store(true, Ordering::Relaxed);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let providers = Providers::from_config(&config).context("Failed to set up providers")?;
    let pipeline = DubbingPipeline::new(providers, store.clone(), objects.clone(), options)
        .with_cancel_flag(cancelled);

    let job_id = match (cli.resume, cli.input.as_deref(), cli.target.as_deref()) {
        (Some(id), _, _) => {
            let job = store.job(id).context("Unknown job id")?;
            info!("Resuming job {} at {} ({}%)", id, job.status, job.progress);
            id
        }
        (None, Some(input), Some(target)) => {
            info!("Input:     {}", input.display());
            let source = if cli.source.is_empty() {
                "auto"
            } else {
                cli.source.as_str()
            };
            info!("Languages: {} -> {}", source, target);
            info!("Subtitles: {}", subtitle_mode);
            info!("Translator: {}", config.translator);
            pipeline
                .submit_file(input, &cli.source, target, subtitle_mode)
                .await
                .context("Failed to submit job")?
        }
        _ => anyhow::bail!("an input video and --target are required"),
    };

    let outcome = pipeline
        .run_job(job_id)
        .await
        .with_context(|| format!("Job {} failed", job_id))?;

    let output_ref = outcome
        .job
        .output_ref
        .clone()
        .context("Job finished without an output video")?;
    let output = match (cli.output, cli.input.as_deref()) {
        (Some(path), _) => path,
        (None, Some(input)) => derive_output_path(input, &outcome.job.target_language),
        (None, None) => work_dir.join(format!("{}.mp4", job_id)),
    };
    objects
        .get_to_file(&output_ref, &output)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    print_summary(&outcome, &output);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_output_path() {
        let input = PathBuf::from("/path/to/video.mov");
        assert_eq!(
            derive_output_path(&input, "es"),
            PathBuf::from("/path/to/video.es.mp4")
        );
    }

    #[test]
    fn test_cli_requires_target_for_new_jobs() {
        assert!(Cli::try_parse_from(["autodub", "in.mp4"]).is_err());
        let cli = Cli::try_parse_from(["autodub", "in.mp4", "-t", "de"]).unwrap();
        assert_eq!(cli.target.as_deref(), Some("de"));
        assert_eq!(cli.subtitles, "burn");
        assert!(cli.source.is_empty());
    }

    #[test]
    fn test_cli_resume_without_input() {
        let id = uuid::Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["autodub", "--resume", id.as_str()]).unwrap();
        assert!(cli.input.is_none());
        assert!(cli.resume.is_some());
    }
}
