//! Bodies of the five pipeline stages.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{DubbingPipeline, StageOutput, StageWorkspace};
use crate::audio::{decode_wav, encode_wav, SubtitleTrack};
use crate::error::{DubError, Result};
use crate::job::{Job, Segment, SubtitleMode};
use crate::storage::layout;
use crate::subtitle::{create_formatter, entries_from_segments, SubtitleOptions};
use crate::timeline::{TimelineInput, TimelineSynthesizer};
use crate::transcribe::Utterance;
use crate::translate::TranslationChunker;

/// Result of one synthesis call.
struct SynthesisResult {
    segment_index: usize,
    audio_ref: Option<String>,
    error: Option<DubError>,
    elapsed_ms: u64,
}

impl DubbingPipeline {
    pub(super) async fn extract_stage(&self, job: &Job, ws: &StageWorkspace) -> Result<StageOutput> {
        let video = ws.file(&input_file_name(&job.input_ref));
        self.objects.get_to_file(&job.input_ref, &video).await?;

        let audio = ws.file("source.wav");
        let duration_ms = self.providers.media.extract_audio(&video, &audio).await?;
        if duration_ms == 0 {
            return Err(DubError::DurationComputation(format!(
                "{} reports zero duration",
                job.input_ref
            )));
        }

        let audio_ref = layout::source_audio(job.id);
        self.objects.put_file(&audio_ref, &audio).await?;

        self.store.update_job(job.id, |j| {
            j.total_duration_ms = Some(duration_ms);
            j.source_audio_ref = Some(audio_ref);
            Ok(())
        })?;
        info!("Job {}: extracted {}ms of audio", job.id, duration_ms);
        Ok(StageOutput::Done)
    }

    pub(super) async fn transcribe_stage(&self, job: &Job, ws: &StageWorkspace) -> Result<StageOutput> {
        let audio_ref = job
            .source_audio_ref
            .clone()
            .ok_or_else(|| DubError::NotFound(format!("source audio of job {}", job.id)))?;
        let audio = ws.file("source.wav");
        self.objects.get_to_file(&audio_ref, &audio).await?;

        let hint = Some(job.source_language.as_str()).filter(|l| !l.is_empty());
        let recognizer = &self.providers.recognizer;
        let utterances = recognizer.transcribe(&audio, hint).await?;

        if let Some(pos) = utterances.windows(2).position(|w| w[1].start_ms < w[0].start_ms) {
            return Err(DubError::provider(
                recognizer.name(),
                format!(
                    "utterance {} starts at {}ms, before the previous one at {}ms",
                    pos + 1,
                    utterances[pos + 1].start_ms,
                    utterances[pos].start_ms
                ),
            ));
        }
        if utterances.is_empty() {
            warn!("Job {}: no speech recognized", job.id);
        }

        let segments = segments_from_utterances(job, utterances);
        let count = self.store.upsert_segments(job.id, segments)?;
        info!("Job {}: stored {} segments", job.id, count);
        Ok(StageOutput::Done)
    }

    pub(super) async fn translate_stage(&self, job: &Job) -> Result<StageOutput> {
        let segments = self.store.segments_for(job.id)?;
        if segments.is_empty() {
            info!("Job {}: nothing to translate", job.id);
            return Ok(StageOutput::Done);
        }

        let chunker = TranslationChunker::new(self.options.chunker.clone());
        let translator = self.providers.translator.as_ref();
        let translations = match chunker
            .translate_chunked(translator, &segments, &job.source_language, &job.target_language)
            .await
        {
            Ok(map) => map,
            Err(e) if e.is_provider() => {
                warn!(
                    "Job {}: chunked translation failed: {}, falling back to per-segment translation",
                    job.id, e
                );
                chunker
                    .translate_individually(
                        translator,
                        &segments,
                        &job.source_language,
                        &job.target_language,
                    )
                    .await
            }
            Err(e) => return Err(e),
        };

        for segment in &segments {
            let text = translations
                .get(&segment.segment_index)
                .cloned()
                .unwrap_or_else(|| segment.original_text.clone());
            debug!(
                "Segment {}: {:.30} -> {:.30}",
                segment.segment_index, segment.original_text, text
            );
            self.store.update_translation(segment.id(), text)?;
        }
        info!("Job {}: translated {} segments", job.id, segments.len());
        Ok(StageOutput::Done)
    }

    pub(super) async fn synthesize_stage(&self, job: &Job) -> Result<StageOutput> {
        let segments: Vec<Segment> = self
            .store
            .segments_for(job.id)?
            .into_iter()
            .filter(|s| s.translated_text.as_deref().is_some_and(|t| !t.trim().is_empty()))
            .collect();
        if segments.is_empty() {
            info!("Job {}: nothing to synthesize", job.id);
            return Ok(StageOutput::Done);
        }

        let total = segments.len();
        let concurrency = self.options.concurrency.max(1);
        info!(
            "Job {}: synthesizing {} segments with {} concurrent requests using {}",
            job.id,
            total,
            concurrency,
            self.providers.synthesizer.name()
        );

        let progress_bar = if self.options.show_progress {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut futures = FuturesUnordered::new();

        for segment in segments {
            let sem = semaphore.clone();
            let synthesizer = self.providers.synthesizer.clone();
            let objects = self.objects.clone();
            let voice = self.options.voice.clone();
            let pb = progress_bar.clone();
            let job_id = job.id;

            futures.push(async move {
                let started = Instant::now();
                let index = segment.segment_index;
                let text = segment.translated_text.unwrap_or_default();

                let result = async {
                    let _permit = sem
                        .acquire()
                        .await
                        .map_err(|_| DubError::Cancelled)?;
                    let wav = synthesizer.synthesize(&text, voice.as_deref()).await?;
                    // Reject undecodable audio here rather than at mux time
                    let clip = decode_wav(&wav).map_err(|e| {
                        DubError::provider(synthesizer.name(), format!("unusable audio: {}", e))
                    })?;
                    let key = layout::segment_audio(job_id, index);
                    objects.put(&key, encode_wav(&clip)?).await?;
                    Ok::<_, DubError>(key)
                }
                .await;

                if let Some(ref pb) = pb {
                    pb.inc(1);
                }

                let elapsed_ms = started.elapsed().as_millis() as u64;
                match result {
                    Ok(key) => SynthesisResult {
                        segment_index: index,
                        audio_ref: Some(key),
                        error: None,
                        elapsed_ms,
                    },
                    Err(e) => SynthesisResult {
                        segment_index: index,
                        audio_ref: None,
                        error: Some(e),
                        elapsed_ms,
                    },
                }
            });
        }

        let mut results: Vec<SynthesisResult> = Vec::with_capacity(total);
        while let Some(result) = futures.next().await {
            results.push(result);
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Synthesis complete");
        }

        // Write back in index order so logs read the same on every run
        results.sort_by_key(|r| r.segment_index);

        let mut synthesized = 0;
        for result in results {
            match (result.audio_ref, result.error) {
                (Some(audio_ref), _) => {
                    debug!(
                        "Segment {} synthesized in {}ms",
                        result.segment_index, result.elapsed_ms
                    );
                    self.store.update_synthesis(
                        crate::job::SegmentId {
                            job_id: job.id,
                            segment_index: result.segment_index,
                        },
                        audio_ref,
                    )?;
                    synthesized += 1;
                }
                // Only provider failures are survivable; anything else is ours
                (None, Some(e)) if !e.is_provider() => return Err(e),
                (None, error) => warn!(
                    "Job {}: segment {} synthesis failed, leaving it silent: {}",
                    job.id,
                    result.segment_index,
                    error.map(|e| e.to_string()).unwrap_or_default()
                ),
            }
        }

        info!("Job {}: synthesized {}/{} segments", job.id, synthesized, total);
        Ok(StageOutput::Done)
    }

    pub(super) async fn mux_stage(&self, job: &Job, ws: &StageWorkspace) -> Result<StageOutput> {
        let total_duration_ms = job.total_duration_ms.ok_or_else(|| {
            DubError::DurationComputation(format!("job {} has no recorded duration", job.id))
        })?;
        let segments = self.store.segments_for(job.id)?;

        let mut inputs = Vec::new();
        for segment in &segments {
            let Some(audio_ref) = &segment.synthesized_audio_ref else {
                continue;
            };
            let audio = match self.objects.get(audio_ref).await.and_then(|b| decode_wav(&b)) {
                Ok(clip) => clip,
                Err(e) => {
                    warn!(
                        "Job {}: segment {} audio unavailable, leaving it silent: {}",
                        job.id, segment.segment_index, e
                    );
                    continue;
                }
            };
            inputs.push(TimelineInput {
                segment_index: segment.segment_index,
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
                audio,
            });
        }

        let timeline =
            TimelineSynthesizer::new(self.options.timeline.clone(), self.providers.stretcher.clone());
        let (track, report) = timeline.synthesize(inputs, total_duration_ms).await?;

        let dub_path = ws.file("dub.wav");
        crate::audio::write_wav(&dub_path, &track)?;
        let dub_ref = layout::dubbed_audio(job.id);
        self.objects.put_file(&dub_ref, &dub_path).await?;

        let options = SubtitleOptions {
            bilingual: self.options.bilingual_subtitles,
            speaker_labels: false,
        };
        let entries = entries_from_segments(&segments, &options);
        let subtitle = if job.subtitle_mode == SubtitleMode::None {
            None
        } else if entries.is_empty() {
            info!("Job {}: no subtitle cues, skipping subtitles", job.id);
            None
        } else {
            let formatter = create_formatter(self.options.subtitle_format);
            let path = ws.file(&format!("subtitles.{}", formatter.extension()));
            tokio::fs::write(&path, formatter.format(&entries)).await?;

            let key = layout::subtitles(job.id, formatter.extension());
            self.objects.put_file(&key, &path).await?;
            info!("Job {}: wrote {} subtitle cues", job.id, entries.len());
            Some((
                key,
                SubtitleTrack {
                    path,
                    burn: job.subtitle_mode == SubtitleMode::Burn,
                },
            ))
        };

        let video = ws.file(&input_file_name(&job.input_ref));
        self.objects.get_to_file(&job.input_ref, &video).await?;
        let output = ws.file("dubbed.mp4");
        self.providers
            .media
            .remux(&video, &dub_path, subtitle.as_ref().map(|(_, t)| t), &output)
            .await?;

        let output_ref = layout::output_video(job.id);
        self.objects.put_file(&output_ref, &output).await?;

        self.store.update_job(job.id, |j| {
            j.dubbed_audio_ref = Some(dub_ref);
            j.subtitle_ref = subtitle.map(|(key, _)| key);
            j.output_ref = Some(output_ref);
            Ok(())
        })?;
        Ok(StageOutput::Timeline(report))
    }
}

/// Materialize utterances as segments, keeping provider order as the index.
fn segments_from_utterances(job: &Job, utterances: Vec<Utterance>) -> Vec<Segment> {
    utterances
        .into_iter()
        .enumerate()
        .map(|(index, u)| {
            let mut segment = Segment::new(job.id, index, u.start_ms, u.end_ms, u.text);
            segment.speaker_id = u.speaker_id;
            segment.confidence = u.confidence;
            segment
        })
        .collect()
}

fn input_file_name(input_ref: &str) -> String {
    input_ref
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("input.mp4")
        .to_string()
}
