use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, VadsrtError};
use crate::language::{language_hint, subtitle_stream_language, LanguageTag};
use crate::media::{MediaProcessorFactory, MediaProcessorTrait};
use crate::segment::{Chunk, SegmentPlanner};
use crate::subtitle::{self, Cue};
use crate::timeline::{ChunkTranscript, ReconstructionStats, TimelineReconstructor};
use crate::transcribe::{Transcriber, TranscriberFactory, VadParams, VocalSeparator, VoiceActivityDetector};
use crate::translate::{BatchTranslator, TranslationOutcome, TranslationReport};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "flac", "ogg", "wma", "aiff", "aif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv", "wmv", "webm", "m4v", "mpeg", "mpg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Audio,
    Video,
    Subtitle,
}

impl InputKind {
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if ext == "srt" {
            Some(Self::Subtitle)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Audio)
        } else {
            None
        }
    }
}

/// Transcribe an audio or video file, optionally translating and muxing the result.
#[derive(Debug, Clone, Default)]
pub struct TranscribeRequest {
    pub input: PathBuf,
    /// Source language hint; `None` or `auto` lets the transcriber decide
    pub language: Option<String>,
    /// Translation target
    pub target: Option<String>,
    /// SRT path, or the output video when `embed` is set
    pub output: Option<PathBuf>,
    pub denoise: bool,
    pub embed: bool,
}

/// Translate an existing SRT file, optionally muxing it into `video`.
#[derive(Debug, Clone, Default)]
pub struct TranslateRequest {
    pub input: PathBuf,
    pub target: String,
    /// SRT path, or the output video when `video` is set
    pub output: Option<PathBuf>,
    pub video: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct EmbedRequest {
    pub video: PathBuf,
    pub srt: PathBuf,
    pub language: Option<String>,
    pub output: Option<PathBuf>,
}

/// Transcription counters for the run summary
#[derive(Debug, Clone, Default)]
pub struct TranscriptionStats {
    pub chunks_planned: usize,
    pub chunks_silent: usize,
    pub chunks_failed: usize,
    pub denoised: bool,
    /// Cancelled before every chunk was dispatched
    pub interrupted: bool,
    pub timeline: ReconstructionStats,
}

#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub cues: Vec<Cue>,
    pub stats: TranscriptionStats,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub original_srt: Option<PathBuf>,
    pub translated_srt: Option<PathBuf>,
    pub embedded_video: Option<PathBuf>,
    pub cue_count: usize,
    pub transcription: Option<TranscriptionStats>,
    pub translation: Option<TranslationReport>,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "─ Summary ─")?;
        if let Some(path) = &self.original_srt {
            writeln!(f, "│ Subtitles:  {}", path.display())?;
        }
        if let Some(path) = &self.translated_srt {
            writeln!(f, "│ Translated: {}", path.display())?;
        }
        if let Some(path) = &self.embedded_video {
            writeln!(f, "│ Video:      {}", path.display())?;
        }
        writeln!(f, "│ Cues:       {}", self.cue_count)?;
        if let Some(stats) = &self.transcription {
            writeln!(
                f,
                "│ Chunks:     {} planned, {} silent, {} failed",
                stats.chunks_planned, stats.chunks_silent, stats.chunks_failed
            )?;
            if !stats.timeline.dropped.is_empty() {
                writeln!(f, "│ Dropped:    {} overlapping cues", stats.timeline.dropped.len())?;
            }
            if stats.interrupted {
                writeln!(f, "│ Interrupted: partial transcription saved")?;
            }
        }
        if let Some(report) = &self.translation {
            writeln!(
                f,
                "│ Batches:    {}/{} translated{}",
                report.batches_translated,
                report.batches_total,
                if report.fallback_used { " (local fallback)" } else { "" }
            )?;
            for failure in &report.failed {
                writeln!(
                    f,
                    "│   batch {} kept source text after {} attempts: {}",
                    failure.batch_id, failure.attempts, failure.reason
                )?;
            }
        }
        write!(f, "│ Elapsed:    {}", format_elapsed(self.elapsed))
    }
}

pub struct Workflow {
    config: Config,
    detector: Box<dyn VoiceActivityDetector>,
    transcriber: Box<dyn Transcriber>,
    separator: Box<dyn VocalSeparator>,
    media: Box<dyn MediaProcessorTrait>,
    planner: SegmentPlanner,
    reconstructor: TimelineReconstructor,
    translator: Option<Arc<BatchTranslator>>,
    cancel: CancellationToken,
}

impl Workflow {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let detector = TranscriberFactory::create_detector(&config);
        let transcriber = TranscriberFactory::create_transcriber(&config);
        let separator = TranscriberFactory::create_separator(&config);
        let media = MediaProcessorFactory::create_processor(config.media.clone());

        Ok(Self::with_components(config, detector, transcriber, separator, media))
    }

    pub fn with_components(
        config: Config,
        detector: Box<dyn VoiceActivityDetector>,
        transcriber: Box<dyn Transcriber>,
        separator: Box<dyn VocalSeparator>,
        media: Box<dyn MediaProcessorTrait>,
    ) -> Self {
        let planner = SegmentPlanner::new(&config.vad);
        let reconstructor = TimelineReconstructor::new(&config.timeline);
        Self {
            config,
            detector,
            transcriber,
            separator,
            media,
            planner,
            reconstructor,
            translator: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `translator` instead of resolving a provider route from config.
    pub fn with_translator(mut self, translator: BatchTranslator) -> Self {
        self.translator = Some(Arc::new(translator));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// VAD → plan → per-chunk transcription → global timeline.
    pub async fn transcribe_samples(
        &self,
        samples: Vec<f32>,
        language: Option<LanguageTag>,
        denoise: bool,
    ) -> Result<Transcription> {
        let (audio, denoised) = if denoise {
            match self.separator.isolate(&samples).await {
                Ok(isolated) => (isolated, true),
                Err(e) => {
                    warn!("Vocal isolation failed, continuing with the original audio: {}", e);
                    (samples, false)
                }
            }
        } else {
            (samples, false)
        };

        let params = VadParams::from_config(&self.config.vad, denoised);
        info!(
            "│ Detecting speech (threshold {:.2}, min silence {}ms)",
            params.threshold, params.min_silence_ms
        );
        let spans = self.detector.detect(&audio, &params).await?;
        let chunks = self.planner.plan(&spans, &audio);
        drop(audio);

        let mut stats = TranscriptionStats {
            chunks_planned: chunks.len(),
            denoised,
            ..TranscriptionStats::default()
        };
        if chunks.is_empty() {
            info!("│ No speech detected");
            return Ok(Transcription { cues: Vec::new(), stats });
        }

        info!(
            "│ Transcribing {} chunks (language: {})",
            chunks.len(),
            language.as_ref().map(|l| l.as_str()).unwrap_or("auto")
        );

        let progress = progress_bar(chunks.len() as u64, "chunks");
        let parallel = self.config.transcriber.max_parallel_chunks.max(1);
        let cancel = &self.cancel;
        let ticker = &progress;

        let outcomes: Vec<ChunkOutcome> = stream::iter(chunks)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(move |chunk| {
                let language = language.clone();
                let progress = ticker;
                async move {
                    let outcome = self.transcribe_chunk(chunk, language).await;
                    progress.inc(1);
                    outcome
                }
            })
            .buffer_unordered(parallel)
            .collect()
            .await;
        progress.finish_and_clear();

        stats.interrupted = outcomes.len() < stats.chunks_planned;
        if stats.interrupted {
            warn!(
                "Interrupted after {}/{} chunks, keeping what was transcribed",
                outcomes.len(),
                stats.chunks_planned
            );
        }

        let mut transcripts = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Transcribed(transcript) => transcripts.push(transcript),
                ChunkOutcome::Silent => stats.chunks_silent += 1,
                ChunkOutcome::Failed => stats.chunks_failed += 1,
            }
        }

        let reconstruction = self.reconstructor.reconstruct(transcripts);
        stats.timeline = reconstruction.stats;
        Ok(Transcription {
            cues: reconstruction.cues,
            stats,
        })
    }

    async fn transcribe_chunk(&self, chunk: Chunk, language: Option<LanguageTag>) -> ChunkOutcome {
        if chunk.is_silent(self.config.vad.silence_floor) {
            debug!("Chunk {} is silent, skipping", chunk.index);
            return ChunkOutcome::Silent;
        }

        match self.transcriber.transcribe(&chunk.audio_samples, language).await {
            Ok(segments) => {
                debug!("Chunk {} produced {} segments", chunk.index, segments.len());
                ChunkOutcome::Transcribed(ChunkTranscript::for_chunk(&chunk, segments))
            }
            Err(e) => {
                warn!(
                    "Chunk {} ({:.2}s-{:.2}s) failed: {}",
                    chunk.index,
                    chunk.global_offset_sec,
                    chunk.end_sec(),
                    e
                );
                ChunkOutcome::Failed
            }
        }
    }

    pub async fn transcribe_file(&self, request: &TranscribeRequest) -> Result<RunSummary> {
        let started = Instant::now();
        let input = request.input.as_path();
        if !input.exists() {
            return Err(VadsrtError::FileNotFound(input.display().to_string()));
        }

        let kind = match InputKind::detect(input) {
            Some(InputKind::Subtitle) => {
                return Err(VadsrtError::InvalidInput(format!(
                    "{} is a subtitle file, use the translate command",
                    input.display()
                )))
            }
            Some(kind) => kind,
            None => {
                warn!("{} does not look like audio or video, trying anyway", input.display());
                InputKind::Audio
            }
        };
        if request.embed && kind != InputKind::Video {
            return Err(VadsrtError::InvalidInput(
                "embedding subtitles requires a video input".to_string(),
            ));
        }

        let language = language_hint(request.language.as_deref());
        let target = parse_target(request.target.as_deref())?;
        if let (Some(source), Some(target)) = (&language, &target) {
            if source == target {
                return Err(VadsrtError::InvalidInput(format!(
                    "source and target language are both {}",
                    target
                )));
            }
        }

        info!("Transcribing {}", input.display());
        self.media.check_availability().await?;
        let samples = self.media.decode_audio(input, self.config.vad.sample_rate).await?;
        let transcription = self
            .transcribe_samples(samples, language, request.denoise)
            .await?;

        let mut summary = RunSummary {
            cue_count: transcription.cues.len(),
            transcription: Some(transcription.stats.clone()),
            ..RunSummary::default()
        };
        if transcription.cues.is_empty() {
            warn!("No subtitles were produced for {}", input.display());
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }

        let srt_output = if request.embed { None } else { request.output.as_deref() };
        let (original_path, translated_path) = transcription_outputs(input, srt_output, target.as_ref());

        subtitle::write_srt(&transcription.cues, &original_path).await?;
        info!("│ Subtitles saved to {}", original_path.display());
        summary.original_srt = Some(original_path.clone());

        let mut final_srt = original_path;
        if let (Some(target), Some(translated_path)) = (&target, translated_path) {
            let outcome = self.translate_cues(&transcription.cues, target).await?;
            subtitle::write_translated_srt(&outcome.cues, &translated_path).await?;
            info!("│ Translated subtitles saved to {}", translated_path.display());
            summary.translation = Some(outcome.report);
            summary.translated_srt = Some(translated_path.clone());
            final_srt = translated_path;
        }

        if request.embed {
            let code = subtitle_stream_language(request.target.as_deref(), request.language.as_deref(), &final_srt);
            let video = self
                .media
                .embed_subtitles(input, &final_srt, code, request.output.clone())
                .await?;
            summary.embedded_video = Some(video);
        }

        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    pub async fn translate_file(&self, request: &TranslateRequest) -> Result<RunSummary> {
        let started = Instant::now();
        let input = request.input.as_path();
        if InputKind::detect(input) != Some(InputKind::Subtitle) {
            warn!("{} is not an .srt file, trying anyway", input.display());
        }
        if let Some(video) = &request.video {
            if InputKind::detect(video) != Some(InputKind::Video) {
                return Err(VadsrtError::InvalidInput(
                    "embedding subtitles requires a video input".to_string(),
                ));
            }
        }
        let target = parse_target(Some(&request.target))?
            .ok_or_else(|| VadsrtError::InvalidInput("a target language is required".to_string()))?;

        let cues = subtitle::read_srt(input).await?;
        if cues.is_empty() {
            return Err(VadsrtError::InvalidInput(format!(
                "{} contains no subtitles",
                input.display()
            )));
        }
        info!("Translating {} ({} cues)", input.display(), cues.len());

        let srt_output = if request.video.is_some() { None } else { request.output.as_deref() };
        let output = translation_output(input, &target, srt_output);

        let outcome = self.translate_cues(&cues, &target).await?;
        subtitle::write_translated_srt(&outcome.cues, &output).await?;
        info!("│ Translated subtitles saved to {}", output.display());

        let mut summary = RunSummary {
            translated_srt: Some(output.clone()),
            cue_count: outcome.cues.len(),
            translation: Some(outcome.report),
            ..RunSummary::default()
        };

        if let Some(video) = &request.video {
            self.media.check_availability().await?;
            let code = subtitle_stream_language(Some(target.as_str()), None, &output);
            summary.embedded_video = Some(
                self.media
                    .embed_subtitles(video, &output, code, request.output.clone())
                    .await?,
            );
        }

        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    pub async fn embed_file(&self, request: &EmbedRequest) -> Result<RunSummary> {
        let started = Instant::now();
        if InputKind::detect(&request.video) != Some(InputKind::Video) {
            return Err(VadsrtError::InvalidInput(format!(
                "{} is not a video file",
                request.video.display()
            )));
        }

        self.media.check_availability().await?;
        let code = subtitle_stream_language(None, request.language.as_deref(), &request.srt);
        let video = self
            .media
            .embed_subtitles(&request.video, &request.srt, code, request.output.clone())
            .await?;

        Ok(RunSummary {
            original_srt: Some(request.srt.clone()),
            embedded_video: Some(video),
            elapsed: started.elapsed(),
            ..RunSummary::default()
        })
    }

    async fn translate_cues(&self, cues: &[Cue], target: &LanguageTag) -> Result<TranslationOutcome> {
        let translator = match &self.translator {
            Some(translator) => Arc::clone(translator),
            None => Arc::new(BatchTranslator::from_config(&self.config.translate).await?),
        };
        translator.translate_cues(cues, target, &self.cancel).await
    }
}

enum ChunkOutcome {
    Transcribed(ChunkTranscript),
    Silent,
    Failed,
}

fn parse_target(target: Option<&str>) -> Result<Option<LanguageTag>> {
    match target {
        None => Ok(None),
        Some(value) => LanguageTag::parse(value)
            .map(Some)
            .ok_or_else(|| VadsrtError::InvalidInput(format!("invalid target language: {}", value))),
    }
}

/// Where a transcription and its translation are written.
///
/// Without a target the transcript goes to `output` or `<input stem>.srt`.
/// With a target and an explicit output, the translation takes the output
/// path and the transcript moves to `<output stem>.original.srt`; with a
/// target only, the translation is `<stem>.<target>.srt`.
pub fn transcription_outputs(
    input: &Path,
    output: Option<&Path>,
    target: Option<&LanguageTag>,
) -> (PathBuf, Option<PathBuf>) {
    let base = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension("srt"));

    match (target, output) {
        (None, _) => (base, None),
        (Some(_), Some(_)) => (with_suffix(&base, "original"), Some(base)),
        (Some(target), None) => {
            let translated = with_suffix(&base, target.as_str());
            (base, Some(translated))
        }
    }
}

/// `output`, or `<input stem>.<target>.srt` next to the input
pub fn translation_output(input: &Path, target: &LanguageTag, output: Option<&Path>) -> PathBuf {
    output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| with_suffix(input, target.as_str()))
}

/// `dir/name.ext` → `dir/name.<suffix>.ext`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}.{}", stem, suffix),
    };
    path.with_file_name(file_name)
}

fn progress_bar(len: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {}",
            unit
        ))
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Format elapsed time as a short human-readable string
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}
