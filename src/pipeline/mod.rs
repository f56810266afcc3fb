use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::inference;
use crate::inference::task::classify::AccentModel;
use crate::inference::task::transcribe::Transcriber;
use crate::pipeline::acquire::{MediaAcquirer, ToolAcquirer};
use crate::pipeline::classify::ClassifierAdapter;
use crate::pipeline::decision::{decide, normalized_scores, AccentDecision, AccentScore};
use crate::pipeline::error::{AcquisitionError, PipelineError};
use crate::pipeline::extract::{AudioExtractor, FfmpegExtractor};

pub mod acquire;
pub mod assets;
pub mod classify;
pub mod decision;
pub mod error;
pub mod extract;
pub mod presenter;
pub mod tool;

#[derive(Debug, Clone, Serialize)]
pub struct AccentReport {
    #[serde(flatten)]
    pub decision: AccentDecision,
    /// Re-normalized share of each recognized English accent, best first
    pub scores: Vec<AccentScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// Wall clock seconds spent on the whole run
    pub inference_time: f64,
}

impl AccentReport {
    pub fn headline(&self) -> String {
        presenter::headline(&self.decision)
    }

    pub fn explanation(&self) -> String {
        presenter::explanation(&self.decision)
    }

    pub fn render(&self) -> String {
        presenter::render(&self.decision, &self.scores, self.transcript.as_deref())
    }
}

/// Everything a run needs, built once per process and reused for every request.
///
/// Runs are strictly sequential, callers sharing a pipeline must serialize access to it.
pub struct Pipeline {
    acquirer: Box<dyn MediaAcquirer>,
    extractor: Box<dyn AudioExtractor>,
    classifier: ClassifierAdapter,
    transcriber: Option<Box<dyn Transcriber>>,
}

impl Pipeline {
    pub fn new(
        acquirer: Box<dyn MediaAcquirer>,
        extractor: Box<dyn AudioExtractor>,
        model: Box<dyn AccentModel>,
    ) -> Self {
        Self {
            acquirer,
            extractor,
            classifier: ClassifierAdapter::new(model),
            transcriber: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Box<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Loads the models and wires the external tools named in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let models = inference::load_models(config)?;
        let acquirer = ToolAcquirer {
            downloader: config.downloader_path.clone(),
            ffmpeg: config.ffmpeg_path.clone(),
            platform_domains: config.platform_domains.clone(),
            user_agent: config.user_agent.clone(),
            work_dir: config.work_dir(),
            retain_assets: config.retain_assets,
        };
        let extractor = FfmpegExtractor {
            ffmpeg: config.ffmpeg_path.clone(),
            retain_assets: config.retain_assets,
        };

        let pipeline = Pipeline::new(
            Box::new(acquirer),
            Box::new(extractor),
            Box::new(models.accent),
        );
        Ok(match models.transcriber {
            Some(transcriber) => pipeline.with_transcriber(Box::new(transcriber)),
            None => pipeline,
        })
    }

    /// Checks the external tools without starting a run.
    pub fn preflight(&self) -> Result<(), PipelineError> {
        Ok(self.extractor.preflight()?)
    }

    /// Runs every stage for `url`, stopping at the first failure.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn run(&mut self, url: &str) -> Result<AccentReport, PipelineError> {
        let started = Instant::now();
        let url = parse_url(url)?;
        self.preflight()?;

        let media = self.acquirer.acquire(&url)?;
        match media.size_on_disk() {
            Ok(size) if size > 0 => {}
            _ => {
                return Err(AcquisitionError::Unknown(format!(
                    "downloaded media {} is missing or empty",
                    media.path().display()
                ))
                .into())
            }
        }

        let audio = self.extractor.extract(&media)?;
        let waveform = ClassifierAdapter::load_waveform(&audio)?;
        // The waveform may sit in the media's scratch directory, drop it first
        drop(audio);
        drop(media);

        let result = self.classifier.classify(&waveform)?;
        let decision = decide(&result);
        let scores = normalized_scores(&result);
        if !decision.normalized {
            warn!(
                label = %decision.label,
                "No recognized English accent in the classifier output, using the global best"
            );
        }

        let transcript = match self.transcriber.as_mut() {
            Some(transcriber) => Some(
                transcriber
                    .transcribe(&waveform.samples)
                    .map_err(|err| PipelineError::Transcription(err.to_string()))?,
            ),
            None => None,
        };

        let inference_time = started.elapsed().as_secs_f64();
        info!(
            label = %decision.label,
            confidence = decision.confidence,
            inference_time,
            "Accent detected"
        );
        Ok(AccentReport {
            decision,
            scores,
            transcript,
            inference_time,
        })
    }
}

/// A pipeline shared by concurrent callers, runs take turns.
#[derive(Clone)]
pub struct SharedPipeline(Arc<Mutex<Pipeline>>);

impl SharedPipeline {
    pub fn new(pipeline: Pipeline) -> Self {
        Self(Arc::new(Mutex::new(pipeline)))
    }

    /// Runs `url` once the pipeline is free. Blocks the calling thread.
    pub fn run(&self, url: &str) -> Result<AccentReport, PipelineError> {
        self.lock().run(url)
    }

    // Runs keep no state between calls, so a panicked run does not invalidate the pipeline
    fn lock(&self) -> std::sync::MutexGuard<'_, Pipeline> {
        self.0.lock().unwrap_or_else(|poisoned| {
            warn!("A previous run panicked, reusing the pipeline");
            self.0.clear_poison();
            PoisonError::into_inner(poisoned)
        })
    }
}

/// Accepts absolute `http` and `https` URLs only.
pub fn parse_url(raw: &str) -> Result<Url, PipelineError> {
    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|err| PipelineError::InvalidUrl(format!("{raw}: {err}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(PipelineError::InvalidUrl(format!(
            "{raw}: expected an http(s) URL, got `{scheme}`"
        ))),
    }
}
