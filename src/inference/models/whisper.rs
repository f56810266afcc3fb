use anyhow::{Error, Result};
use hf_hub::api::sync::Api;
use rand::SeedableRng;
use tracing::info;

use crate::inference::audio_pipeline::SpeechPipeline;
use crate::inference::models::model::ModelBase;
use crate::inference::task::transcribe::Transcriber;

// Based on https://github.com/huggingface/candle/blob/main/candle-examples/examples/whisper/main.rs
#[derive(Clone)]
pub struct WhisperModel {
    pipeline: SpeechPipeline,
}

impl WhisperModel {
    #[tracing::instrument(level = "info", skip(api))]
    pub fn new(
        api: &Api,
        base: &ModelBase,
        config_filename: &str,
        tokenizer_filename: &str,
        gguf_filename: &str,
        mel_filters_filename: &str,
    ) -> Result<Self> {
        let repo = api.repo(base.repo());
        let pipeline = SpeechPipeline::with_gguf_model(
            &repo,
            config_filename,
            tokenizer_filename,
            gguf_filename,
            mel_filters_filename,
            rand::rngs::StdRng::from_seed([0; 32]),
        )?;
        info!("Loaded {} from {}", base.name, base.repo_id);

        Ok(Self { pipeline })
    }

    /// The underlying pipeline, shared with models that build on its encoder.
    pub fn pipeline(&self) -> &SpeechPipeline {
        &self.pipeline
    }
}

impl Transcriber for WhisperModel {
    #[tracing::instrument(level = "info", skip_all, fields(samples = pcm.len()))]
    fn transcribe(&mut self, pcm: &[f32]) -> Result<String, Error> {
        self.pipeline.transcribe(pcm)
    }
}
