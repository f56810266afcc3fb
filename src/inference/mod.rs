use anyhow::{bail, Result};
use hf_hub::api::sync::Api;
use tracing::info;

use crate::config::Config;
use crate::inference::models::accent::{AccentHead, WhisperAccentModel};
use crate::inference::models::model::ModelBase;
use crate::inference::models::whisper::WhisperModel;

pub mod audio_pipeline;
pub mod models;
pub mod pcm_decode;
pub mod task;

/// Models shared by every run of the process.
pub struct LoadedModels {
    pub accent: WhisperAccentModel,
    pub transcriber: Option<WhisperModel>,
}

/// Fetches and loads the speech and accent models described by `config`.
///
/// This is slow and touches the network on first use, call it once at startup.
#[tracing::instrument(level = "info", skip_all)]
pub fn load_models(config: &Config) -> Result<LoadedModels> {
    if config.accent_repo_id.is_empty() {
        bail!("No accent model configured, set accent_repo_id in the configuration file")
    }
    let api = Api::new()?;
    let speech = WhisperModel::new(
        &api,
        &ModelBase {
            name: "Candle Whisper".into(),
            repo_id: config.speech_repo_id.clone(),
            repo_revision: config.speech_repo_revision.clone(),
        },
        &config.speech_config_file,
        &config.speech_tokenizer_file,
        &config.speech_weights_file,
        &config.speech_mel_filters_file,
    )?;
    let head = AccentHead::new(
        &api,
        &ModelBase {
            name: "Accent head".into(),
            repo_id: config.accent_repo_id.clone(),
            repo_revision: config.accent_repo_revision.clone(),
        },
        &config.accent_weights_file,
        &config.accent_labels_file,
        speech.pipeline().embedding_size(),
    )?;

    let accent = WhisperAccentModel::new(speech.pipeline().clone(), head);
    let transcriber = config.transcribe.then_some(speech);
    info!(transcribe = transcriber.is_some(), "Models loaded");
    Ok(LoadedModels { accent, transcriber })
}
