use std::path::PathBuf;

use anyhow::Result;
use clap_serde_derive::ClapSerde;
use serde::Serialize;

pub const DEFAULT_CONFIG_FILE: &str = "AccentProbe.toml";

#[derive(ClapSerde, Serialize, Debug, Clone)]
pub struct Config {
    /// The address the listener binds to
    #[default("0.0.0.0".to_string())]
    #[arg(short, long, env)]
    pub address: String,

    /// The port the listener binds to
    #[default(25567)]
    #[arg(short, long, env)]
    pub port: u16,

    /// The ffmpeg binary used to copy streams and extract audio
    #[default("ffmpeg".to_string())]
    #[arg(long, env)]
    pub ffmpeg_path: String,

    /// The yt-dlp binary used for video-sharing platforms
    #[default("yt-dlp".to_string())]
    #[arg(long, env)]
    pub downloader_path: String,

    /// Hosts (and their subdomains) downloaded with yt-dlp instead of ffmpeg
    #[default(vec!["youtube.com".to_string(), "youtu.be".to_string()])]
    #[arg(long, env, value_delimiter = ',')]
    pub platform_domains: Vec<String>,

    /// User agent presented to video-sharing platforms
    #[default("Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string())]
    #[arg(long, env)]
    pub user_agent: String,

    /// Directory for downloaded and extracted files, the system temp directory when empty
    #[default(String::new())]
    #[arg(long, env)]
    pub work_dir: String,

    /// Keep downloaded and extracted files after a run
    #[default(false)]
    #[arg(long, env)]
    pub retain_assets: bool,

    /// Repository holding the accent classification head, required
    #[default(String::new())]
    #[arg(long, env)]
    pub accent_repo_id: String,

    #[default("main".to_string())]
    #[arg(long, env)]
    pub accent_repo_revision: String,

    #[default("classifier.safetensors".to_string())]
    #[arg(long, env)]
    pub accent_weights_file: String,

    #[default("label_encoder.txt".to_string())]
    #[arg(long, env)]
    pub accent_labels_file: String,

    /// Repository holding the quantized Whisper model
    #[default("lmz/candle-whisper".to_string())]
    #[arg(long, env)]
    pub speech_repo_id: String,

    #[default("main".to_string())]
    #[arg(long, env)]
    pub speech_repo_revision: String,

    #[default("config-tiny.json".to_string())]
    #[arg(long, env)]
    pub speech_config_file: String,

    #[default("tokenizer-tiny.json".to_string())]
    #[arg(long, env)]
    pub speech_tokenizer_file: String,

    #[default("model-tiny-q4k.gguf".to_string())]
    #[arg(long, env)]
    pub speech_weights_file: String,

    #[default("melfilters.bytes".to_string())]
    #[arg(long, env)]
    pub speech_mel_filters_file: String,

    /// Attach an English transcript of the clip to every result
    #[default(false)]
    #[arg(long, env)]
    pub transcribe: bool,

    /// OTLP collector endpoint, telemetry export is disabled when empty
    #[default(String::new())]
    #[arg(long, env)]
    pub otlp_endpoint: String,

    /// Also log to the console while exporting telemetry
    #[default(true)]
    #[arg(long, env)]
    pub console: bool,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<Self> {
        let str = std::fs::read_to_string(path)?;
        let opt: <Config as ClapSerde>::Opt = toml::from_str(&str)?;
        Ok(Config::from(opt))
    }

    pub fn work_dir(&self) -> PathBuf {
        if self.work_dir.is_empty() {
            std::env::temp_dir().join("accent-probe")
        } else {
            PathBuf::from(&self.work_dir)
        }
    }

    pub fn otlp_endpoint(&self) -> Option<String> {
        Some(self.otlp_endpoint.clone()).filter(|endpoint| !endpoint.is_empty())
    }
}
