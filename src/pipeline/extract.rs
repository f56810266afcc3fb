use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::pipeline::assets::{AudioAsset, MediaAsset};
use crate::pipeline::error::{ConfigurationError, ExtractionError};
use crate::pipeline::tool;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;
pub const TARGET_CHANNELS: u16 = 1;

const FFMPEG_GUIDANCE: &str =
    "Please install FFmpeg and ensure it's in your PATH: https://ffmpeg.org/download.html";

/// Turns downloaded media into a mono 16 kHz waveform.
pub trait AudioExtractor: Send {
    /// Checks the tools this extractor depends on before a run starts.
    fn preflight(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    fn extract(&self, media: &MediaAsset) -> Result<AudioAsset, ExtractionError>;
}

/// Output location of the waveform: the media path with a `.wav` extension.
pub fn waveform_path(media: &Path) -> PathBuf {
    let path = media.with_extension("wav");
    if path == media {
        // ffmpeg cannot write over its own input
        return media.with_extension("16k.wav");
    }
    path
}

#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    pub ffmpeg: String,
    pub retain_assets: bool,
}

impl AudioExtractor for FfmpegExtractor {
    fn preflight(&self) -> Result<(), ConfigurationError> {
        tool::probe(&self.ffmpeg, "-version", FFMPEG_GUIDANCE)
    }

    #[tracing::instrument(level = "info", skip_all, fields(media = %media.path().display()))]
    fn extract(&self, media: &MediaAsset) -> Result<AudioAsset, ExtractionError> {
        let audio = AudioAsset::new(waveform_path(media.path()), self.retain_assets);

        let args: Vec<OsString> = vec![
            "-y".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            media.path().as_os_str().to_os_string(),
            "-vn".into(),
            "-ar".into(),
            TARGET_SAMPLE_RATE.to_string().into(),
            "-ac".into(),
            TARGET_CHANNELS.to_string().into(),
            audio.path().as_os_str().to_os_string(),
        ];
        let output = tool::run(&self.ffmpeg, &args).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                ExtractionError::MissingTool(self.ffmpeg.clone())
            } else {
                ExtractionError::ToolFailure {
                    tool: self.ffmpeg.clone(),
                    status: "not started".to_string(),
                    detail: err.to_string(),
                }
            }
        })?;
        if !output.status.success() {
            return Err(ExtractionError::ToolFailure {
                tool: self.ffmpeg.clone(),
                status: tool::status_text(&output),
                detail: tool::stderr_tail(&output.stderr),
            });
        }

        info!(path = %audio.path().display(), "Audio extracted");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_the_media_extension() {
        assert_eq!(
            waveform_path(Path::new("/tmp/dQw4w9WgXcQ.webm")),
            PathBuf::from("/tmp/dQw4w9WgXcQ.wav")
        );
        assert_eq!(
            waveform_path(Path::new("/tmp/accent-probe-x1.mp4")),
            PathBuf::from("/tmp/accent-probe-x1.wav")
        );
        assert_eq!(
            waveform_path(Path::new("/tmp/clip")),
            PathBuf::from("/tmp/clip.wav")
        );
    }

    #[test]
    fn never_overwrites_a_wav_input() {
        assert_eq!(
            waveform_path(Path::new("/tmp/clip.wav")),
            PathBuf::from("/tmp/clip.16k.wav")
        );
    }

    #[test]
    fn missing_ffmpeg_fails_preflight_and_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let media_path = dir.path().join("clip.mp4");
        std::fs::write(&media_path, b"not really a video").unwrap();

        let extractor = FfmpegExtractor {
            ffmpeg: "definitely-not-ffmpeg-7f3a".to_string(),
            retain_assets: false,
        };
        let err = extractor.preflight().unwrap_err();
        assert!(err.guidance.contains("ffmpeg.org"));

        let media = MediaAsset::new(&media_path, true);
        let err = extractor.extract(&media).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingTool(_)));
        assert!(!dir.path().join("clip.wav").exists());
    }
}
