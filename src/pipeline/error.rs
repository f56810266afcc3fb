use thiserror::Error;

/// A required external tool is not reachable. Raised by the pre-flight check only.
#[derive(Debug, Error)]
#[error("`{tool}` not found. {guidance}")]
pub struct ConfigurationError {
    pub tool: String,
    pub guidance: String,
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// DNS, connection or HTTP level failure while fetching the source
    #[error("network failure while fetching media: {0}")]
    Transient(String),

    /// The downloader or transcoder exited with a non-zero status
    #[error("{tool} failed with status {status}: {detail}")]
    ToolFailure {
        tool: String,
        status: String,
        detail: String,
    },

    #[error("{0}")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("`{0}` could not be started, is it installed?")]
    MissingTool(String),

    #[error("{tool} failed with status {status}: {detail}")]
    ToolFailure {
        tool: String,
        status: String,
        detail: String,
    },
}

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("unexpected classifier output: {0}")]
    UnexpectedShape(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("could not load waveform: {0}")]
    Load(String),
}

impl From<candle_core::Error> for ClassificationError {
    fn from(err: candle_core::Error) -> Self {
        ClassificationError::Inference(err.to_string())
    }
}

/// The first failure of a run. Its message names the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid video URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to download video: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("FFmpeg audio extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Accent classification failed: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Transcription failed: {0}")]
    Transcription(String),
}

impl PipelineError {
    /// Short name of the stage the error originates from, used as a log field.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "preflight",
            PipelineError::InvalidUrl(_) => "request",
            PipelineError::Acquisition(_) => "acquire",
            PipelineError::Extraction(_) => "extract",
            PipelineError::Classification(_) => "classify",
            PipelineError::Transcription(_) => "transcribe",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failed_stage() {
        let err = PipelineError::from(AcquisitionError::Transient("HTTP Error 404".into()));
        assert_eq!(
            err.to_string(),
            "Failed to download video: network failure while fetching media: HTTP Error 404"
        );
        assert_eq!(err.stage(), "acquire");

        let err = PipelineError::from(ExtractionError::MissingTool("ffmpeg".into()));
        assert!(err.to_string().starts_with("FFmpeg audio extraction failed"));
        assert_eq!(err.stage(), "extract");

        let err = PipelineError::from(ClassificationError::UnexpectedShape("empty".into()));
        assert!(err.to_string().starts_with("Accent classification failed"));
    }

    #[test]
    fn configuration_error_carries_guidance() {
        let err = ConfigurationError {
            tool: "ffmpeg".into(),
            guidance: "Install it from https://ffmpeg.org/download.html".into(),
        };
        let message = PipelineError::from(err).to_string();
        assert!(message.contains("`ffmpeg` not found"));
        assert!(message.contains("https://ffmpeg.org/download.html"));
    }
}
