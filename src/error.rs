use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::error::{AcquisitionError, PipelineError};

// Taken from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub message: HttpErrorResponse,
}

#[derive(Debug, Serialize)]
pub struct HttpErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
}

impl From<String> for HttpErrorResponse {
    fn from(message: String) -> Self {
        HttpErrorResponse {
            error: message,
            stage: None,
        }
    }
}

impl From<&str> for HttpErrorResponse {
    fn from(message: &str) -> Self {
        HttpErrorResponse::from(message.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let mut res = Json(self.message).into_response();
        *res.status_mut() = self.status;
        res
    }
}

impl From<PipelineError> for ServiceError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            PipelineError::Acquisition(AcquisitionError::Unknown(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PipelineError::Acquisition(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Classification(_) | PipelineError::Transcription(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ServiceError {
            status,
            message: HttpErrorResponse {
                error: err.to_string(),
                stage: Some(err.stage()),
            },
        }
    }
}

pub type ServiceResult<T, E = ServiceError> = Result<T, E>;

#[macro_export]
macro_rules! bail_service {
    ($status:expr, $fmt:expr $(, $arg:expr)*) => {
        return Err($crate::error::ServiceError {
            status: $status,
            message: $crate::error::HttpErrorResponse::from(format!($fmt $(, $arg)*)),
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::{ClassificationError, ConfigurationError, ExtractionError};

    #[test]
    fn pipeline_failures_map_to_status_codes() {
        let cases = vec![
            (
                PipelineError::Configuration(ConfigurationError {
                    tool: "ffmpeg".into(),
                    guidance: String::new(),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                PipelineError::InvalidUrl("nope".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AcquisitionError::Transient("HTTP Error 404".into()).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AcquisitionError::Unknown("disk full".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ExtractionError::MissingTool("ffmpeg".into()).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ClassificationError::UnexpectedShape("empty".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let stage = err.stage();
            let service_error = ServiceError::from(err);
            assert_eq!(service_error.status, status);
            assert_eq!(service_error.message.stage, Some(stage));
        }
    }

    #[test]
    fn error_body_is_json() {
        let body = serde_json::to_value(HttpErrorResponse::from("Model busy")).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Model busy" }));
    }
}
