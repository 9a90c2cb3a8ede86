use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("No `file` field found in the multipart upload")]
    MissingFile,
    #[error("Invalid upload: {0}")]
    InvalidUpload(#[from] MultipartError),
    #[error("Upload rejected: {0}")]
    UploadRejected(#[from] MultipartRejection),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Inference failed: {0}")]
    InferenceFailure(String),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ClassifierError {
    pub fn status(&self) -> StatusCode {
        match self {
            ClassifierError::MissingFile | ClassifierError::InvalidImage(_) => {
                StatusCode::BAD_REQUEST
            }
            ClassifierError::InvalidUpload(err) => err.status(),
            ClassifierError::UploadRejected(rejection) => rejection.status(),
            ClassifierError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClassifierError::InferenceFailure(_) | ClassifierError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message sent to the client. Server-side failures hide their details.
    pub fn public_message(&self) -> String {
        match self {
            ClassifierError::MissingFile | ClassifierError::InvalidImage(_) => self.to_string(),
            ClassifierError::InvalidUpload(err) => format!("Invalid upload: {}", err.body_text()),
            ClassifierError::UploadRejected(rejection) => {
                format!("Upload rejected: {}", rejection.body_text())
            }
            ClassifierError::InferenceFailure(_) => "Inference failed".to_string(),
            ClassifierError::ModelUnavailable(_) => "Model unavailable".to_string(),
            ClassifierError::Configuration(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ClassifierError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
