use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;


#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}


#[derive(Debug, Serialize)]
pub struct PredictionNotFoundBody {
    pub error: String,
    pub prediction_id: String,
    pub original_img_path: String,
}


#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to download `{key}`: {reason}")]
    DownloadFailed { key: String, reason: String },

    #[error("failed to upload `{key}`: {reason}")]
    UploadFailed { key: String, reason: String },
}

impl StorageError {
    pub fn download(key: &str, reason: impl ToString) -> Self {
        StorageError::DownloadFailed {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn upload(key: &str, reason: impl ToString) -> Self {
        StorageError::UploadFailed {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}


#[derive(Debug, Error)]
pub enum LabelError {
    #[error("line {line}: expected 5 or 6 fields, found {found}")]
    FieldCount { line: usize, found: usize },

    #[error("line {line}: `{value}` is not a valid {field}")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: {field} {value} is outside [0, 1]")]
    OutOfRange {
        line: usize,
        field: &'static str,
        value: f64,
    },

    #[error("line {line}: class index {index} is not in the class table ({len} names)")]
    UnknownClass { line: usize, index: usize, len: usize },

    #[error("invalid class table: {0}")]
    ClassTable(String),

    #[error("failed to read class table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse class table: {0}")]
    Yaml(#[from] serde_yaml::Error),
}


#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to start detection model: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("detection model exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("detection model did not finish within {0:?}")]
    Timeout(std::time::Duration),
}


#[derive(Debug, Error)]
pub enum RecordError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("a record for prediction `{0}` already exists")]
    Duplicate(String),
}


#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("inference service answered {0}")]
    Status(reqwest::StatusCode),

    #[error("unexpected inference response: {0}")]
    Shape(String),
}


#[derive(Debug, Error)]
pub enum ChatError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telegram api error in {method}: {description}")]
    Api { method: String, description: String },

    #[error("telegram file error: {0}")]
    Io(#[from] std::io::Error),
}


/// Terminal failure of one `/predict` request.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("missing imgName parameter")]
    MissingImageName,

    #[error("invalid imgName `{0}`")]
    InvalidImageName(String),

    #[error(transparent)]
    Download(StorageError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("label file not found for prediction {prediction_id}")]
    PredictionNotFound {
        prediction_id: String,
        original_img_path: String,
    },

    #[error("malformed label file: {0}")]
    MalformedLabels(#[from] LabelError),

    #[error(transparent)]
    Publish(StorageError),

    #[error(transparent)]
    Persist(#[from] RecordError),

    #[error("local io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectError {
    pub fn status(&self) -> StatusCode {
        match self {
            DetectError::MissingImageName | DetectError::InvalidImageName(_) => {
                StatusCode::BAD_REQUEST
            }
            DetectError::PredictionNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            DetectError::MissingImageName => "Missing imgName parameter",
            DetectError::InvalidImageName(_) => "Invalid imgName parameter",
            DetectError::Download(_) => "Failed to download image from S3",
            DetectError::Model(_) => "Object detection failed",
            DetectError::PredictionNotFound { .. } => "Prediction result not found",
            DetectError::MalformedLabels(_) => "Failed to parse prediction result",
            DetectError::Publish(_) => "Failed to upload predicted image to S3",
            DetectError::Persist(_) => "Failed to store prediction",
            DetectError::Io(_) => "Internal server error",
        }
    }
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.message().to_string();
        match self {
            DetectError::PredictionNotFound {
                prediction_id,
                original_img_path,
            } => (
                status,
                Json(PredictionNotFoundBody {
                    error,
                    prediction_id,
                    original_img_path,
                }),
            )
                .into_response(),
            _ => (status, Json(ErrorBody { error })).into_response(),
        }
    }
}
