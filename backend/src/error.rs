use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::{ErrorResponse, UnknownModelType};

use crate::pipeline::PipelineError;
use crate::recommend::RecommendError;
use crate::storage::archive::ArchiveError;
use crate::storage::session::SessionError;
use crate::trends::{ForecastError, TrendError};

/// Every failure a handler can report. Rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Upload exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("{0}")]
    ModelUnavailable(String),
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Recommend(#[from] RecommendError),
    #[error(transparent)]
    Trend(#[from] TrendError),
}

impl From<UnknownModelType> for ApiError {
    fn from(e: UnknownModelType) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(format!("IO error: {}", e))
    }
}

impl From<actix_multipart::MultipartError> for ApiError {
    fn from(e: actix_multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("Malformed upload: {}", e))
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(e: actix_web::error::BlockingError) -> Self {
        ApiError::Internal(format!("Worker failed: {}", e))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Session(e) => match e {
                SessionError::InvalidUserId(_) => StatusCode::BAD_REQUEST,
                SessionError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Archive(e) => match e {
                ArchiveError::UnsupportedFormat(_)
                | ArchiveError::InvalidZip(_)
                | ArchiveError::PasswordProtected
                | ArchiveError::Rar(_) => StatusCode::BAD_REQUEST,
                ArchiveError::TooManyEntries { .. } | ArchiveError::TooLarge { .. } => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                ArchiveError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Pipeline(e) => match e {
                PipelineError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Recommend(e) => match e {
                RecommendError::Decode(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Trend(e) => match e {
                TrendError::NoKeywords => StatusCode::BAD_REQUEST,
                TrendError::NoData(_) => StatusCode::NOT_FOUND,
                TrendError::Forecast(ForecastError::InsufficientData(_)) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }
        HttpResponse::build(status).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
