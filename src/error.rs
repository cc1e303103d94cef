use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("{0} env var has an invalid value: {1}")]
  Invalid(&'static str, String),
  #[error("unknown query gateway {0:?}, expected \"proxy\" or \"command\"")]
  UnknownGateway(String),
  #[error("unknown argument {0:?}, expected --once or --reproject")]
  UnknownArgument(String),
}

/// Failures of the indexing side: chain access, decoding and storage.
#[derive(Error, Debug)]
pub enum IndexerError {
  #[error("http request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("malformed json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("database error: {0}")]
  Database(#[from] diesel::result::Error),
  #[error("database pool error: {0}")]
  Pool(#[from] diesel::r2d2::PoolError),
  #[error("migration failed: {0}")]
  Migration(#[from] diesel_migrations::RunMigrationsError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("query gateway error: {0}")]
  Gateway(String),
  #[error("query gateway timed out after {0:?}")]
  Timeout(Duration),
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
}

/// Errors surfaced by the read API. Every variant renders as `{"error": ...}`.
#[derive(Error, Debug)]
pub enum ApiError {
  #[error("not found")]
  NotFound,
  #[error("route not found")]
  RouteNotFound,
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  Internal(String),
}

impl ResponseError for ApiError {
  fn status_code(&self) -> StatusCode {
    match *self {
      ApiError::NotFound | ApiError::RouteNotFound => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    HttpResponse::build(self.status_code()).json(ErrorBody { error: self.to_string() })
  }
}

impl From<IndexerError> for ApiError {
  fn from(err: IndexerError) -> Self {
    ApiError::Internal(err.to_string())
  }
}

impl From<BlockingError<IndexerError>> for ApiError {
  fn from(err: BlockingError<IndexerError>) -> Self {
    match err {
      BlockingError::Error(e) => e.into(),
      BlockingError::Canceled => ApiError::Internal(String::from("blocking task was cancelled")),
    }
  }
}
