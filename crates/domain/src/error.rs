use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Shared error type used across all tracehub crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed request: {0}")]
    ClientFormat(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("run not found: {0}")]
    NotFound(String),

    #[error("run already exists: {0}")]
    AlreadyExists(String),

    #[error("store: {0}")]
    Store(String),

    #[error("otlp decode: {0}")]
    OtlpDecode(String),

    #[error("forwarder: {0}")]
    Forwarder(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error kind, stable across message wording changes.
impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::ClientFormat(_) => "client_format",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::Store(_) => "store",
            Error::OtlpDecode(_) => "otlp_decode",
            Error::Forwarder(_) => "forwarder",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::ClientFormat(_)
            | Error::Validation(_)
            | Error::Json(_)
            | Error::OtlpDecode(_)
            | Error::AlreadyExists(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Io(_) | Error::Store(_) | Error::Config(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Forwarder(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
