//! `{code, message, data}` response envelope and error mapping.
//!
//! `code` is 0 on success and the HTTP status number otherwise. The worker
//! speaks the same envelope, so the type is shared with the agent client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// 200 response wrapping `data`.
pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Envelope::ok(data))).into_response()
}

/// Non-success response with an optional payload.
pub fn failure<T: Serialize>(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Response {
    let body = Envelope {
        code: i64::from(status.as_u16()),
        message: message.into(),
        data,
    };
    (status, Json(body)).into_response()
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Invalid => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handler error: a domain error or a request that failed to parse.
#[derive(Debug)]
pub enum ApiError {
    Domain(Error),
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Domain(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                warn!(%message, "Rejected malformed request");
                failure::<()>(StatusCode::BAD_REQUEST, message, None)
            }
            Self::Domain(e) => {
                let status = status_for(e.kind());
                if status.is_server_error() {
                    error!(error = %e, "Request failed");
                } else {
                    warn!(error = %e, "Request rejected");
                }
                failure::<()>(status, e.to_string(), None)
            }
        }
    }
}

pub type ApiResult = Result<Response, ApiError>;
