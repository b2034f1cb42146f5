//! The HTTP response envelope, verbatim in idiom from `webserver/types.rs`:
//! an `erased_serde`-backed `Response` enum so every handler can return its
//! own concrete type while still producing one JSON shape, plus an
//! `EndpointError`/`ErrorKind` pair for the error arm.

use std::borrow::Cow;

use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Json;

pub trait ApiResponse: erased_serde::Serialize {}
erased_serde::serialize_trait_object!(ApiResponse);

#[derive(serde::Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Response<'a> {
    Ok(Box<dyn erased_serde::Serialize + Send + Sync + 'static>),
    Error(EndpointError<'a>),
}

impl<T: ApiResponse + Send + Sync + 'static> From<T> for Response<'static> {
    fn from(value: T) -> Self {
        Self::Ok(Box::new(value))
    }
}

#[derive(serde::Serialize, PartialEq, Eq, Debug)]
pub struct EndpointError<'a> {
    kind: ErrorKind,
    message: Cow<'a, str>,
}

#[allow(unused)]
#[derive(serde::Serialize, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    User,
    Unknown,
    NotFound,
    Internal,
}

pub fn json<'a, T>(val: T) -> Json<Response<'a>>
where
    Response<'a>: From<T>,
{
    Json(Response::from(val))
}

/// A handler-level error, convertible to an HTTP response via `IntoResponse`
/// (not present verbatim in the teacher — `webserver/types.rs` defines the
/// envelope but not a shared error type — so this is generalized from its
/// `EndpointError` shape into something `?`-usable from axum handlers).
pub struct AppError {
    pub status: axum::http::StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            kind: ErrorKind::User,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::NOT_FOUND,
            kind: ErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            kind: ErrorKind::Internal,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> AxumResponse {
        let body = Json(Response::Error(EndpointError {
            kind: self.kind,
            message: Cow::Owned(self.message),
        }));
        (self.status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
