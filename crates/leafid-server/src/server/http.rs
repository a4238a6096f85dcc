//! HTTP front end.
//!
//! ```text
//! GET /api/v1/next/{key}?step=N  -> 200 {"id": 42}
//!                                   4xx/5xx {"msg": "..."}
//! GET /api/v1/health             -> 200
//! ```
//!
//! `step` is optional; absent or zero keeps the key's current step.

use crate::server::{service::dispense, store::SharedDispenser};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

/// Builds the HTTP router over `dispenser`.
pub fn router(dispenser: SharedDispenser) -> Router {
    Router::new()
        .route("/api/v1/next/{key}", get(next_for_key))
        .route("/api/v1/health", get(health))
        .with_state(dispenser)
}

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    #[serde(default)]
    pub step: u32,
}

/// Successful response body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdBody {
    pub id: u64,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub msg: String,
}

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    Allocation(leafid::Error),
    BadRequest(String),
}

impl From<leafid::Error> for ApiError {
    fn from(e: leafid::Error) -> Self {
        Self::Allocation(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) | Self::Allocation(leafid::Error::InvalidArgument { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::Allocation(leafid::Error::ServiceClosed) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Allocation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let msg = match self {
            Self::Allocation(e) => e.to_string(),
            Self::BadRequest(msg) => msg,
        };

        (status, Json(ErrorBody { msg })).into_response()
    }
}

async fn next_for_key(
    State(dispenser): State<SharedDispenser>,
    Path(key): Path<String>,
    query: Result<Query<NextQuery>, QueryRejection>,
) -> Result<Json<IdBody>, ApiError> {
    let Query(NextQuery { step }) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let id = dispense(&dispenser, "http", &key, step).await?;
    Ok(Json(IdBody { id }))
}

async fn health() -> StatusCode {
    StatusCode::OK
}
