//! Axum Handlers for the REST API
//!
//! `POST /api/chat` is the stateless chat endpoint: it takes the outbound turn log and
//! answers with the backend's response encoded in the data-stream protocol. It uses
//! `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use futures_util::StreamExt;
use levelcheck_core::protocol::{StreamEvent, encode_event};
use std::{convert::Infallible, sync::Arc};
use tracing::{error, info};

use crate::{
    models::{ChatRequest, ErrorResponse, HealthResponse},
    state::AppState,
};

/// Response header announcing the data-stream protocol version.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";

pub enum ApiError {
    BadRequest(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Error in chat API: {:?}", err);
                let error = "Failed to process request".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { error }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Stream the next interview turn for the given log.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Data-stream encoded response", content_type = "text/plain"),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Backend unavailable", body = ErrorResponse)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if payload.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }
    info!(turns = payload.messages.len(), "Streaming chat response");

    let events = state.backend.stream_chat(payload.messages).await?;
    let frames = events.map(|item| {
        let frame = match item {
            Ok(event) => encode_event(&event),
            Err(e) => {
                error!(error = %e, "Backend stream failed mid-response");
                encode_event(&StreamEvent::Error(e.to_string()))
            }
        };
        Ok::<_, Infallible>(frame)
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(DATA_STREAM_HEADER, "v1")
        .body(Body::from_stream(frames))?)
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
