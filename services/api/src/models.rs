//! API Models
//!
//! Request and response bodies for the REST surface, annotated for OpenAPI generation
//! with `utoipa`.

use levelcheck_core::turn::OutboundMessage;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The outbound turn log of one interview.
#[derive(Deserialize, Serialize, ToSchema, Debug, Clone)]
pub struct ChatRequest {
    /// Turns in `{ role, content, toolInvocations? }` form, oldest first.
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<OutboundMessage>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    #[schema(example = "Failed to process request")]
    pub error: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
}
