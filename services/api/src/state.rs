//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the shared backend client and
//! configuration. Interview sessions themselves are per-connection and never shared.

use crate::config::Config;
use levelcheck_core::llm_client::InterviewBackend;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn InterviewBackend>,
    pub config: Arc<Config>,
}
