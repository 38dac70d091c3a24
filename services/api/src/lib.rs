//! LevelCheck API Library Crate
//!
//! This library contains the web surface of the interview orchestrator: configuration,
//! the shared application state, the streaming chat endpoint, the WebSocket session
//! loop, and routing. The binaries are thin wrappers around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
