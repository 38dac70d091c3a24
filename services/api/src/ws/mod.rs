//! WebSocket Interview Sessions
//!
//! Each connection owns one `InterviewSession`. The submodules are:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle and the session event loop.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
