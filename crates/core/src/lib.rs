pub mod correlator;
pub mod extract;
pub mod ingest;
pub mod llm_client;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod store;
pub mod submission;
pub mod tools;
pub mod turn;

pub use session::{InterviewSession, PendingRequest, SessionError, SessionView};
