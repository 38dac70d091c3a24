//! Drives one `PendingRequest` against a backend and forwards what it produces as
//! generation-tagged signals. The session applies them on its own task, so a request
//! that was cancelled or superseded can never touch the log.

use crate::{
    llm_client::{BackendError, InterviewBackend},
    protocol::StreamEvent,
    session::{InterviewSession, PendingRequest},
    turn::OutboundMessage,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

#[derive(Debug)]
pub enum SessionSignal {
    Event {
        generation: u64,
        event: StreamEvent,
    },
    /// The stream ended, cleanly or not.
    Closed {
        generation: u64,
        result: Result<(), BackendError>,
    },
}

impl SessionSignal {
    /// Applies the signal to `session`. Returns whether the session changed.
    pub fn apply_to(self, session: &mut InterviewSession) -> bool {
        match self {
            SessionSignal::Event { generation, event } => session.apply_event(generation, event),
            SessionSignal::Closed {
                generation,
                result: Ok(()),
            } => session.finish(generation),
            SessionSignal::Closed {
                generation,
                result: Err(e),
            } => session.fail(generation, &e.to_string()),
        }
    }
}

async fn forward(
    backend: &dyn InterviewBackend,
    generation: u64,
    request_messages: Vec<OutboundMessage>,
    tx: &mpsc::Sender<SessionSignal>,
) -> Result<(), BackendError> {
    let mut stream = backend.stream_chat(request_messages).await?;
    while let Some(item) = stream.next().await {
        let event = item?;
        if tx
            .send(SessionSignal::Event { generation, event })
            .await
            .is_err()
        {
            debug!("Session dropped, abandoning stream");
            break;
        }
    }
    Ok(())
}

/// Streams `request` to completion unless its cancellation token fires first.
///
/// A cancelled request sends nothing further, not even `Closed`.
#[instrument(skip_all, fields(generation = request.generation))]
pub async fn pump_request(
    backend: Arc<dyn InterviewBackend>,
    request: PendingRequest,
    tx: mpsc::Sender<SessionSignal>,
) {
    let PendingRequest {
        generation,
        messages,
        cancel,
    } = request;

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Request cancelled");
            return;
        }
        result = forward(backend.as_ref(), generation, messages, &tx) => result,
    };
    if cancel.is_cancelled() {
        return;
    }
    let _ = tx.send(SessionSignal::Closed { generation, result }).await;
}
