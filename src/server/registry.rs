// ABOUTME: Session registry for active audio streams
// ABOUTME: Thread-safe map of session id to the cancellation token of its stream

use crate::protocol::command::SessionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handle given to a streaming worker when its stream starts
#[derive(Debug, Clone)]
pub struct StreamTicket {
    session: SessionId,
    stream_id: u64,
    token: CancellationToken,
}

impl StreamTicket {
    /// Session the stream belongs to
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Token the worker polls between chunks
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether a stop was requested for this stream
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
struct ActiveStream {
    stream_id: u64,
    token: CancellationToken,
}

/// Tracks the active stream of every session.
///
/// Written by the reactor on play/stop, read by workers before every chunk.
/// Each session has at most one entry; starting a new stream cancels the
/// previous one of the same session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    streams: RwLock<HashMap<SessionId, ActiveStream>>,
    next_stream_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream for a session
    pub fn start(&self, session: SessionId) -> StreamTicket {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.streams.write().insert(
            session,
            ActiveStream {
                stream_id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            log::debug!("Session {} replaced stream {}", session, previous.stream_id);
            previous.token.cancel();
        }

        StreamTicket {
            session,
            stream_id,
            token,
        }
    }

    /// Request the stream of a session to stop. Returns false if the session
    /// has no active stream.
    pub fn cancel(&self, session: SessionId) -> bool {
        match self.streams.read().get(&session) {
            Some(stream) => {
                stream.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the session's stream should stop. A session without a stream
    /// counts as cancelled.
    pub fn is_cancelled(&self, session: SessionId) -> bool {
        self.streams
            .read()
            .get(&session)
            .map_or(true, |s| s.token.is_cancelled())
    }

    /// Drop the entry of a finished stream, unless a newer stream already
    /// took its place
    pub fn finish(&self, ticket: &StreamTicket) {
        let mut streams = self.streams.write();
        if streams
            .get(&ticket.session)
            .is_some_and(|s| s.stream_id == ticket.stream_id)
        {
            streams.remove(&ticket.session);
        }
    }

    /// Cancel every stream (server shutdown)
    pub fn cancel_all(&self) {
        for stream in self.streams.read().values() {
            stream.token.cancel();
        }
    }

    /// Number of sessions with a registered stream
    pub fn active_count(&self) -> usize {
        self.streams.read().len()
    }
}

/// Shared registry handle
pub type SharedRegistry = Arc<SessionRegistry>;
