// ABOUTME: One accepted TCP connection: reader task plus shared write half
// ABOUTME: Forwards decoded command lines to the reactor over a channel

use crate::protocol::command::{decode_latin1, encode_latin1};
use crate::server::streamer::SharedWriter;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Reactor-local connection identifier
pub type ConnectionId = u64;

/// A reply could not be written to a connection
#[derive(Error, Debug)]
#[error("Failed to write to connection {connection}: {source}")]
pub struct TransportFailure {
    /// Connection that failed
    pub connection: ConnectionId,
    /// Cause reported by the socket
    #[source]
    pub source: io::Error,
}

/// Events sent from reader tasks to the reactor
#[derive(Debug)]
pub enum ConnectionEvent {
    /// One non-empty command line
    Message {
        /// Connection the line arrived on
        connection: ConnectionId,
        /// Trimmed line
        line: String,
    },
    /// The peer closed the connection or the read failed
    Closed {
        /// Connection that ended
        connection: ConnectionId,
        /// Read error, `None` on a clean end of stream
        error: Option<io::Error>,
    },
}

/// Split one read into messages. Each non-empty trimmed line is a message.
pub(crate) fn split_messages(bytes: &[u8]) -> Vec<String> {
    decode_latin1(bytes)
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Connection entry of the reactor's connection table
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: SharedWriter<OwnedWriteHalf>,
    /// Held by the streaming worker currently using this connection
    stream_gate: Arc<Mutex<()>>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Split the stream and start its reader task
    pub fn spawn(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        buffer_size: usize,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(read_loop(id, read_half, buffer_size, events));

        Self {
            id,
            peer,
            writer: Arc::new(Mutex::new(write_half)),
            stream_gate: Arc::new(Mutex::new(())),
            reader,
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write half, shared with streaming workers
    pub fn writer(&self) -> SharedWriter<OwnedWriteHalf> {
        Arc::clone(&self.writer)
    }

    /// Gate serialising the streams sent on this connection
    pub fn stream_gate(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.stream_gate)
    }

    /// Write one reply line
    pub async fn send_line(&self, line: &str) -> Result<(), TransportFailure> {
        let mut bytes = encode_latin1(line);
        bytes.push(b'\n');

        let mut writer = self.writer.lock().await;
        let result = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|source| TransportFailure {
            connection: self.id,
            source,
        })
    }

    /// Stop reading. Workers still holding the write half finish on their own.
    pub fn close(self) {
        self.reader.abort();
    }
}

async fn read_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    buffer_size: usize,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let error = match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                for line in split_messages(&buf[..n]) {
                    let event = ConnectionEvent::Message {
                        connection: id,
                        line,
                    };
                    if events.send(event).is_err() {
                        // Reactor is gone
                        return;
                    }
                }
                continue;
            }
            Err(e) => Some(e),
        };

        let _ = events.send(ConnectionEvent::Closed {
            connection: id,
            error,
        });
        return;
    }
}
