// ABOUTME: Main musicd server implementation
// ABOUTME: Single reactor task owning the listener, the connections and the executor

use crate::catalog::{CatalogStorage, FileStorage};
use crate::error::Error;
use crate::protocol::command::{error_reply, SessionId, ANONYMOUS_SESSION};
use crate::server::config::ServerConfig;
use crate::server::connection::{Connection, ConnectionEvent, ConnectionId};
use crate::server::error_log::ErrorLog;
use crate::server::executor::{Executor, Outcome, StreamDirective};
use crate::server::registry::{SessionRegistry, SharedRegistry};
use crate::server::streamer::{spawn_stream, StreamJob, StreamSettings};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// musicd server
pub struct MusicServer {
    /// Server configuration
    config: ServerConfig,
    /// Command executor, owner of the catalog
    executor: Executor,
    /// Active streams per session
    registry: SharedRegistry,
    /// Record of system failures
    errors: Arc<ErrorLog>,
}

impl MusicServer {
    /// Create a server backed by the flat files named in the configuration
    pub fn from_config(config: ServerConfig) -> crate::Result<Self> {
        let storage = FileStorage::new(
            &config.users_file,
            &config.songs_file,
            &config.songs_dir,
            &config.playlists_dir,
        )
        .with_asset_extension(config.asset_extension.clone());

        let errors = ErrorLog::new(&config.error_log);
        Ok(Self::new(config, Box::new(storage))?.with_error_log(errors))
    }

    /// Create a server over any catalog storage. Errors are only logged until
    /// [`with_error_log`](Self::with_error_log) is called.
    pub fn new(config: ServerConfig, storage: Box<dyn CatalogStorage>) -> crate::Result<Self> {
        let executor = Executor::load(storage).map_err(|e| Error::Catalog(e.to_string()))?;

        Ok(Self {
            config,
            executor,
            registry: Arc::new(SessionRegistry::new()),
            errors: Arc::new(ErrorLog::disabled()),
        })
    }

    /// Set the error log
    pub fn with_error_log(mut self, errors: ErrorLog) -> Self {
        self.errors = Arc::new(errors);
        self
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the session registry
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Bind the listening socket without serving yet
    pub async fn bind(self) -> crate::Result<BoundServer> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        log::info!("musicd server listening on {}", listener.local_addr()?);
        Ok(BoundServer {
            listener,
            server: self,
        })
    }

    /// Run the server until Ctrl-C
    pub async fn run(self) -> crate::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the server until `signal` resolves
    pub async fn run_until<F>(self, signal: F) -> crate::Result<()>
    where
        F: Future<Output = ()>,
    {
        self.bind().await?.run_until(signal).await
    }
}

/// A server whose listening socket is bound
pub struct BoundServer {
    listener: TcpListener,
    server: MusicServer,
}

impl BoundServer {
    /// Address the server actually listens on
    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `signal` resolves
    pub async fn run_until<F>(self, signal: F) -> crate::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut reactor = Reactor {
            settings: StreamSettings {
                chunk_size: self.server.config.chunk_size,
                chunk_interval: self.server.config.chunk_interval(),
            },
            config: self.server.config,
            executor: self.server.executor,
            registry: self.server.registry,
            errors: self.server.errors,
            connections: HashMap::new(),
            next_connection: 0,
            events: events_tx,
        };

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    log::info!("Received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => reactor.accept(stream, peer),
                    Err(e) => log::warn!("Failed to accept connection: {}", e),
                },
                Some(event) = events_rx.recv() => reactor.handle_event(event).await,
            }
        }

        reactor.shutdown();
        log::info!("Server shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Session id claimed by a line, `0` if there is none
fn claimed_session(line: &str) -> SessionId {
    line.split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .unwrap_or(ANONYMOUS_SESSION)
}

/// Reply sent for failures that are not the client's fault
fn system_error_reply(session: SessionId) -> String {
    format!(
        "ERROR: An unexpected error occurred with the server! Client ID: {}",
        session
    )
}

/// State owned by the reactor task
struct Reactor {
    config: ServerConfig,
    settings: StreamSettings,
    executor: Executor,
    registry: SharedRegistry,
    errors: Arc<ErrorLog>,
    connections: HashMap<ConnectionId, Connection>,
    next_connection: ConnectionId,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Reactor {
    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_connection;
        self.next_connection += 1;

        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let connection = Connection::spawn(
            id,
            stream,
            peer,
            self.config.read_buffer_size,
            self.events.clone(),
        );
        self.connections.insert(id, connection);
        log::info!("Connection {} accepted from {}", id, peer);
    }

    async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message { connection, line } => {
                self.handle_message(connection, line).await
            }
            ConnectionEvent::Closed { connection, error } => {
                if let Some(e) = error {
                    log::warn!("Connection {} read failed: {}", connection, e);
                }
                self.close(connection);
            }
        }
    }

    async fn handle_message(&mut self, connection: ConnectionId, line: String) {
        log::debug!("Connection {} <- {}", connection, line);

        let session = claimed_session(&line);
        let reply = match self.executor.execute(&line) {
            Ok(Outcome::Reply(text)) => text,
            Ok(Outcome::Stream(StreamDirective::Play { asset })) => {
                self.start_stream(connection, session, line, asset);
                return;
            }
            Ok(Outcome::Stream(StreamDirective::Stop)) => {
                if !self.registry.cancel(session) {
                    log::debug!("Session {} has no stream to stop", session);
                }
                "stop".to_string()
            }
            Err(e) if e.is_system() => {
                self.errors.record(&line, &e);
                system_error_reply(session)
            }
            Err(e) => error_reply(&e),
        };

        self.send(connection, &line, &reply).await;
    }

    fn start_stream(
        &mut self,
        connection: ConnectionId,
        session: SessionId,
        line: String,
        asset: PathBuf,
    ) {
        let Some(conn) = self.connections.get(&connection) else {
            log::warn!("Connection {} closed before its stream started", connection);
            return;
        };

        let job = StreamJob {
            request: line,
            asset,
            ticket: self.registry.start(session),
            writer: conn.writer(),
            gate: conn.stream_gate(),
        };
        spawn_stream(
            job,
            self.settings,
            Arc::clone(&self.registry),
            Arc::clone(&self.errors),
        );
    }

    async fn send(&mut self, connection: ConnectionId, line: &str, reply: &str) {
        let Some(conn) = self.connections.get(&connection) else {
            return;
        };

        if let Err(failure) = conn.send_line(reply).await {
            self.errors.record(line, &failure);
            self.close(connection);
        }
    }

    fn close(&mut self, connection: ConnectionId) {
        if let Some(conn) = self.connections.remove(&connection) {
            log::info!("Connection {} from {} closed", conn.id(), conn.peer());
            conn.close();
        }
    }

    fn shutdown(&mut self) {
        self.registry.cancel_all();
        for (_, conn) in self.connections.drain() {
            conn.close();
        }
    }
}
