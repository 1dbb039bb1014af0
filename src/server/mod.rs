// ABOUTME: Server module for musicd
// ABOUTME: Provides the reactor, command executor, session registry and streaming workers

mod asset;
mod cli;
mod config;
mod connection;
mod error_log;
mod executor;
mod registry;
mod server;
mod streamer;

pub use asset::{AudioAsset, PlaybackError};
pub use cli::ServerArgs;
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionEvent, ConnectionId, TransportFailure};
pub use error_log::ErrorLog;
pub use executor::{Command, Executor, Outcome, StreamDirective};
pub use registry::{SessionRegistry, SharedRegistry, StreamTicket};
pub use server::{BoundServer, MusicServer};
pub use streamer::{spawn_stream, SharedWriter, StreamJob, StreamSettings, PLAYBACK_FAILED};
