// ABOUTME: Main library entry point for musicd
// ABOUTME: Exports the protocol, catalog, server and client helpers

//! # musicd
//!
//! A music catalog server speaking a line-oriented command protocol, with a
//! second per-session connection dedicated to cancellable audio streaming.
//!
//! ## Features
//!
//! - **Server**: a single reactor task multiplexing every client connection
//! - **Protocol**: command line parsing and the binary stream framing
//! - **Catalog**: users, songs and playlists backed by flat files
//! - **Client**: helpers for the two-connection client side
//!
//! ## Example: Running a Server
//!
//! ```no_run
//! use musicd::server::{MusicServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::with_data_dir("./data")
//!         .bind_addr("127.0.0.1:15157".parse().unwrap());
//!
//!     let server = MusicServer::from_config(config).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

/// Users, songs and playlists
pub mod catalog;
/// Client side of the two-connection protocol
pub mod client;
/// Command line parsing and stream framing
pub mod protocol;
/// Reactor, executor and streaming workers
pub mod server;

pub use catalog::{Catalog, CatalogStorage, FileStorage, MemoryStorage};
pub use protocol::command::{Request, SessionId};
pub use server::{MusicServer, ServerConfig};

/// Result type for musicd operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for musicd
pub mod error {
    use thiserror::Error;

    /// Error types for server setup and operation
    #[derive(Error, Debug)]
    pub enum Error {
        /// Underlying I/O failure
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        /// The listening socket could not be bound
        #[error("Failed to bind {addr}: {source}")]
        Bind {
            /// Address that was requested
            addr: std::net::SocketAddr,
            /// Cause reported by the OS
            source: std::io::Error,
        },

        /// The catalog could not be loaded from storage
        #[error("Catalog error: {0}")]
        Catalog(String),
    }

    /// Errors raised while parsing or executing a client command.
    ///
    /// The `Display` text of every variant is what the client sees after the
    /// `ERROR: ` prefix.
    #[derive(Error, Debug)]
    pub enum CommandError {
        /// The line could not be split into session, command and arguments
        #[error("Malformed command: {0}")]
        MalformedCommand(String),

        /// A command other than register/login was sent without a session
        #[error("First you need to login or register!")]
        NotAuthenticated,

        /// The command name is not part of the protocol
        #[error("Given command does not exist")]
        UnknownCommand,

        /// Register with an email that is already taken
        #[error("An account with this email already exists!")]
        AccountExists,

        /// Register with an email that does not match the accepted shape
        #[error("Make sure your email is in the following format: username@domain.com/bg")]
        InvalidEmail,

        /// Register with a password that breaks the password rules
        #[error(
            "Make sure your password is at least 8 characters, using letters, numbers and special character [, $ ! @ # ?]"
        )]
        InvalidPassword,

        /// Login with an unknown email
        #[error("User with this email does not exist!")]
        NoSuchUser,

        /// Login with a password that does not match
        #[error("Wrong password!")]
        WrongPassword,

        /// The requested song is not in the catalog
        #[error("There is no song with the specified name")]
        NoSuchSong,

        /// The requested playlist does not exist for this session
        #[error("Playlist with this name does not exist!")]
        NoSuchPlaylist,

        /// The playlist already exists for this session
        #[error("Playlist with the same name already exists")]
        PlaylistExists,

        /// More arguments than the command accepts
        #[error("Command {command} should not be followed by more than {max} argument(s)!")]
        TooManyArguments {
            /// Command name
            command: &'static str,
            /// Largest accepted argument count
            max: usize,
        },

        /// Fewer arguments than the command needs
        #[error("Not enough arguments! Please provide {expected}")]
        TooFewArguments {
            /// Command name
            command: &'static str,
            /// What the command expects, phrased for the user
            expected: &'static str,
        },

        /// An argument has the wrong shape (e.g. a non-numeric count)
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        /// The catalog storage failed while serving the command
        #[error("Storage failure: {0}")]
        Storage(#[from] std::io::Error),
    }

    impl CommandError {
        /// Whether this error is a system failure rather than a user mistake.
        ///
        /// System failures are recorded in the error log and reported to the
        /// client with a generic message.
        pub fn is_system(&self) -> bool {
            matches!(self, CommandError::Storage(_))
        }
    }
}
