// ABOUTME: Shared CLI argument parsing for the server binary
// ABOUTME: Builds a ServerConfig and installs tracing from command line flags

use crate::server::ServerConfig;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server arguments
///
/// Use with `#[command(flatten)]` in the binary's Args struct.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind the server to
    #[arg(short, long, default_value = "127.0.0.1:15157")]
    pub bind: SocketAddr,

    /// Directory holding the users file, songs file, songs/ and playlists/
    #[arg(short, long, default_value = ".")]
    pub data_dir: PathBuf,

    /// Extension of the audio assets in the songs directory
    #[arg(long, default_value = "wav")]
    pub asset_extension: String,

    /// Largest audio chunk sent at once, in bytes
    #[arg(long, default_value = "100000")]
    pub chunk_size: usize,

    /// Pause between audio chunks in milliseconds
    #[arg(long, default_value = "500")]
    pub chunk_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let filter = if self.verbose {
            "musicd=debug"
        } else {
            "musicd=info"
        };

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("musicd server v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("Bind: {}", self.bind);
        tracing::info!("Data directory: {}", self.data_dir.display());
        tracing::info!(
            "Streaming: {} byte chunks every {} ms",
            self.chunk_size,
            self.chunk_ms
        );
    }

    /// Build ServerConfig from these args
    pub fn build_config(&self) -> ServerConfig {
        ServerConfig::with_data_dir(&self.data_dir)
            .bind_addr(self.bind)
            .asset_extension(self.asset_extension.clone())
            .chunk_size(self.chunk_size)
            .chunk_interval_ms(self.chunk_ms)
    }
}
