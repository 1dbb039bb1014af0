// ABOUTME: Server configuration
// ABOUTME: Defines the listening address, catalog file layout and streaming pace

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// File holding one `<id> <email> <password>` line per user
    pub users_file: PathBuf,
    /// File holding one `<name> <author> <plays>` line per song
    pub songs_file: PathBuf,
    /// Directory holding the audio assets
    pub songs_dir: PathBuf,
    /// Directory holding one file per playlist
    pub playlists_dir: PathBuf,
    /// Append-only log of system failures
    pub error_log: PathBuf,
    /// Extension of audio assets in `songs_dir`
    pub asset_extension: String,
    /// Size of the per-connection read buffer (largest command line)
    pub read_buffer_size: usize,
    /// Largest audio chunk sent in one frame, in bytes
    pub chunk_size: usize,
    /// Pause between two audio chunks in milliseconds
    pub chunk_interval_ms: u64,
}

impl ServerConfig {
    /// Create a configuration with every data file under `dir`
    pub fn with_data_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            users_file: dir.join("userData.txt"),
            songs_file: dir.join("availableSongs.txt"),
            songs_dir: dir.join("songs"),
            playlists_dir: dir.join("playlists"),
            error_log: dir.join("errors.txt"),
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the audio asset extension
    pub fn asset_extension(mut self, extension: impl Into<String>) -> Self {
        self.asset_extension = extension.into();
        self
    }

    /// Set the read buffer size
    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes;
        self
    }

    /// Set the audio chunk size in bytes
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set the pause between audio chunks in milliseconds
    pub fn chunk_interval_ms(mut self, ms: u64) -> Self {
        self.chunk_interval_ms = ms;
        self
    }

    /// Pause between audio chunks
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 15157)),
            users_file: PathBuf::from("userData.txt"),
            songs_file: PathBuf::from("availableSongs.txt"),
            songs_dir: PathBuf::from("songs"),
            playlists_dir: PathBuf::from("playlists"),
            error_log: PathBuf::from("errors.txt"),
            asset_extension: "wav".to_string(),
            read_buffer_size: 8 * 1024,
            chunk_size: 100_000,
            chunk_interval_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_layout() {
        let config = ServerConfig::with_data_dir("/srv/music");
        assert_eq!(config.users_file, PathBuf::from("/srv/music/userData.txt"));
        assert_eq!(config.songs_dir, PathBuf::from("/srv/music/songs"));
        assert_eq!(config.playlists_dir, PathBuf::from("/srv/music/playlists"));
        assert_eq!(config.bind_addr.port(), 15157);
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::default()
            .chunk_size(4096)
            .chunk_interval_ms(20)
            .asset_extension("flac");
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.chunk_interval(), Duration::from_millis(20));
        assert_eq!(config.asset_extension, "flac");
    }
}
