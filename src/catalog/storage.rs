// ABOUTME: Persistence collaborator for the catalog
// ABOUTME: Flat-file implementation plus an in-memory one for tests and embedding

use super::{PlaylistKey, Song, User};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Trait for catalog persistence.
///
/// Every write returns only after the data has been handed to the backing
/// store, so the reactor can acknowledge a command right after the call.
pub trait CatalogStorage: Send {
    /// Load every registered user
    fn load_users(&mut self) -> io::Result<Vec<User>>;

    /// Load every song, in catalog order
    fn load_songs(&mut self) -> io::Result<Vec<Song>>;

    /// Load the keys of every existing playlist
    fn load_playlists(&mut self) -> io::Result<Vec<PlaylistKey>>;

    /// Persist a newly registered user
    fn append_user(&mut self, user: &User) -> io::Result<()>;

    /// Persist the play counts of every song
    fn persist_song_counts(&mut self, songs: &[Song]) -> io::Result<()>;

    /// Create an empty playlist
    fn create_playlist_file(&mut self, key: &PlaylistKey) -> io::Result<()>;

    /// Append a song to an existing playlist
    fn append_song_to_playlist(&mut self, key: &PlaylistKey, song: &Song) -> io::Result<()>;

    /// Read back the songs stored in a playlist, in insertion order
    fn read_playlist_file(&self, key: &PlaylistKey) -> io::Result<Vec<Song>>;

    /// Location of the audio asset for a song
    fn asset_path(&self, song: &Song) -> PathBuf;
}

/// Flat-file storage.
///
/// Users and songs live in one text file each, playlists in one file per
/// playlist, audio assets in a directory named after the song storage names.
#[derive(Debug, Clone)]
pub struct FileStorage {
    users_file: PathBuf,
    songs_file: PathBuf,
    songs_dir: PathBuf,
    playlists_dir: PathBuf,
    asset_extension: String,
}

impl FileStorage {
    /// Create a file storage over the given locations
    pub fn new(
        users_file: impl Into<PathBuf>,
        songs_file: impl Into<PathBuf>,
        songs_dir: impl Into<PathBuf>,
        playlists_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            users_file: users_file.into(),
            songs_file: songs_file.into(),
            songs_dir: songs_dir.into(),
            playlists_dir: playlists_dir.into(),
            asset_extension: "wav".to_string(),
        }
    }

    /// Set the extension of audio assets (default: `wav`)
    pub fn with_asset_extension(mut self, extension: impl Into<String>) -> Self {
        self.asset_extension = extension.into();
        self
    }

    fn playlist_path(&self, key: &PlaylistKey) -> PathBuf {
        self.playlists_dir.join(key.file_name())
    }
}

/// Read non-blank lines, or nothing if the file does not exist yet
fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("{} does not exist, starting empty", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

fn parse_records<T>(path: &Path, parse: impl Fn(&str) -> Option<T>) -> io::Result<Vec<T>> {
    let mut records = Vec::new();
    for line in read_lines(path)? {
        match parse(&line) {
            Some(record) => records.push(record),
            None => log::warn!("Skipping malformed line in {}: {}", path.display(), line),
        }
    }
    Ok(records)
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    file.flush()
}

impl CatalogStorage for FileStorage {
    fn load_users(&mut self) -> io::Result<Vec<User>> {
        parse_records(&self.users_file, User::from_record)
    }

    fn load_songs(&mut self) -> io::Result<Vec<Song>> {
        parse_records(&self.songs_file, Song::from_record)
    }

    fn load_playlists(&mut self) -> io::Result<Vec<PlaylistKey>> {
        fs::create_dir_all(&self.playlists_dir)?;

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.playlists_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(PlaylistKey::from_file_name) {
                Some(key) => keys.push(key),
                None => log::warn!("Ignoring unexpected playlist file {:?}", name),
            }
        }
        Ok(keys)
    }

    fn append_user(&mut self, user: &User) -> io::Result<()> {
        append_line(&self.users_file, &user.record())
    }

    fn persist_song_counts(&mut self, songs: &[Song]) -> io::Result<()> {
        let mut contents = String::new();
        for song in songs {
            contents.push_str(&song.record());
            contents.push('\n');
        }

        // Write beside the target and rename so readers never see half a file
        let tmp = self.songs_file.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.songs_file)
    }

    fn create_playlist_file(&mut self, key: &PlaylistKey) -> io::Result<()> {
        fs::create_dir_all(&self.playlists_dir)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.playlist_path(key))?;
        Ok(())
    }

    fn append_song_to_playlist(&mut self, key: &PlaylistKey, song: &Song) -> io::Result<()> {
        append_line(&self.playlist_path(key), &song.record())
    }

    fn read_playlist_file(&self, key: &PlaylistKey) -> io::Result<Vec<Song>> {
        let path = self.playlist_path(key);
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("playlist file {} is missing", path.display()),
            ));
        }
        parse_records(&path, Song::from_record)
    }

    fn asset_path(&self, song: &Song) -> PathBuf {
        self.songs_dir
            .join(format!("{}.{}", song.filename, self.asset_extension))
    }
}

/// In-memory storage.
///
/// Keeps the same records the flat files would hold, which makes it handy
/// for tests and for embedding the server without a data directory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    users: Vec<User>,
    songs: Vec<Song>,
    playlists: HashMap<PlaylistKey, Vec<String>>,
    songs_dir: PathBuf,
}

impl MemoryStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed users
    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.users = users;
        self
    }

    /// Seed songs
    pub fn with_songs(mut self, songs: Vec<Song>) -> Self {
        self.songs = songs;
        self
    }

    /// Seed a playlist with raw record lines
    pub fn with_playlist(mut self, key: PlaylistKey, records: Vec<String>) -> Self {
        self.playlists.insert(key, records);
        self
    }

    /// Directory asset paths are resolved against
    pub fn with_songs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.songs_dir = dir.into();
        self
    }

    /// Users persisted so far
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Songs as last persisted
    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    /// Raw record lines of a playlist
    pub fn playlist_records(&self, key: &PlaylistKey) -> Option<&[String]> {
        self.playlists.get(key).map(Vec::as_slice)
    }
}

impl CatalogStorage for MemoryStorage {
    fn load_users(&mut self) -> io::Result<Vec<User>> {
        Ok(self.users.clone())
    }

    fn load_songs(&mut self) -> io::Result<Vec<Song>> {
        Ok(self.songs.clone())
    }

    fn load_playlists(&mut self) -> io::Result<Vec<PlaylistKey>> {
        Ok(self.playlists.keys().cloned().collect())
    }

    fn append_user(&mut self, user: &User) -> io::Result<()> {
        self.users.push(user.clone());
        Ok(())
    }

    fn persist_song_counts(&mut self, songs: &[Song]) -> io::Result<()> {
        self.songs = songs.to_vec();
        Ok(())
    }

    fn create_playlist_file(&mut self, key: &PlaylistKey) -> io::Result<()> {
        if self.playlists.contains_key(key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                key.file_name(),
            ));
        }
        self.playlists.insert(key.clone(), Vec::new());
        Ok(())
    }

    fn append_song_to_playlist(&mut self, key: &PlaylistKey, song: &Song) -> io::Result<()> {
        self.playlists
            .get_mut(key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, key.file_name()))?
            .push(song.record());
        Ok(())
    }

    fn read_playlist_file(&self, key: &PlaylistKey) -> io::Result<Vec<Song>> {
        let records = self
            .playlists
            .get(key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, key.file_name()))?;
        Ok(records
            .iter()
            .filter_map(|r| Song::from_record(r))
            .collect())
    }

    fn asset_path(&self, song: &Song) -> PathBuf {
        self.songs_dir.join(format!("{}.wav", song.filename))
    }
}
