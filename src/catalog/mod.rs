// ABOUTME: In-memory catalog of users, songs and playlists
// ABOUTME: Owned by the reactor task; persistence goes through CatalogStorage

mod storage;

pub use storage::{CatalogStorage, FileStorage, MemoryStorage};

use crate::protocol::command::{SessionId, ANONYMOUS_SESSION};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A registered account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique id, also used as the session id
    pub id: SessionId,
    /// Unique email address
    pub email: String,
    /// Password as registered
    pub password: String,
}

impl User {
    /// Parse a `<id> <email> <password>` record
    pub fn from_record(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let id = tokens.next()?.parse().ok()?;
        let email = tokens.next()?.to_string();
        let password = tokens.next()?.to_string();
        if tokens.next().is_some() {
            return None;
        }
        Some(Self {
            id,
            email,
            password,
        })
    }

    /// Record line for the users file
    pub fn record(&self) -> String {
        format!("{} {} {}", self.id, self.email, self.password)
    }
}

/// A song of the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    /// Display name
    pub name: String,
    /// Display author
    pub author: String,
    /// Number of times the song was played
    pub plays: u32,
    /// Storage name, `<Name_With_Underscores> <Author_With_Underscores>`
    pub filename: String,
}

impl Song {
    /// Parse a `<Name_With_Underscores> <Author_With_Underscores> <plays>` record
    pub fn from_record(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next()?;
        let author = tokens.next()?;
        let plays = tokens.next()?.parse().ok()?;
        if tokens.next().is_some() {
            return None;
        }
        Some(Self {
            name: name.replace('_', " "),
            author: author.replace('_', " "),
            plays,
            filename: format!("{} {}", name, author),
        })
    }

    /// Record line: storage name followed by the play count
    pub fn record(&self) -> String {
        format!("{} {}", self.filename, self.plays)
    }

    /// Lookup key (lower-cased display name)
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Whether every query word appears among the name and author words
    fn matches(&self, query: &HashSet<String>) -> bool {
        let words: HashSet<String> = format!("{} {}", self.name, self.author)
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        query.is_subset(&words)
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Song: \"{}\" by \"{}\"", self.name, self.author)
    }
}

/// Identifies a playlist: owner session plus playlist name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaylistKey {
    /// Session that created the playlist
    pub owner: SessionId,
    /// Playlist name, may contain spaces
    pub name: String,
}

impl PlaylistKey {
    /// Create a key
    pub fn new(owner: SessionId, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }

    /// File name of the playlist, `<owner> <name>.txt`
    pub fn file_name(&self) -> String {
        format!("{} {}.txt", self.owner, self.name)
    }

    /// Recover a key from a playlist file name
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".txt")?;
        let (owner, name) = stem.split_once(' ')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(owner.parse().ok()?, name))
    }
}

/// In-memory view of the catalog.
///
/// All mutation happens on the reactor task, so nothing here is synchronised.
#[derive(Debug, Default)]
pub struct Catalog {
    users: HashMap<SessionId, User>,
    emails: HashMap<String, SessionId>,
    /// Songs in load order
    songs: Vec<Song>,
    /// Lower-cased name -> index into `songs`
    song_index: HashMap<String, usize>,
    playlists: HashSet<PlaylistKey>,
    next_id: SessionId,
}

impl Catalog {
    /// Build a catalog from loaded records
    pub fn new(users: Vec<User>, songs: Vec<Song>, playlists: Vec<PlaylistKey>) -> Self {
        let mut catalog = Self {
            next_id: ANONYMOUS_SESSION + 1,
            ..Default::default()
        };

        for user in users {
            if user.id == ANONYMOUS_SESSION
                || catalog.users.contains_key(&user.id)
                || catalog.emails.contains_key(&user.email)
            {
                log::warn!("Skipping user record {} ({})", user.id, user.email);
                continue;
            }
            catalog.insert_user(user);
        }

        for song in songs {
            let key = song.key();
            if catalog.song_index.contains_key(&key) {
                log::warn!("Skipping duplicate song '{}'", song.name);
                continue;
            }
            catalog.song_index.insert(key, catalog.songs.len());
            catalog.songs.push(song);
        }

        catalog.playlists.extend(playlists);
        catalog
    }

    /// Load every record through the storage collaborator
    pub fn load(storage: &mut dyn CatalogStorage) -> std::io::Result<Self> {
        let users = storage.load_users()?;
        let songs = storage.load_songs()?;
        let playlists = storage.load_playlists()?;

        let catalog = Self::new(users, songs, playlists);
        log::info!(
            "Catalog loaded: {} users, {} songs, {} playlists",
            catalog.users.len(),
            catalog.songs.len(),
            catalog.playlists.len()
        );
        Ok(catalog)
    }

    /// Look up a user by id
    pub fn user(&self, id: SessionId) -> Option<&User> {
        self.users.get(&id)
    }

    /// Look up a user by email
    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.emails.get(email).and_then(|id| self.users.get(id))
    }

    /// Id the next registered user will receive
    pub fn next_user_id(&self) -> SessionId {
        self.next_id
    }

    /// Add a user and move the id counter past it
    pub fn insert_user(&mut self, user: User) {
        self.next_id = self.next_id.max(user.id + 1);
        self.emails.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user);
    }

    /// Number of registered users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Songs in load order
    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    /// Case-insensitive lookup by song name
    pub fn song(&self, name: &str) -> Option<&Song> {
        self.song_index
            .get(&name.to_lowercase())
            .map(|&i| &self.songs[i])
    }

    /// Increment the play count of a song and return it
    pub fn record_play(&mut self, name: &str) -> Option<&Song> {
        let index = *self.song_index.get(&name.to_lowercase())?;
        let song = &mut self.songs[index];
        song.plays += 1;
        Some(song)
    }

    /// Songs whose name and author words contain every query word
    pub fn search<S: AsRef<str>>(&self, words: &[S]) -> Vec<&Song> {
        let query: HashSet<String> = words
            .iter()
            .flat_map(|w| w.as_ref().split_whitespace())
            .map(str::to_lowercase)
            .collect();

        self.songs.iter().filter(|s| s.matches(&query)).collect()
    }

    /// The `n` most played songs, ties kept in load order
    pub fn top(&self, n: usize) -> Vec<&Song> {
        let mut ranked: Vec<&Song> = self.songs.iter().collect();
        ranked.sort_by(|a, b| b.plays.cmp(&a.plays));
        ranked.truncate(n);
        ranked
    }

    /// Whether a playlist is registered
    pub fn has_playlist(&self, key: &PlaylistKey) -> bool {
        self.playlists.contains(key)
    }

    /// Register a playlist; returns false if it already existed
    pub fn insert_playlist(&mut self, key: PlaylistKey) -> bool {
        self.playlists.insert(key)
    }
}
