// ABOUTME: Command executor: validates requests and applies them to the catalog
// ABOUTME: Produces a text reply or a streaming directive for the reactor

use crate::catalog::{Catalog, CatalogStorage, PlaylistKey, Song, User};
use crate::error::CommandError;
use crate::protocol::command::{format_list, Request, SessionId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9\-$!%*?&_.]+@[a-z0-9\-]+(\.[a-z0-9\-]+)*\.(com|bg)$")
        .expect("email pattern is valid")
});

const MIN_PASSWORD_LEN: usize = 8;
const PASSWORD_SPECIALS: &[char] = &[',', '$', '!', '@', '#', '?'];

/// Protocol commands, each built from a request by its own arity rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create an account
    Register {
        /// Account email
        email: String,
        /// Account password
        password: String,
    },
    /// Authenticate an existing account
    Login {
        /// Account email
        email: String,
        /// Account password
        password: String,
    },
    /// Find songs whose name and author contain every word
    Search {
        /// Query words
        words: Vec<String>,
    },
    /// Most played songs
    Top {
        /// Number of songs to return
        count: usize,
    },
    /// Create an empty playlist owned by the session
    CreatePlaylist {
        /// Playlist name
        name: String,
    },
    /// Append a song to one of the session's playlists
    AddSongTo {
        /// Playlist name
        playlist: String,
        /// Song name
        song: String,
    },
    /// List the songs of one of the session's playlists
    ShowPlaylist {
        /// Playlist name
        name: String,
    },
    /// Start streaming a song on the session's stream connection
    Play {
        /// Song name
        song: String,
    },
    /// Stop the session's stream
    Stop,
}

impl Command {
    /// Whether the command may be sent without a session
    pub fn allows_anonymous(name: &str) -> bool {
        matches!(name, "register" | "login")
    }

    /// Build a command from a request, checking its arguments
    pub fn from_request(request: &Request) -> Result<Self, CommandError> {
        let args = &request.args;
        let command = match request.name.as_str() {
            "register" => {
                let [email, password] = exact::<2>(args, "register", "email and password")?;
                Command::Register { email, password }
            }
            "login" => {
                let [email, password] = exact::<2>(args, "login", "email and password")?;
                Command::Login { email, password }
            }
            "search" => {
                at_least(args, 1, "search", "a search query")?;
                Command::Search {
                    words: args.clone(),
                }
            }
            "top" => {
                let [count] = exact::<1>(args, "top", "how many songs you want to see")?;
                let count = count.parse::<usize>().map_err(|_| {
                    CommandError::InvalidArgument(format!(
                        "'{}' is not a valid number of songs",
                        count
                    ))
                })?;
                Command::Top { count }
            }
            "create-playlist" => {
                at_least(args, 1, "create-playlist", "a playlist name")?;
                Command::CreatePlaylist {
                    name: playlist_name(request.joined_args())?,
                }
            }
            "add-song-to" => {
                at_least(args, 2, "add-song-to", "a playlist and a song")?;
                Command::AddSongTo {
                    playlist: playlist_name(args[0].clone())?,
                    song: args[1..].join(" "),
                }
            }
            "show-playlist" => {
                at_least(args, 1, "show-playlist", "a playlist name")?;
                Command::ShowPlaylist {
                    name: playlist_name(request.joined_args())?,
                }
            }
            "play" => {
                at_least(args, 1, "play", "a song name")?;
                Command::Play {
                    song: request.joined_args(),
                }
            }
            "stop" => {
                if !args.is_empty() {
                    return Err(CommandError::TooManyArguments {
                        command: "stop",
                        max: 0,
                    });
                }
                Command::Stop
            }
            _ => return Err(CommandError::UnknownCommand),
        };
        Ok(command)
    }

    /// Protocol name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Login { .. } => "login",
            Command::Search { .. } => "search",
            Command::Top { .. } => "top",
            Command::CreatePlaylist { .. } => "create-playlist",
            Command::AddSongTo { .. } => "add-song-to",
            Command::ShowPlaylist { .. } => "show-playlist",
            Command::Play { .. } => "play",
            Command::Stop => "stop",
        }
    }
}

fn exact<const N: usize>(
    args: &[String],
    command: &'static str,
    expected: &'static str,
) -> Result<[String; N], CommandError> {
    if args.len() < N {
        return Err(CommandError::TooFewArguments { command, expected });
    }
    <[String; N]>::try_from(args.to_vec())
        .map_err(|_| CommandError::TooManyArguments { command, max: N })
}

fn at_least(
    args: &[String],
    min: usize,
    command: &'static str,
    expected: &'static str,
) -> Result<(), CommandError> {
    if args.len() < min {
        return Err(CommandError::TooFewArguments { command, expected });
    }
    Ok(())
}

/// Playlist names become file names, so they may not leave the playlists
/// directory
fn playlist_name(name: String) -> Result<String, CommandError> {
    if name.contains(['/', '\\', '\0']) {
        return Err(CommandError::InvalidArgument(format!(
            "'{}' is not a valid playlist name",
            name
        )));
    }
    Ok(name)
}

/// Records are whitespace separated, so neither field may contain any
fn valid_email(email: &str) -> bool {
    !email.contains(char::is_whitespace) && EMAIL.is_match(email)
}

fn valid_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
        && !password.contains(char::is_whitespace)
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(&c))
}

/// What the reactor has to do with the audio stream of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDirective {
    /// Start streaming an asset on the connection that sent `play`
    Play {
        /// Audio file to stream
        asset: PathBuf,
    },
    /// Cancel the session's stream
    Stop,
}

/// Result of a successful command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Text written back verbatim, followed by a newline
    Reply(String),
    /// Never written; drives the reactor
    Stream(StreamDirective),
}

/// Applies commands to the catalog and persists every change through the
/// storage before acknowledging it.
pub struct Executor {
    catalog: Catalog,
    storage: Box<dyn CatalogStorage>,
}

impl Executor {
    /// Create an executor over an already loaded catalog
    pub fn new(catalog: Catalog, storage: Box<dyn CatalogStorage>) -> Self {
        Self { catalog, storage }
    }

    /// Load the catalog from storage
    pub fn load(mut storage: Box<dyn CatalogStorage>) -> std::io::Result<Self> {
        let catalog = Catalog::load(storage.as_mut())?;
        Ok(Self::new(catalog, storage))
    }

    /// Current catalog state
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Parse and execute one command line
    pub fn execute(&mut self, line: &str) -> Result<Outcome, CommandError> {
        let request = Request::parse(line)?;
        self.execute_request(&request)
    }

    /// Execute a parsed request
    pub fn execute_request(&mut self, request: &Request) -> Result<Outcome, CommandError> {
        if request.is_anonymous() && !Command::allows_anonymous(&request.name) {
            return Err(CommandError::NotAuthenticated);
        }

        let command = Command::from_request(request)?;

        if !Command::allows_anonymous(command.name())
            && self.catalog.user(request.session).is_none()
        {
            return Err(CommandError::NotAuthenticated);
        }

        log::debug!("Session {} executing {}", request.session, command.name());
        self.apply(request.session, command)
    }

    fn apply(&mut self, session: SessionId, command: Command) -> Result<Outcome, CommandError> {
        let reply = match command {
            Command::Register { email, password } => self.register(email, password)?,
            Command::Login { email, password } => self.login(&email, &password)?,
            Command::Search { words } => format_list(
                self.catalog
                    .search(&words)
                    .into_iter()
                    .map(Song::to_string),
            ),
            Command::Top { count } => {
                format_list(self.catalog.top(count).into_iter().map(Song::to_string))
            }
            Command::CreatePlaylist { name } => self.create_playlist(session, name)?,
            Command::AddSongTo { playlist, song } => self.add_song_to(session, playlist, &song)?,
            Command::ShowPlaylist { name } => self.show_playlist(session, name)?,
            Command::Play { song } => return self.play(&song),
            Command::Stop => return Ok(Outcome::Stream(StreamDirective::Stop)),
        };
        Ok(Outcome::Reply(reply))
    }

    fn register(&mut self, email: String, password: String) -> Result<String, CommandError> {
        if self.catalog.user_by_email(&email).is_some() {
            return Err(CommandError::AccountExists);
        }
        if !valid_email(&email) {
            return Err(CommandError::InvalidEmail);
        }
        if !valid_password(&password) {
            return Err(CommandError::InvalidPassword);
        }

        let user = User {
            id: self.catalog.next_user_id(),
            email,
            password,
        };
        self.storage.append_user(&user)?;

        let id = user.id;
        self.catalog.insert_user(user);
        log::info!("Registered user {}", id);
        Ok(id.to_string())
    }

    fn login(&self, email: &str, password: &str) -> Result<String, CommandError> {
        let user = self
            .catalog
            .user_by_email(email)
            .ok_or(CommandError::NoSuchUser)?;
        if user.password != password {
            return Err(CommandError::WrongPassword);
        }
        Ok(user.id.to_string())
    }

    fn create_playlist(&mut self, owner: SessionId, name: String) -> Result<String, CommandError> {
        let key = PlaylistKey::new(owner, name);
        if self.catalog.has_playlist(&key) {
            return Err(CommandError::PlaylistExists);
        }

        self.storage.create_playlist_file(&key)?;
        self.catalog.insert_playlist(key);
        Ok("Playlist created successfully!".to_string())
    }

    fn add_song_to(
        &mut self,
        owner: SessionId,
        playlist: String,
        song: &str,
    ) -> Result<String, CommandError> {
        let key = PlaylistKey::new(owner, playlist);
        if !self.catalog.has_playlist(&key) {
            return Err(CommandError::NoSuchPlaylist);
        }
        let song = self.catalog.song(song).ok_or(CommandError::NoSuchSong)?;

        self.storage.append_song_to_playlist(&key, song)?;
        Ok("Song successfully added to the playlist!".to_string())
    }

    fn show_playlist(&self, owner: SessionId, name: String) -> Result<String, CommandError> {
        let key = PlaylistKey::new(owner, name);
        if !self.catalog.has_playlist(&key) {
            return Err(CommandError::NoSuchPlaylist);
        }

        let mut entries: Vec<String> = Vec::new();
        for song in self.storage.read_playlist_file(&key)? {
            let entry = song.to_string();
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        Ok(format_list(entries))
    }

    fn play(&mut self, name: &str) -> Result<Outcome, CommandError> {
        let song = self
            .catalog
            .record_play(name)
            .ok_or(CommandError::NoSuchSong)?
            .clone();
        self.storage.persist_song_counts(self.catalog.songs())?;

        log::debug!("{} played {} times", song.name, song.plays);
        Ok(Outcome::Stream(StreamDirective::Play {
            asset: self.storage.asset_path(&song),
        }))
    }
}
