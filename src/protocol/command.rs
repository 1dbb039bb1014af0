// ABOUTME: Command line parser and reply formatting for the text channel
// ABOUTME: Splits "<session> <command> [args...]" with support for quoted arguments

use crate::error::CommandError;
use std::iter::Peekable;
use std::str::Chars;

/// Identifier of a client session. `0` means "not authenticated yet".
pub type SessionId = u32;

/// Session id carried by clients that have not registered or logged in
pub const ANONYMOUS_SESSION: SessionId = 0;

/// Prefix of every error reply
pub const ERROR_PREFIX: &str = "ERROR:";

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Session the client claims
    pub session: SessionId,
    /// Command name as sent (not validated)
    pub name: String,
    /// Arguments in order, quotes removed
    pub args: Vec<String>,
}

impl Request {
    /// Parse one command line.
    ///
    /// Arguments are split on whitespace unless they are wrapped in double
    /// quotes, in which case the quoted text (spaces included) forms one
    /// argument. Blank arguments are dropped.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut tokens = tokenize(line.trim())?.into_iter();

        let (session, name) = match (tokens.next(), tokens.next()) {
            (Some(session), Some(name)) => (session, name),
            _ => {
                return Err(CommandError::MalformedCommand(
                    "expected \"<session id> <command> [arguments]\"".to_string(),
                ))
            }
        };

        let session = session.parse::<SessionId>().map_err(|_| {
            CommandError::MalformedCommand(format!("session id '{}' is not a number", session))
        })?;

        Ok(Self {
            session,
            name,
            args: tokens.collect(),
        })
    }

    /// Whether the request carries no session
    pub fn is_anonymous(&self) -> bool {
        self.session == ANONYMOUS_SESSION
    }

    /// All arguments joined by single spaces
    pub fn joined_args(&self) -> String {
        self.args.join(" ")
    }
}

fn tokenize(line: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if !current.is_empty() {
                    return Err(CommandError::MalformedCommand(
                        "quote inside an unquoted argument".to_string(),
                    ));
                }
                read_quoted(&mut chars, &mut current)?;
                push_token(&mut tokens, &mut current);
            }
            c if c.is_whitespace() => push_token(&mut tokens, &mut current),
            c => current.push(c),
        }
    }
    push_token(&mut tokens, &mut current);

    Ok(tokens)
}

/// Consume a quoted group up to its closing quote. The closing quote must end
/// the argument.
fn read_quoted(chars: &mut Peekable<Chars<'_>>, out: &mut String) -> Result<(), CommandError> {
    loop {
        match chars.next() {
            Some('"') => break,
            Some(c) => out.push(c),
            None => {
                return Err(CommandError::MalformedCommand(
                    "unbalanced quotes".to_string(),
                ))
            }
        }
    }

    match chars.peek() {
        None => Ok(()),
        Some(c) if c.is_whitespace() => Ok(()),
        Some(_) => Err(CommandError::MalformedCommand(
            "closing quote must end the argument".to_string(),
        )),
    }
}

fn push_token(tokens: &mut Vec<String>, current: &mut String) {
    let token = std::mem::take(current);
    if !token.trim().is_empty() {
        tokens.push(token);
    }
}

/// Decode bytes as ISO-8859-1. Every byte maps to exactly one char, so this
/// never fails.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode text as ISO-8859-1, replacing chars outside the charset with `?`
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Format items the way list replies are sent: `[a, b, c]`
pub fn format_list<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut out = String::from("[");
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(item.as_ref());
    }
    out.push(']');
    out
}

/// Reply line for a user-facing error
pub fn error_reply(error: &CommandError) -> String {
    format!("{} {}", ERROR_PREFIX, error)
}

/// Whether a reply line reports an error
pub fn is_error_reply(line: &str) -> bool {
    line.starts_with(ERROR_PREFIX)
}
