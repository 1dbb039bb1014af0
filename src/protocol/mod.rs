// ABOUTME: Protocol module for the musicd wire format
// ABOUTME: Command lines on the text channel, typed frames on the stream channel

/// Command line parsing and reply formatting
pub mod command;
/// Stream header and binary frame encoding
pub mod frame;

pub use command::{Request, SessionId};
pub use frame::{FrameKind, StreamHeader};
