// ABOUTME: Stream channel wire format: header line plus typed, length-prefixed frames
// ABOUTME: Shared by the streaming worker (encode) and the client (decode)

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Frame header size: kind byte + u32 big-endian payload length
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest payload a reader accepts
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors raised while decoding the stream channel
#[derive(Error, Debug)]
pub enum FrameError {
    /// The header line does not have the seven expected fields
    #[error("Invalid stream header: {0}")]
    InvalidHeader(String),

    /// Unknown frame kind byte
    #[error("Unknown frame kind 0x{0:02x}")]
    UnknownKind(u8),

    /// Declared payload length exceeds [`MAX_FRAME_LEN`]
    #[error("Frame of {0} bytes exceeds the limit")]
    TooLarge(usize),

    /// Transport failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind byte of a stream frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// End of stream, empty payload
    End = 0x00,
    /// Raw audio bytes, whole frames only
    Audio = 0x01,
    /// UTF-8 error message; the stream is over
    Error = 0x02,
}

impl FrameKind {
    /// Decode a kind byte
    pub fn from_byte(value: u8) -> Result<Self, FrameError> {
        match value {
            0x00 => Ok(FrameKind::End),
            0x01 => Ok(FrameKind::Audio),
            0x02 => Ok(FrameKind::Error),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// Build one frame: `[kind][len: u32 BE][payload]`
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    message.push(kind as u8);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(payload);
    message
}

/// Read one frame from the stream channel
pub async fn read_frame<R>(reader: &mut R) -> Result<(FrameKind, Vec<u8>), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut head).await?;

    let kind = FrameKind::from_byte(head[0])?;
    let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok((kind, payload))
}

/// Sample encoding announced in the stream header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Signed integer PCM
    PcmSigned,
    /// Unsigned integer PCM
    PcmUnsigned,
    /// IEEE float PCM
    PcmFloat,
}

impl Encoding {
    /// Convert to protocol string
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::PcmSigned => "PCM_SIGNED",
            Encoding::PcmUnsigned => "PCM_UNSIGNED",
            Encoding::PcmFloat => "PCM_FLOAT",
        }
    }
}

impl FromStr for Encoding {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, FrameError> {
        match s {
            "PCM_SIGNED" => Ok(Encoding::PcmSigned),
            "PCM_UNSIGNED" => Ok(Encoding::PcmUnsigned),
            "PCM_FLOAT" => Ok(Encoding::PcmFloat),
            other => Err(FrameError::InvalidHeader(format!("unknown encoding {}", other))),
        }
    }
}

/// Format of the audio that follows on the stream channel.
///
/// Sent once per stream as a single text line with seven space-separated
/// fields: encoding, sample rate, bits per sample, channels, frame size in
/// bytes, frame rate and the big-endian flag.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    /// Sample encoding
    pub encoding: Encoding,
    /// Samples per second per channel
    pub sample_rate: f32,
    /// Bits per sample
    pub bits_per_sample: u16,
    /// Number of interleaved channels
    pub channels: u16,
    /// Bytes per frame (one sample for every channel)
    pub frame_size: u16,
    /// Frames per second
    pub frame_rate: f32,
    /// Byte order of multi-byte samples
    pub big_endian: bool,
}

impl StreamHeader {
    /// Header for interleaved PCM with the frame size derived from the layout
    pub fn pcm(
        encoding: Encoding,
        sample_rate: u32,
        bits_per_sample: u16,
        channels: u16,
        big_endian: bool,
    ) -> Self {
        Self {
            encoding,
            sample_rate: sample_rate as f32,
            bits_per_sample,
            channels,
            frame_size: bits_per_sample.div_ceil(8) * channels,
            frame_rate: sample_rate as f32,
            big_endian,
        }
    }

    /// Header line without the trailing newline
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    /// Parse a header line
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 7 {
            return Err(FrameError::InvalidHeader(format!(
                "expected 7 fields, got {}",
                fields.len()
            )));
        }

        fn field<T: FromStr>(value: &str, name: &str) -> Result<T, FrameError> {
            value
                .parse::<T>()
                .map_err(|_| FrameError::InvalidHeader(format!("bad {}: {}", name, value)))
        }

        let header = Self {
            encoding: fields[0].parse()?,
            sample_rate: field(fields[1], "sample rate")?,
            bits_per_sample: field(fields[2], "sample size")?,
            channels: field(fields[3], "channel count")?,
            frame_size: field(fields[4], "frame size")?,
            frame_rate: field(fields[5], "frame rate")?,
            big_endian: field(fields[6], "endianness")?,
        };

        if header.frame_size == 0 {
            return Err(FrameError::InvalidHeader("frame size is zero".to_string()));
        }
        Ok(header)
    }

    /// Largest prefix of `len` bytes made of whole frames
    pub fn whole_frames(&self, len: usize) -> usize {
        let frame = self.frame_size.max(1) as usize;
        len - len % frame
    }
}

impl fmt::Display for StreamHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.1} {} {} {} {:.1} {}",
            self.encoding.as_str(),
            self.sample_rate,
            self.bits_per_sample,
            self.channels,
            self.frame_size,
            self.frame_rate,
            self.big_endian
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_line_format() {
        let header = StreamHeader::pcm(Encoding::PcmSigned, 48000, 16, 2, false);
        assert_eq!(header.to_line(), "PCM_SIGNED 48000.0 16 2 4 48000.0 false");
    }

    #[test]
    fn test_header_parse() {
        let header = StreamHeader::parse("PCM_SIGNED 44100.0 24 2 6 44100.0 true").unwrap();
        assert_eq!(header.encoding, Encoding::PcmSigned);
        assert_eq!(header.sample_rate, 44100.0);
        assert_eq!(header.bits_per_sample, 24);
        assert_eq!(header.channels, 2);
        assert_eq!(header.frame_size, 6);
        assert!(header.big_endian);
    }

    #[test]
    fn test_header_parse_rejects_short_line() {
        assert!(matches!(
            StreamHeader::parse("PCM_SIGNED 44100.0 16"),
            Err(FrameError::InvalidHeader(_))
        ));
        assert!(StreamHeader::parse("ULAW 8000.0 8 1 1 8000.0 false").is_err());
    }

    #[test]
    fn test_whole_frames() {
        let header = StreamHeader::pcm(Encoding::PcmSigned, 48000, 16, 2, false);
        assert_eq!(header.whole_frames(10), 8);
        assert_eq!(header.whole_frames(3), 0);
        assert_eq!(header.whole_frames(12), 12);
    }

    #[tokio::test]
    async fn test_single_byte_audio_is_not_end_of_stream() {
        let mut wire = encode_frame(FrameKind::Audio, &[0x7f]);
        wire.extend(encode_frame(FrameKind::End, &[]));
        let mut reader = &wire[..];

        let (kind, payload) = read_frame(&mut reader).await.unwrap();
        assert_eq!(kind, FrameKind::Audio);
        assert_eq!(payload, vec![0x7f]);

        let (kind, payload) = read_frame(&mut reader).await.unwrap();
        assert_eq!(kind, FrameKind::End);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_unknown_kind() {
        let wire = [0x09u8, 0, 0, 0, 0];
        let mut reader = &wire[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FrameError::UnknownKind(0x09))
        ));
    }
}
