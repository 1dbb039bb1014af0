// ABOUTME: Client side of the two-connection protocol
// ABOUTME: Command channel with session tracking plus stream channel decoding

use crate::protocol::command::{
    decode_latin1, encode_latin1, is_error_reply, SessionId, ANONYMOUS_SESSION,
};
use crate::protocol::frame::{read_frame, FrameError, FrameKind, StreamHeader};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream channel carried something unreadable
    #[error("Stream error: {0}")]
    Frame(#[from] FrameError),

    /// The server closed the connection
    #[error("Server closed the connection")]
    Disconnected,

    /// The server refused the request
    #[error("{0}")]
    Rejected(String),

    /// The server aborted a stream
    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Read frames until the end frame, writing whole audio frames to `sink`.
/// Returns the number of audio bytes written.
pub async fn receive_stream<R, W>(
    reader: &mut R,
    header: &StreamHeader,
    sink: &mut W,
) -> Result<usize, ClientError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    loop {
        let (kind, payload) = read_frame(reader).await?;
        match kind {
            FrameKind::Audio => {
                let len = header.whole_frames(payload.len());
                sink.write_all(&payload[..len]).await?;
                written += len;
            }
            FrameKind::End => {
                sink.flush().await?;
                return Ok(written);
            }
            FrameKind::Error => {
                return Err(ClientError::Playback(
                    String::from_utf8_lossy(&payload).into_owned(),
                ))
            }
        }
    }
}

/// One line-oriented connection
struct LineChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineChannel {
    async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let (read, writer) = TcpStream::connect(addr).await?.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
        })
    }

    async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        let mut bytes = encode_latin1(line);
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ClientError> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf).await? == 0 {
            return Err(ClientError::Disconnected);
        }
        Ok(decode_latin1(&buf).trim_end().to_string())
    }
}

/// The stream connection of a session
pub struct StreamChannel {
    channel: LineChannel,
}

impl StreamChannel {
    /// Ask for a song and receive it into `sink`. Returns the stream header
    /// and the number of audio bytes received.
    pub async fn play<W>(
        &mut self,
        session: SessionId,
        song: &str,
        sink: &mut W,
    ) -> Result<(StreamHeader, usize), ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        self.channel
            .send(&format!("{} play {}", session, song))
            .await?;

        let line = self.channel.read_line().await?;
        if is_error_reply(&line) {
            return Err(ClientError::Rejected(line));
        }

        let header = StreamHeader::parse(&line)?;
        let received = receive_stream(&mut self.channel.reader, &header, sink).await?;
        Ok((header, received))
    }
}

/// A client session: the command connection, the stream connection and the
/// session id every command is prefixed with
pub struct Session {
    id: SessionId,
    commands: LineChannel,
    stream: Option<StreamChannel>,
}

impl Session {
    /// Open both connections to a server
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let commands = LineChannel::connect(addr).await?;
        let stream = StreamChannel {
            channel: LineChannel::connect(addr).await?,
        };
        Ok(Self {
            id: ANONYMOUS_SESSION,
            commands,
            stream: Some(stream),
        })
    }

    /// Current session id (`0` until register or login succeeds)
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Send a command (without the session prefix) and return the reply.
    ///
    /// A successful register or login switches the session to the returned id.
    pub async fn command(&mut self, input: &str) -> Result<String, ClientError> {
        let input = input.trim();
        self.commands
            .send(&format!("{} {}", self.id, input))
            .await?;
        let reply = self.commands.read_line().await?;

        let name = input.split_whitespace().next().unwrap_or_default();
        if matches!(name, "register" | "login") && !is_error_reply(&reply) {
            if let Ok(id) = reply.parse() {
                log::debug!("Session switched from {} to {}", self.id, id);
                self.id = id;
            }
        }
        Ok(reply)
    }

    /// Stream a song over the stream connection
    pub async fn play<W>(
        &mut self,
        song: &str,
        sink: &mut W,
    ) -> Result<(StreamHeader, usize), ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        let id = self.id;
        let stream = self.stream.as_mut().ok_or(ClientError::Disconnected)?;
        stream.play(id, song, sink).await
    }

    /// Hand the stream connection to another task, e.g. to keep sending
    /// commands while a song plays
    pub fn take_stream(&mut self) -> Option<StreamChannel> {
        self.stream.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{encode_frame, Encoding};
    use tokio::net::TcpListener;

    fn stereo16() -> StreamHeader {
        StreamHeader::pcm(Encoding::PcmSigned, 48000, 16, 2, false)
    }

    #[tokio::test]
    async fn test_receive_stream_trims_partial_frames() {
        let mut wire = Vec::new();
        wire.extend(encode_frame(FrameKind::Audio, &[1, 2, 3, 4, 5, 6]));
        wire.extend(encode_frame(FrameKind::Audio, &[7, 8, 9, 10]));
        wire.extend(encode_frame(FrameKind::End, &[]));

        let mut sink = Vec::new();
        let written = receive_stream(&mut wire.as_slice(), &stereo16(), &mut sink)
            .await
            .unwrap();

        assert_eq!(written, 8);
        assert_eq!(sink, vec![1, 2, 3, 4, 7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_one_byte_frame_is_not_the_end() {
        let header = StreamHeader::pcm(Encoding::PcmUnsigned, 8000, 8, 1, false);
        let mut wire = Vec::new();
        wire.extend(encode_frame(FrameKind::Audio, &[0x7f]));
        wire.extend(encode_frame(FrameKind::Audio, &[0x80]));
        wire.extend(encode_frame(FrameKind::End, &[]));

        let mut sink = Vec::new();
        receive_stream(&mut wire.as_slice(), &header, &mut sink)
            .await
            .unwrap();
        assert_eq!(sink, vec![0x7f, 0x80]);
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let audio = encode_frame(FrameKind::Audio, &[1, 2, 3, 4]);
        let end = encode_frame(FrameKind::End, &[]);
        let mut reader = tokio_test::io::Builder::new()
            .read(&audio[..3])
            .read(&audio[3..])
            .read(&end)
            .build();

        let mut sink = Vec::new();
        let written = receive_stream(&mut reader, &stereo16(), &mut sink)
            .await
            .unwrap();
        assert_eq!(written, 4);
        assert_eq!(sink, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_error_frame() {
        let mut wire = Vec::new();
        wire.extend(encode_frame(FrameKind::Audio, &[0; 4]));
        wire.extend(encode_frame(FrameKind::Error, b"disk gone"));

        let mut sink = Vec::new();
        let result = receive_stream(&mut wire.as_slice(), &stereo16(), &mut sink).await;
        assert!(matches!(result, Err(ClientError::Playback(msg)) if msg == "disk gone"));
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let wire = encode_frame(FrameKind::Audio, &[0; 4]);

        let mut sink = Vec::new();
        let result = receive_stream(&mut wire.as_slice(), &stereo16(), &mut sink).await;
        assert!(matches!(result, Err(ClientError::Frame(FrameError::Io(_)))));
    }

    #[tokio::test]
    async fn test_session_prefix_and_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (commands, _) = listener.accept().await.unwrap();
            let (_stream, _) = listener.accept().await.unwrap();

            let (read, mut write) = commands.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            for reply in ["ERROR: Wrong password!", "4", "[]"] {
                seen.push(lines.next_line().await.unwrap().unwrap());
                write.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
            }
            seen
        });

        let mut session = Session::connect(addr).await.unwrap();
        session.command("login a@test.com bad").await.unwrap();
        assert_eq!(session.id(), 0);
        assert_eq!(session.command("login a@test.com Passw0rd!").await.unwrap(), "4");
        assert_eq!(session.id(), 4);
        session.command("search why").await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            vec![
                "0 login a@test.com bad",
                "0 login a@test.com Passw0rd!",
                "4 search why"
            ]
        );
    }
}
