// ABOUTME: Streaming worker: sends one song over a session's stream connection
// ABOUTME: Paces whole-frame chunks and stops cooperatively on cancellation

use crate::protocol::frame::{encode_frame, FrameKind};
use crate::server::asset::{AudioAsset, PlaybackError};
use crate::server::error_log::ErrorLog;
use crate::server::registry::{SharedRegistry, StreamTicket};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Message sent to the client when a stream fails
pub const PLAYBACK_FAILED: &str = "An error occurred while playing the song!";

/// Write half of a connection, shared between the reactor and workers
pub type SharedWriter<W> = Arc<Mutex<W>>;

/// Pacing of the audio stream
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Largest chunk per audio frame, in bytes
    pub chunk_size: usize,
    /// Pause after every audio frame
    pub chunk_interval: Duration,
}

/// Everything a worker captures when it is spawned
pub struct StreamJob<W> {
    /// Command line that started the stream, for the error log
    pub request: String,
    /// Audio file to send
    pub asset: PathBuf,
    /// Registry entry of this stream
    pub ticket: StreamTicket,
    /// Connection that receives the stream
    pub writer: SharedWriter<W>,
    /// Held for the whole stream so workers on one connection never interleave
    pub gate: Arc<Mutex<()>>,
}

/// Spawn a streaming worker. The caller never awaits it; the handle is only
/// useful to tests.
pub fn spawn_stream<W>(
    job: StreamJob<W>,
    settings: StreamSettings,
    registry: SharedRegistry,
    errors: Arc<ErrorLog>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let _gate = job.gate.clone().lock_owned().await;

        let mut header_sent = false;
        match stream_asset(&job, settings, &mut header_sent).await {
            Ok(frames) => {
                log::debug!(
                    "Session {} stream finished after {} frames (cancelled: {})",
                    job.ticket.session(),
                    frames,
                    job.ticket.is_cancelled()
                );
            }
            Err(e) => {
                report_failure(&job, &e, header_sent).await;
                errors.record(&job.request, &e);
            }
        }

        registry.finish(&job.ticket);
    })
}

/// Send the header, the audio frames and the end frame. Returns the number of
/// audio frames written.
async fn stream_asset<W>(
    job: &StreamJob<W>,
    settings: StreamSettings,
    header_sent: &mut bool,
) -> Result<usize, PlaybackError>
where
    W: AsyncWrite + Unpin,
{
    let mut asset = AudioAsset::open(&job.asset)?;

    let header = format!("{}\n", asset.header().to_line());
    write_all(&job.writer, header.as_bytes()).await?;
    *header_sent = true;

    log::info!(
        "Session {} streaming {} ({})",
        job.ticket.session(),
        job.asset.display(),
        asset.header()
    );

    let token = job.ticket.token();
    let mut frames = 0;
    loop {
        if token.is_cancelled() {
            break;
        }

        let Some(chunk) = asset.read_chunk(settings.chunk_size)? else {
            break;
        };

        if token.is_cancelled() {
            break;
        }
        write_all(&job.writer, &encode_frame(FrameKind::Audio, &chunk)).await?;
        frames += 1;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(settings.chunk_interval) => {}
        }
    }

    write_all(&job.writer, &encode_frame(FrameKind::End, &[])).await?;
    Ok(frames)
}

/// Tell the client the stream failed, as a text line before the header or
/// as an error frame after it
async fn report_failure<W>(job: &StreamJob<W>, error: &PlaybackError, header_sent: bool)
where
    W: AsyncWrite + Unpin,
{
    if matches!(error, PlaybackError::Transport(_)) {
        return;
    }

    let message = if header_sent {
        encode_frame(FrameKind::Error, PLAYBACK_FAILED.as_bytes())
    } else {
        format!("ERROR: {}\n", PLAYBACK_FAILED).into_bytes()
    };

    if let Err(e) = write_all(&job.writer, &message).await {
        log::warn!(
            "Session {}: failed to report stream error: {}",
            job.ticket.session(),
            e
        );
    }
}

async fn write_all<W>(writer: &SharedWriter<W>, bytes: &[u8]) -> Result<(), PlaybackError>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer.lock().await;
    writer
        .write_all(bytes)
        .await
        .map_err(PlaybackError::Transport)?;
    writer.flush().await.map_err(PlaybackError::Transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::SessionId;
    use crate::protocol::frame::{read_frame, StreamHeader};
    use crate::server::registry::SessionRegistry;
    use crate::server::asset::tests::write_wav;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    struct Fixture {
        _dir: tempfile::TempDir,
        asset: PathBuf,
        registry: SharedRegistry,
        writer: SharedWriter<DuplexStream>,
        reader: BufReader<DuplexStream>,
        gate: Arc<Mutex<()>>,
    }

    fn fixture(samples: usize) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let asset = dir.path().join("song gerii.wav");
        let pcm: Vec<i16> = (0..samples).map(|i| (i % 1000) as i16).collect();
        write_wav(&asset, 8000, 1, &pcm);

        let (server_side, client_side) = tokio::io::duplex(64 * 1024);
        Fixture {
            _dir: dir,
            asset,
            registry: Arc::new(SessionRegistry::new()),
            writer: Arc::new(Mutex::new(server_side)),
            reader: BufReader::new(client_side),
            gate: Arc::new(Mutex::new(())),
        }
    }

    fn job(f: &Fixture, session: SessionId, asset: PathBuf) -> StreamJob<DuplexStream> {
        StreamJob {
            request: format!("{} play song", session),
            asset,
            ticket: f.registry.start(session),
            writer: f.writer.clone(),
            gate: f.gate.clone(),
        }
    }

    fn settings(chunk_size: usize, interval_ms: u64) -> StreamSettings {
        StreamSettings {
            chunk_size,
            chunk_interval: Duration::from_millis(interval_ms),
        }
    }

    async fn read_header(reader: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_streams_whole_asset() {
        let mut f = fixture(3000);
        let handle = spawn_stream(
            job(&f, 2, f.asset.clone()),
            settings(1000, 0),
            f.registry.clone(),
            Arc::new(ErrorLog::disabled()),
        );

        let header = StreamHeader::parse(&read_header(&mut f.reader).await).unwrap();
        assert_eq!(header.frame_size, 2);

        let mut received = 0;
        loop {
            let (kind, payload) = read_frame(&mut f.reader).await.unwrap();
            match kind {
                FrameKind::Audio => {
                    assert!(payload.len() <= 1000);
                    received += payload.len();
                }
                FrameKind::End => break,
                FrameKind::Error => panic!("unexpected error frame"),
            }
        }

        assert_eq!(received, 6000);
        handle.await.unwrap();
        assert_eq!(f.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_between_chunks() {
        let mut f = fixture(8000);
        let handle = spawn_stream(
            job(&f, 5, f.asset.clone()),
            settings(100, 10_000),
            f.registry.clone(),
            Arc::new(ErrorLog::disabled()),
        );

        read_header(&mut f.reader).await;
        let (kind, _) = read_frame(&mut f.reader).await.unwrap();
        assert_eq!(kind, FrameKind::Audio);

        assert!(f.registry.cancel(5));

        let (kind, payload) = read_frame(&mut f.reader).await.unwrap();
        assert_eq!(kind, FrameKind::End);
        assert!(payload.is_empty());

        handle.await.unwrap();
        assert_eq!(f.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_asset_reports_error_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_path = dir.path().join("errors.txt");
        let mut f = fixture(10);
        let missing = f.asset.with_file_name("missing.wav");

        let handle = spawn_stream(
            job(&f, 3, missing),
            settings(100, 0),
            f.registry.clone(),
            Arc::new(ErrorLog::new(&log_path)),
        );
        handle.await.unwrap();

        let line = read_header(&mut f.reader).await;
        assert_eq!(line, format!("ERROR: {}", PLAYBACK_FAILED));

        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert!(logged.starts_with("3 play song\n"));
        assert_eq!(f.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_replacing_stream_keeps_frames_apart() {
        let mut f = fixture(4000);
        let first = spawn_stream(
            job(&f, 7, f.asset.clone()),
            settings(200, 10_000),
            f.registry.clone(),
            Arc::new(ErrorLog::disabled()),
        );

        read_header(&mut f.reader).await;
        let (kind, _) = read_frame(&mut f.reader).await.unwrap();
        assert_eq!(kind, FrameKind::Audio);

        // A second play on the same session cancels the first stream
        let second = spawn_stream(
            job(&f, 7, f.asset.clone()),
            settings(4000, 0),
            f.registry.clone(),
            Arc::new(ErrorLog::disabled()),
        );

        let (kind, _) = read_frame(&mut f.reader).await.unwrap();
        assert_eq!(kind, FrameKind::End);

        let header = read_header(&mut f.reader).await;
        assert!(StreamHeader::parse(&header).is_ok());

        first.await.unwrap();
        second.await.unwrap();
    }
}
