// ABOUTME: End-to-end tests running a real server on an ephemeral port
// ABOUTME: Drives the command and stream connections the way the client binary does

use musicd::client::{ClientError, Session};
use musicd::server::{MusicServer, ServerConfig, SessionRegistry};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const SHORT_SAMPLES: usize = 8_000;
const LONG_SAMPLES: usize = 400_000;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    dir: TempDir,
}

impl TestServer {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.handle.await.unwrap();
    }
}

/// Canonical 44-byte-header mono 16-bit WAV
fn write_wav(path: &Path, samples: usize) {
    let data_len = (samples * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&8000u32.to_le_bytes());
    bytes.extend_from_slice(&16000u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..samples {
        bytes.extend_from_slice(&((i % 512) as i16 - 256).to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

async fn start_server() -> TestServer {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = TempDir::new().unwrap();
    let data = dir.path();

    std::fs::write(
        data.join("userData.txt"),
        "1 user1@test.com Secret12!\n2 user2@test.com Secret12!\n3 user3@test.com Secret12!\n",
    )
    .unwrap();
    std::fs::write(
        data.join("availableSongs.txt"),
        "Redbone Childish_Gambino 0\nWhy_I_Love_You Jay-Z_&_Kanye_West 1\n",
    )
    .unwrap();
    std::fs::create_dir_all(data.join("songs")).unwrap();
    write_wav(&data.join("songs/Redbone Childish_Gambino.wav"), SHORT_SAMPLES);
    write_wav(&data.join("songs/Why_I_Love_You Jay-Z_&_Kanye_West.wav"), LONG_SAMPLES);

    let config = ServerConfig::with_data_dir(data)
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .chunk_size(1_600)
        .chunk_interval_ms(10);

    let server = MusicServer::from_config(config).unwrap();
    let registry = server.registry();
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        bound
            .run_until(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        registry,
        stop,
        handle,
        dir,
    }
}

async fn wait_for_streams(registry: &SessionRegistry, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.active_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("streams did not start");
}

#[tokio::test]
async fn test_register_search_and_play() {
    let server = start_server().await;
    let mut session = Session::connect(server.addr).await.unwrap();

    assert_eq!(
        session.command("search why").await.unwrap(),
        "ERROR: First you need to login or register!"
    );
    assert_eq!(
        session.command("register new@test.com Passw0rd!").await.unwrap(),
        "4"
    );
    assert_eq!(session.id(), 4);
    assert_eq!(
        session.command("login new@test.com Passw0rd!").await.unwrap(),
        "4"
    );
    assert_eq!(
        session.command("search why").await.unwrap(),
        "[Song: \"Why I Love You\" by \"Jay-Z & Kanye West\"]"
    );
    assert_eq!(
        session.command("execute").await.unwrap(),
        "ERROR: Given command does not exist"
    );

    let mut audio = Vec::new();
    let (header, bytes) = session.play("redbone", &mut audio).await.unwrap();
    assert_eq!(header.to_line(), "PCM_SIGNED 8000.0 16 1 2 8000.0 false");
    assert_eq!(bytes, SHORT_SAMPLES * 2);
    assert_eq!(audio.len(), SHORT_SAMPLES * 2);

    let users = std::fs::read_to_string(server.dir.path().join("userData.txt")).unwrap();
    assert!(users.contains("4 new@test.com Passw0rd!"));
    let songs = std::fs::read_to_string(server.dir.path().join("availableSongs.txt")).unwrap();
    assert!(songs.contains("Redbone Childish_Gambino 1"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_playlists_persist() {
    let server = start_server().await;
    let mut session = Session::connect(server.addr).await.unwrap();
    session.command("login user2@test.com Secret12!").await.unwrap();

    assert_eq!(
        session.command("create-playlist \"road trip\"").await.unwrap(),
        "Playlist created successfully!"
    );
    assert_eq!(session.command("show-playlist road trip").await.unwrap(), "[]");
    assert_eq!(
        session.command("add-song-to \"road trip\" Redbone").await.unwrap(),
        "Song successfully added to the playlist!"
    );
    assert_eq!(
        session.command("show-playlist road trip").await.unwrap(),
        "[Song: \"Redbone\" by \"Childish Gambino\"]"
    );

    let playlist = server.dir.path().join("playlists/2 road trip.txt");
    assert_eq!(
        std::fs::read_to_string(playlist).unwrap(),
        "Redbone Childish_Gambino 0\n"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_play_unknown_song_is_rejected() {
    let server = start_server().await;
    let mut session = Session::connect(server.addr).await.unwrap();
    session.command("login user1@test.com Secret12!").await.unwrap();

    let mut audio = Vec::new();
    let result = session.play("unknown", &mut audio).await;
    assert!(matches!(
        result,
        Err(ClientError::Rejected(line)) if line == "ERROR: There is no song with the specified name"
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn test_stop_only_affects_its_session() {
    let server = start_server().await;

    let mut x = Session::connect(server.addr).await.unwrap();
    x.command("login user1@test.com Secret12!").await.unwrap();
    let mut y = Session::connect(server.addr).await.unwrap();
    y.command("login user2@test.com Secret12!").await.unwrap();

    let mut x_stream = x.take_stream().unwrap();
    let x_play = tokio::spawn(async move {
        let mut audio = Vec::new();
        x_stream.play(1, "why i love you", &mut audio).await.map(|(_, n)| n)
    });
    let mut y_stream = y.take_stream().unwrap();
    let y_play = tokio::spawn(async move {
        let mut audio = Vec::new();
        y_stream.play(2, "why i love you", &mut audio).await.map(|(_, n)| n)
    });

    wait_for_streams(&server.registry, 2).await;
    assert_eq!(x.command("stop").await.unwrap(), "stop");

    let x_bytes = x_play.await.unwrap().unwrap();
    assert!(x_bytes < LONG_SAMPLES * 2);
    assert_eq!(x_bytes % 2, 0);

    // Y keeps streaming until its own stop
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.registry.active_count(), 1);
    assert!(!server.registry.is_cancelled(2));

    assert_eq!(y.command("stop").await.unwrap(), "stop");
    let y_bytes = y_play.await.unwrap().unwrap();
    assert!(y_bytes > 0);

    server.shutdown().await;
}
