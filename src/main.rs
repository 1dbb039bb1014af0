// ABOUTME: musicd command line client
// ABOUTME: Reads commands from stdin and receives streamed songs on a second connection

use clap::Parser;
use musicd::client::{ClientError, Session, StreamChannel};
use musicd::SessionId;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "musicd")]
#[command(author, version, about = "musicd command line client", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:15157")]
    server: SocketAddr,

    /// Append received audio (raw PCM) to this file instead of discarding it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose { "musicd=debug" } else { "musicd=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_usage() {
    println!(
        "Commands:\n\
        \x20 register <email> <password>\n\
        \x20 login <email> <password>\n\
        \x20 search <words...>\n\
        \x20 top <number>\n\
        \x20 create-playlist <name>\n\
        \x20 add-song-to <playlist> <song>\n\
        \x20 show-playlist <name>\n\
        \x20 play <song>\n\
        \x20 stop\n\
        \x20 help\n\
        \x20 disconnect\n\
        \n\
        Wrap arguments containing spaces in double quotes."
    );
}

async fn open_sink(
    output: Option<&PathBuf>,
) -> std::io::Result<Box<dyn AsyncWrite + Unpin + Send>> {
    match output {
        Some(path) => {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::sink())),
    }
}

/// Plays requested songs one after another on the stream connection
async fn playback(
    mut stream: StreamChannel,
    mut requests: mpsc::UnboundedReceiver<(SessionId, String)>,
    output: Option<PathBuf>,
) {
    while let Some((session, song)) = requests.recv().await {
        let mut sink = match open_sink(output.as_ref()).await {
            Ok(sink) => sink,
            Err(e) => {
                eprintln!("Cannot open output: {}", e);
                continue;
            }
        };

        match stream.play(session, &song, &mut sink).await {
            Ok((header, bytes)) => println!("Finished {} ({} bytes, {})", song, bytes, header),
            Err(ClientError::Rejected(reply)) => println!("{}", reply),
            Err(ClientError::Playback(reason)) => println!("Playback of {} failed: {}", song, reason),
            Err(e) => {
                eprintln!("Stream connection lost: {}", e);
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut session = Session::connect(args.server).await?;
    println!("Connected to {}. Type 'help' for the list of commands.", args.server);

    let (play_tx, play_rx) = mpsc::unbounded_channel();
    let player = match session.take_stream() {
        Some(stream) => tokio::spawn(playback(stream, play_rx, args.output.clone())),
        None => return Err("stream connection unavailable".into()),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (name, rest) = line.split_once(' ').unwrap_or((line, ""));

        match name {
            "" => continue,
            "help" => print_usage(),
            "disconnect" => break,
            "play" if !rest.trim().is_empty() => {
                if play_tx.send((session.id(), rest.trim().to_string())).is_err() {
                    eprintln!("Playback stopped, reconnect to play again");
                }
            }
            _ => {
                match session.command(line).await {
                    Ok(reply) => println!("{}", reply),
                    Err(ClientError::Disconnected) => {
                        eprintln!("Server closed the connection");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    player.abort();
    println!("Disconnected");
    Ok(())
}
