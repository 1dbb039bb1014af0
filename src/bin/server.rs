// ABOUTME: musicd server binary
// ABOUTME: Serves the music catalog and audio streams until Ctrl-C

use clap::Parser;
use musicd::server::{MusicServer, ServerArgs};

#[derive(Parser, Debug)]
#[command(name = "musicd-server")]
#[command(author, version, about = "musicd music catalog and streaming server", long_about = None)]
struct Args {
    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize tracing
    args.server.init_tracing();

    // Log startup info
    args.server.log_startup_info();

    // Create server configuration
    let config = args.server.build_config();

    // Load the catalog and bind; both failures are fatal
    let server = MusicServer::from_config(config)?;
    let registry = server.registry();

    // Spawn a task to periodically report active streams
    let report_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            let count = registry.active_count();
            if count > 0 {
                tracing::info!("Active streams: {}", count);
            }
        }
    });

    tracing::info!("Press Ctrl+C to stop");

    let result = server.run().await;
    report_task.abort();
    result.map_err(Into::into)
}
