use clap::Parser;
use log::{error, info};
use server::network::{BoxError, Server, ServerConfig};
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, then hosts a single match until it ends.
#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Side length of the square field
        #[clap(short, long, default_value_t = shared::DEFAULT_FIELD_SIZE)]
        field_size: i32,
        /// Players needed before the match starts
        #[clap(long, default_value = "4", value_parser = clap::value_parser!(u8).range(2..=4))]
        players: u8,
        /// Milliseconds between simulation ticks
        #[clap(short, long, default_value_t = shared::TICK_INTERVAL_MS)]
        tick_ms: u64,
        /// Pause between the start message and the first tick
        #[clap(long, default_value_t = shared::START_DELAY_MS)]
        start_delay_ms: u64,
        /// Seed for the tail growth schedule
        #[clap(long)]
        seed: Option<u64>,
    }

    let args = Args::parse();

    let config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        field_size: args.field_size,
        players_per_match: args.players as usize,
        tick_interval: Duration::from_millis(args.tick_ms),
        start_delay: Duration::from_millis(args.start_delay_ms),
        seed: args.seed,
    };

    let server = Server::bind(config).await?;
    let engine = server.engine();

    tokio::select! {
        result = server.run() => match result {
            Ok(Some(winner)) => info!("Player {} wins", winner),
            Ok(None) => info!("Match ended without a winner"),
            Err(e) => error!("Server failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            engine.stop();
        }
    }

    Ok(())
}
