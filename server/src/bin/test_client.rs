//! Headless bot that joins a match and steers at random.

use clap::Parser;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use server::connection::FrameReader;
use shared::{encode_frame, Action, ClientCipher, MessageType, ProtocolMessage};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Milliseconds between random moves
    #[arg(short = 'i', long, default_value = "400")]
    interval_ms: u64,
}

const MOVES: [Action; 5] = [
    Action::MoveUp,
    Action::MoveDown,
    Action::MoveLeft,
    Action::MoveRight,
    Action::Jump,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    stream.set_nodelay(true)?;
    info!("Connected to {}", args.server);

    let (reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(reader);

    let parameters = frames
        .next_frame()
        .await?
        .ok_or("server closed before sending key parameters")?;
    let (cipher, material) = ClientCipher::negotiate(std::str::from_utf8(&parameters)?)?;
    writer.write_all(&encode_frame(&material)).await?;
    info!("Key exchange sent, waiting for the match to start");

    let mut rng = rand::thread_rng();
    let mut steer = interval(Duration::from_millis(args.interval_ms));
    let mut started = false;

    loop {
        tokio::select! {
            frame = frames.next_frame() => {
                let Some(frame) = frame? else {
                    info!("Server closed the connection");
                    break;
                };
                match cipher.decode_frame(&frame) {
                    Ok(message) => {
                        if report(&message) {
                            break;
                        }
                        started |= message.kind == MessageType::Start;
                    }
                    Err(e) => warn!("Unreadable frame: {}", e),
                }
            }
            _ = steer.tick(), if started => {
                if let Some(action) = MOVES.choose(&mut rng) {
                    debug!("Sending {:?}", action);
                    let frame = cipher.seal_message(&ProtocolMessage::command(*action))?;
                    writer.write_all(&frame).await?;
                }
            }
        }
    }

    Ok(())
}

/// Logs a server message. Returns true once the match is over.
fn report(message: &ProtocolMessage) -> bool {
    match message.kind {
        MessageType::Start => {
            info!("Match starting with {} players", message.players.len());
        }
        MessageType::Update => {
            for player in &message.players {
                debug!(
                    "player {} at ({}, {}) {:?}{}",
                    player.id,
                    player.position.x,
                    player.position.y,
                    player.direction,
                    if player.alive { "" } else { " (dead)" }
                );
            }
        }
        MessageType::Died => info!("Player {:?} died", message.player),
        MessageType::End => {
            info!("Match over, winner {:?}", message.winner);
            return true;
        }
        MessageType::Action => debug!("Ignoring echoed action"),
    }
    false
}
