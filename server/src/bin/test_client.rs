//! Headless client that joins a server, plays with random jetpack input and
//! reports what it receives.

use bytes::BytesMut;
use clap::Parser;
use log::{debug, info, warn};
use rand::Rng;
use serde_json::json;
use shared::{ClientMessage, FrameBuffer, ServerMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Chance per GameState that the bot flips its jetpack
const TOGGLE_PROBABILITY: f64 = 0.25;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless test client for the jetpack server")]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long)]
    port: u16,

    /// Print every GameState and Collision as a JSON line on stdout
    #[arg(long)]
    json: bool,

    /// Exit after this many rounds have ended
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    rounds: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    stream.set_nodelay(true)?;
    info!("Connected to {}", stream.peer_addr()?);

    let (mut reader, mut writer) = stream.into_split();
    writer.write_all(&ClientMessage::Connect.encode()?).await?;

    let mut rng = rand::thread_rng();
    let mut frames = FrameBuffer::new();
    let mut buffer = BytesMut::with_capacity(4096);
    let mut jetpack = false;
    let mut playing = false;
    let mut rounds_played = 0;
    let mut tick: u64 = 0;

    loop {
        buffer.reserve(4096);
        if reader.read_buf(&mut buffer).await? == 0 {
            info!("Server closed the connection");
            return Ok(());
        }
        frames.extend(&buffer.split());

        while let Some(frame) = frames.next_frame() {
            match ServerMessage::decode(&frame) {
                Ok(ServerMessage::MapData(map)) => {
                    info!("Received {}x{} map", map.width(), map.height());
                }
                Ok(ServerMessage::GameStart) => {
                    info!("Round started");
                    playing = true;
                    tick = 0;
                }
                Ok(ServerMessage::GameState(players)) => {
                    tick += 1;
                    if args.json {
                        println!("{}", json!({ "tick": tick, "players": players }));
                    }

                    if playing && rng.gen_bool(TOGGLE_PROBABILITY) {
                        jetpack = !jetpack;
                        debug!("Jetpack {}", if jetpack { "on" } else { "off" });
                        let input = ClientMessage::PlayerInput { jetpack }.encode()?;
                        writer.write_all(&input).await?;
                    }
                }
                Ok(ServerMessage::Collision(collision)) => {
                    debug!(
                        "{:?} at ({}, {})",
                        collision.kind, collision.x, collision.y
                    );
                    if args.json {
                        println!("{}", json!({ "tick": tick, "collision": collision }));
                    }
                }
                Ok(ServerMessage::GameEnd { winner }) => {
                    match winner {
                        Some(number) => info!("Round over after {} ticks, player {} won", tick, number),
                        None => info!("Round over after {} ticks, no winner", tick),
                    }
                    playing = false;
                    rounds_played += 1;
                    if rounds_played >= args.rounds {
                        return Ok(());
                    }
                }
                Err(e) => warn!("Ignoring frame: {}", e),
            }
        }
    }
}
