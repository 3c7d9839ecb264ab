use clap::Parser;
use client::game::{plain_text, Applied, ClientGameState, ServerEvent};
use client::network::Client;
use log::{info, warn};
use shared::DEFAULT_SERVER_URL;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the server
    #[arg(short = 's', long, default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Name shown to other players (4 to 32 characters)
    #[arg(short = 'u', long)]
    username: String,

    /// Identity token presented to the server
    #[arg(short = 't', long)]
    token: String,

    /// Chat message to send after joining; may be repeated
    #[arg(short = 'c', long)]
    chat: Vec<String>,

    /// How long to wait for each server response, in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let client = Client::connect(&args.server, Duration::from_millis(args.timeout_ms)).await?;

    let latency = client.ping().await?;
    info!("Server reachable, round trip {:?}", latency);

    let mut events = client.events();
    let (player_id, players) = client.login(&args.username, &args.token).await?;

    let mut state = ClientGameState::new();
    state.apply_authenticated(player_id, players);
    for player in state.players() {
        info!("Player {} ({}) is online", player.player_id, player.username);
    }

    for message in &args.chat {
        client.send_chat(message)?;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Connection to server lost");
                    break;
                };
                log_event(&state, &event);
                if state.apply(event) == Applied::Kicked {
                    warn!("Removed from the game by the server");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving the game...");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

fn log_event(state: &ClientGameState, event: &ServerEvent) {
    let name = |player_id: u8| {
        state
            .player(player_id)
            .map(|player| player.username.clone())
            .unwrap_or_else(|| format!("#{}", player_id))
    };
    match event {
        ServerEvent::PlayerAdded {
            player_id,
            username,
        } => info!("Player {} ({}) joined", player_id, username),
        ServerEvent::PlayerRemoved { player_id } => info!("{} left", name(*player_id)),
        ServerEvent::PlayerMoved {
            player_id,
            transform,
        } => log::debug!(
            "{} moved to ({:.2}, {:.2}, {:.2})",
            name(*player_id),
            transform.pos_x,
            transform.pos_y,
            transform.pos_z
        ),
        ServerEvent::PlayerShot { player_id } => info!("{} fired", name(*player_id)),
        ServerEvent::Chat { chunks } => info!("[chat] {}", plain_text(chunks)),
    }
}
