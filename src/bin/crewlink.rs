//! CrewLink Voice client
//!
//! Joins the signaling relay, keeps a voice link to every player in the
//! lobby and serves the control API that the game reader feeds.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crewlink_voice::{
    audio::device::list_devices,
    config::AppConfig,
    game::{GameState, Phase, Player},
    session::VoiceEngine,
    ui::WebServer,
};

/// Proximity voice chat client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling relay URL (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// In-game name used to find the local player
    #[arg(short = 'n', long)]
    player_name: Option<String>,

    /// Join this lobby right away, without waiting for a game reader
    #[arg(short, long)]
    lobby: Option<String>,

    /// Config file path (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the audio devices and exit
    #[arg(long, default_value = "false")]
    list_devices: bool,
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
    }
    println!();
}

/// Snapshot standing in for a game reader when a lobby is given on the
/// command line
fn manual_lobby(code: &str, player_name: &str) -> GameState {
    let mut me = Player::new(0, player_name);
    me.is_local = true;
    me.client_id = chrono::Utc::now().timestamp_subsec_micros();
    GameState {
        phase: Phase::Lobby,
        previous_phase: Phase::Menu,
        lobby_code: code.to_string(),
        client_id: me.client_id,
        players: vec![me],
        ..GameState::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let config_path = match args.config {
        Some(path) => path,
        None => AppConfig::config_path().context("Cannot locate config directory")?,
    };
    let mut config = AppConfig::load_or_default(&config_path);
    if let Some(server) = args.server {
        config.voice.server_url = server;
    }
    if let Some(name) = args.player_name {
        config.voice.player_name = name;
    }

    tracing::info!("Starting CrewLink Voice, relay {}", config.voice.server_url);

    let engine = VoiceEngine::start(&config)
        .await
        .context("Voice session could not start")?;
    let session = engine.handle();

    let web_server = WebServer::new(config.ui.clone(), session.clone());
    let web_handle = web_server.start_background();
    tracing::info!(
        "Control API available at http://{}:{}",
        config.ui.bind_address,
        config.ui.http_port
    );

    if let Some(code) = args.lobby {
        session.push_game_state(manual_lobby(&code, &config.voice.player_name));
    }

    let mut health = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            _ = health.tick() => {
                engine.check_devices();
                if session.is_closed() {
                    tracing::warn!("Voice session ended");
                    break;
                }
            }
        }
    }

    web_handle.abort();
    engine.shutdown().await;
    Ok(())
}
