mod app;
mod stats;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use glam::DVec3;

use ghost::{GhostConfig, GhostSession, NetConnector};

use app::{App, CirclePath};

#[derive(Parser)]
#[command(name = "ghost-client")]
#[command(about = "Headless ghost sync client that walks a circle and logs other players")]
struct Args {
    #[arg(short, long, help = "JSON config file; flags below override it")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Relay server host name or address")]
    server: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    name: Option<String>,

    #[arg(long, help = "Ghost color as hex, e.g. ff8800")]
    color: Option<String>,

    #[arg(short, long, default_value = "Zone_Library", help = "Level to load on start")]
    level: String,

    #[arg(short, long, help = "Seconds to play before quitting to the title screen")]
    duration: Option<u64>,

    #[arg(long, default_value_t = 5.0)]
    radius: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args)?;

    log::info!(
        "Joining {}:{} as {} in {}",
        config.address,
        config.port,
        config.name,
        args.level
    );

    let connector = NetConnector::new(config.address.clone(), config.port, config.connect_timeout());
    let session = GhostSession::new(config, connector);

    let path = CirclePath {
        center: DVec3::ZERO,
        radius: args.radius,
        speed: 45.0,
    };
    let mut app = App::new(session, args.level, path);
    app.run(args.duration.map(Duration::from_secs));

    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<GhostConfig> {
    let mut config = match &args.config {
        Some(path) => GhostConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => GhostConfig::default(),
    };

    if let Some(server) = &args.server {
        config.address = server.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(color) = &args.color {
        config.color = parse_color(color)?;
    }

    config.validate()?;
    Ok(config)
}

fn parse_color(text: &str) -> anyhow::Result<[u8; 3]> {
    let hex = text.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        bail!("color must be six hex digits, got {:?}", text);
    }

    let mut color = [0u8; 3];
    for (i, channel) in color.iter_mut().enumerate() {
        *channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("invalid color {:?}", text))?;
    }
    Ok(color)
}
