mod config;
mod events;
mod relay;
mod server;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use config::ServerConfig;
use events::ServerEvent;
use server::RelayServer;

#[derive(Parser)]
#[command(name = "ghost-server")]
#[command(about = "Ghost position relay server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = ghost::DEFAULT_PORT)]
    port: u16,

    #[arg(
        short,
        long,
        default_value_t = 22,
        value_parser = clap::value_parser!(u8).range(1..=relay::MAX_PLAYERS as i64),
        help = "Maximum connected players"
    )]
    max_players: u8,

    #[arg(long, default_value_t = 20, help = "Updates kept per player")]
    max_updates: usize,

    #[arg(long, help = "Shut down after this many seconds")]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        max_players: usize::from(args.max_players),
        max_updates: args.max_updates,
        ..Default::default()
    };

    let mut server = RelayServer::bind(&args.bind, args.port, config)
        .with_context(|| format!("failed to bind {}:{}", args.bind, args.port))?;
    log::info!("Server started on {}", server.local_addr()?);

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    while deadline.is_none_or(|deadline| Instant::now() < deadline) {
        server.tick_once();

        for event in server.drain_events() {
            log_event(event);
        }

        thread::sleep(server.idle_sleep());
    }

    log::info!("Server shutting down");
    server.shutdown_connections();
    for event in server.drain_events() {
        log_event(event);
    }

    let stats = server.stats();
    log::info!(
        "{} of {} players online, {} packets received, {} relayed",
        stats.player_count,
        stats.max_players,
        stats.packets_received,
        stats.packets_sent
    );
    Ok(())
}

fn log_event(event: ServerEvent) {
    match event {
        ServerEvent::ClientConnecting { addr } => {
            log::debug!("Connection from {}", addr);
        }
        ServerEvent::ClientConnected { id, addr, name } => {
            log::info!("{:02x}: {} connected from {}", id, name, addr);
        }
        ServerEvent::ClientDisconnected { id, reason } => {
            log::info!("{:02x}: {}", id, reason.as_str());
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("Connection denied to {}: {}", addr, reason);
        }
        ServerEvent::Error { message } => {
            log::error!("{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_players_range() {
        let args = Args::try_parse_from(["ghost-server", "--max-players", "22"]).unwrap();
        assert_eq!(usize::from(args.max_players), relay::MAX_PLAYERS);

        assert!(Args::try_parse_from(["ghost-server", "--max-players", "23"]).is_err());
        assert!(Args::try_parse_from(["ghost-server", "--max-players", "30"]).is_err());
        assert!(Args::try_parse_from(["ghost-server", "--max-players", "0"]).is_err());
    }
}
