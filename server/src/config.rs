//! Command line and runtime configuration for the server

use crate::error::ServerError;
use clap::Parser;
use log::LevelFilter;
use shared::LevelMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default upper bound on the readiness wait of one event loop pass
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Default connection capacity
pub const DEFAULT_MAX_PLAYERS: u8 = 8;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative server for the jetpack race game")]
pub struct Args {
    /// TCP port to listen on
    #[arg(short, long)]
    pub port: u16,

    /// Level file to serve
    #[arg(short, long)]
    pub map: PathBuf,

    /// Enable verbose diagnostics, including per-frame dumps
    #[arg(short, long)]
    pub debug: bool,

    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Longest a loop pass waits for network activity; also paces the simulation
    #[arg(long, default_value_t = DEFAULT_POLL_TIMEOUT_MS)]
    pub poll_timeout_ms: u64,

    /// Maximum number of connected players
    #[arg(long, default_value_t = DEFAULT_MAX_PLAYERS,
          value_parser = clap::value_parser!(u8).range(2..=255))]
    pub max_players: u8,
}

impl Args {
    /// Default log level implied by the flags; `RUST_LOG` may still override it
    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

/// Settings the server runs with, fixed for its lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub map_path: PathBuf,
    /// Dump every frame sent and received
    pub debug: bool,
    pub poll_timeout: Duration,
    pub max_players: usize,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn load_map(&self) -> Result<LevelMap, ServerError> {
        Ok(LevelMap::load_from_file(&self.map_path)?)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            map_path: PathBuf::new(),
            debug: false,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            max_players: DEFAULT_MAX_PLAYERS as usize,
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            map_path: args.map,
            debug: args.debug,
            poll_timeout: Duration::from_millis(args.poll_timeout_ms),
            max_players: args.max_players as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_flags_with_defaults() {
        let args = Args::try_parse_from(["server", "-p", "4242", "-m", "level.txt"]).unwrap();
        assert_eq!(args.port, 4242);
        assert_eq!(args.map, PathBuf::from("level.txt"));
        assert!(!args.debug);
        assert_eq!(args.log_level(), LevelFilter::Info);

        let config = ServerConfig::from(args);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.poll_timeout, Duration::from_millis(100));
        assert_eq!(config.max_players, 8);
        assert_eq!(config.bind_addr().unwrap(), "0.0.0.0:4242".parse().unwrap());
    }

    #[test]
    fn test_missing_port_is_rejected() {
        assert!(Args::try_parse_from(["server", "-m", "level.txt"]).is_err());
    }

    #[test]
    fn test_missing_map_is_rejected() {
        assert!(Args::try_parse_from(["server", "-p", "4242"]).is_err());
    }

    #[test]
    fn test_debug_flag_raises_log_level() {
        let args = Args::try_parse_from(["server", "-p", "1", "-m", "m", "-d"]).unwrap();
        assert!(args.debug);
        assert_eq!(args.log_level(), LevelFilter::Debug);
        assert!(ServerConfig::from(args).debug);
    }

    #[test]
    fn test_optional_flags() {
        let args = Args::try_parse_from([
            "server",
            "--port",
            "5000",
            "--map",
            "maps/a.txt",
            "-H",
            "127.0.0.1",
            "--poll-timeout-ms",
            "20",
            "--max-players",
            "2",
        ])
        .unwrap();

        let config = ServerConfig::from(args);
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.poll_timeout, Duration::from_millis(20));
        assert_eq!(config.max_players, 2);
    }

    #[test]
    fn test_max_players_range() {
        assert!(Args::try_parse_from(["server", "-p", "1", "-m", "m", "--max-players", "1"]).is_err());
        assert!(
            Args::try_parse_from(["server", "-p", "1", "-m", "m", "--max-players", "256"]).is_err()
        );
    }

    #[test]
    fn test_invalid_host() {
        let config = ServerConfig {
            host: "not-an-ip".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.bind_addr(),
            Err(ServerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_load_missing_map() {
        let config = ServerConfig {
            map_path: PathBuf::from("/no/such/level.txt"),
            ..ServerConfig::default()
        };
        assert!(matches!(config.load_map(), Err(ServerError::Map(_))));
    }
}
