use clap::Parser;
use log::info;
use server::config::{Args, ServerConfig};
use server::network::Server;

/// Parses the command line, loads the level and runs the server until the process exits.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    let config = ServerConfig::from(args);
    info!("Loading map from {}", config.map_path.display());
    let map = config.load_map()?;

    let server = Server::new(config, map)?;
    let listener = server.bind().await?;
    server.run(listener).await?;

    Ok(())
}
