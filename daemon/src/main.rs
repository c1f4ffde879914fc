//! Opal daemon — entry point for running an Opal node.

use clap::Parser;
use opal_node::{init_logging, LogFormat, Node, NodeConfig};

#[derive(Parser)]
#[command(name = "opal-daemon", about = "Opal blockchain node daemon")]
struct Cli {
    /// Path to a TOML configuration file. CLI flags override its values.
    #[arg(long)]
    config: Option<String>,

    /// Network to join: "mainnet" or "testnet".
    #[arg(long, env = "OPAL_NETWORK")]
    network: Option<String>,

    /// P2P listen port.
    #[arg(long, env = "OPAL_P2P_PORT")]
    port: Option<String>,

    /// Storage backend: "lmdb" or "memory".
    #[arg(long, env = "OPAL_DB_DRIVER")]
    db_driver: Option<String>,

    /// Storage directory.
    #[arg(long, env = "OPAL_DB_DIR")]
    db_dir: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "OPAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable score generation (bidding).
    #[arg(long, env = "OPAL_GENERATE")]
    generate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => NodeConfig::from_toml_file(path)?,
        None => NodeConfig::default(),
    };

    if let Some(network) = cli.network {
        config.general.network = network;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(driver) = cli.db_driver {
        config.database.driver = driver;
    }
    if let Some(dir) = cli.db_dir {
        config.database.dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.logger.level = level;
    }
    if cli.generate {
        config.consensus.generate = true;
    }

    init_logging(
        LogFormat::from_config(&config.logger.format),
        &config.logger.level,
    );

    tracing::info!(
        network = %config.general.network,
        port = %config.network.port,
        driver = %config.database.driver,
        "starting opal node"
    );

    let node = Node::new(config).await?;
    node.run().await?;

    tracing::info!("node stopped");
    Ok(())
}
