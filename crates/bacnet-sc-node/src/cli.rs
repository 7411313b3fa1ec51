use std::path::PathBuf;

use clap::Parser;
use tokio::select;
use tokio::signal::unix::{self, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Targets, layer::Layer, prelude::*, EnvFilter};

use crate::config::NodeConfig;
use crate::node::Node;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub enum Cli {
    /// Run the datalink node, see `run --help` for more information
    Run(RunArgs),
}

#[derive(Parser)]
pub struct RunArgs {
    /// Path to the node's TOML configuration file
    #[arg(short, long, default_value = "bacnet-sc-node.toml")]
    pub config: PathBuf,
}

impl Cli {
    pub async fn exec(self) -> eyre::Result<()> {
        match self {
            Self::Run(args) => run_node(args).await,
        }
    }
}

pub async fn run() -> eyre::Result<()> {
    Cli::parse().exec().await
}

async fn run_node(args: RunArgs) -> eyre::Result<()> {
    let config = NodeConfig::from_path(args.config)?;

    let level = config.logger.level;
    let level_filter: LevelFilter = level.into();
    let filter = Targets::new()
        .with_target("bacnet_sc_core", level_filter)
        .with_target("bacnet_sc_node", level_filter)
        .with_default(level_filter);
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(env_filter)
        .try_init()?;

    tracing::info!(%level, "starting bacnet-sc-node");

    let node = Node::new(config)?;
    node.run()?;

    let mut sigterm =
        unix::signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint =
        unix::signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    select! {
        _ = node.cancelled() => {
            tracing::info!("node run loop signalled cancellation");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT");
        }
    }

    node.shutdown().await;

    Ok(())
}
