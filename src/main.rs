//! lkml-patchwatch CLI entry point.

use clap::{Parser, Subcommand};
use lkml_patchwatch::config::Config;
use lkml_patchwatch::platform::MultiPlatformSender;
use lkml_patchwatch::scheduler::Scheduler;
use lkml_patchwatch::store::Store;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lkml-patchwatch", version)]
#[command(about = "Polls kernel mailing-list feeds and posts patch cards to chat")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging regardless of RUST_LOG.
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run continuously on the configured interval (default).
    Run,
    /// Run exactly one monitoring cycle and exit.
    Once,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(cli.command.unwrap_or(Command::Run)))
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("lkml_patchwatch=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(command: Command) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::info!(
        subsystems = ?config.manual_subsystems,
        interval_secs = config.monitoring_interval_secs,
        "starting lkml-patchwatch"
    );

    let store = Store::connect(&config.database_url()).await?;
    let sender = MultiPlatformSender::from_config(&config.platforms)?;
    tracing::info!(platform = sender.platform_name(), "chat platform configured");

    let scheduler = Arc::new(Scheduler::new(&config, store, sender));

    match command {
        Command::Once => {
            scheduler.run_once().await?;
        }
        Command::Run => {
            Arc::clone(&scheduler).start().await;
            tracing::info!("monitoring loop started, press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            scheduler.stop().await;
        }
    }

    Ok(())
}
