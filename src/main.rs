use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

use lanekeeper::cli::commands::{
    AdvanceCommand, BoardCommand, CreateCommand, LaunchCommand, MoveCommand, SignalCommand,
    StatusCommand,
};
use lanekeeper::cli::{AppContext, Cli, Commands};
use lanekeeper::config::LanekeeperConfig;
use lanekeeper::store::{SharedStore, SqliteStore};
use lanekeeper::telemetry::init_telemetry;

fn main() -> Result<()> {
    let cli = Cli::parse();
    tokio::runtime::Runtime::new()?.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    LanekeeperConfig::load_env_file();
    let config = match &cli.config {
        Some(path) => LanekeeperConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => LanekeeperConfig::load().context("Failed to load configuration")?,
    };
    init_telemetry(&config.observability)?;

    let database = config
        .database
        .clone()
        .context("A [database] section is required to run lanekeeper")?;
    if let Some(parent) = database
        .url
        .strip_prefix("sqlite://")
        .and_then(|file| Path::new(file).parent())
        .filter(|p| !p.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let sqlite = Arc::new(
        SqliteStore::connect(&database)
            .await
            .context("Failed to open database")?,
    );
    let store: SharedStore = sqlite.clone();
    let ctx = AppContext::new(config, store)?;

    let result = match cli.command {
        Commands::Create {
            title,
            body,
            column,
            external_ref,
        } => {
            CreateCommand {
                title,
                body,
                column,
                external_ref,
            }
            .execute(&ctx)
            .await
        }
        Commands::Move {
            item,
            column,
            trigger,
        } => {
            MoveCommand {
                item,
                column,
                trigger,
            }
            .execute(&ctx)
            .await
        }
        Commands::Board { column } => BoardCommand { column }.execute(&ctx).await,
        Commands::Launch {
            item,
            kind,
            instruction,
            caller,
            budget_ms,
            follow,
        } => {
            LaunchCommand {
                item,
                kind,
                instruction,
                caller,
                budget_ms,
                follow,
            }
            .execute(&ctx)
            .await
        }
        Commands::Advance {
            run_id,
            budget_ms,
            follow,
        } => {
            AdvanceCommand {
                run_id,
                budget_ms,
                follow,
            }
            .execute(&ctx)
            .await
        }
        Commands::Signal { payload } => SignalCommand { payload }.execute(&ctx).await,
        Commands::Status { kind, verbose } => StatusCommand { kind, verbose }.execute(&ctx).await,
    };

    sqlite.shutdown().await;
    result
}
