use anyhow::{Context, Result};
use tracing::info;

use crate::cli::AppContext;
use crate::coordinator::{DriveResult, RunDriver};
use crate::endpoints::{advance, AdvanceRequest};
use crate::events::{channel, write_ndjson, DEFAULT_STREAM_CAPACITY};
use crate::runs::RunId;

pub struct AdvanceCommand {
    pub run_id: String,
    pub budget_ms: Option<u64>,
    pub follow: bool,
}

impl AdvanceCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let coordinator = ctx.coordinator()?;
        let run_id = RunId::new(self.run_id.clone());

        if !self.follow {
            let response = advance(
                &coordinator,
                &AdvanceRequest {
                    run_id,
                    budget_ms: self.budget_ms,
                },
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(());
        }

        let (sink, stream) = channel(DEFAULT_STREAM_CAPACITY);
        let driver = RunDriver::spawn(coordinator, run_id, sink);
        let mut writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            write_ndjson(stream, &mut stdout).await
        });

        let mut written = None;
        tokio::select! {
            result = &mut writer => written = Some(result),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping after the current slice");
                driver.stop();
            }
        }

        let result = driver.join().await?;
        let written = match written {
            Some(result) => result,
            None => writer.await,
        };
        let records = written.context("Stage writer task failed")??;

        match result {
            DriveResult::Done(outcome) => {
                eprintln!("✅ Run {} is {} ({records} records)", outcome.run.run_id, outcome.run.status);
            }
            DriveResult::Stopped(outcome) => {
                eprintln!(
                    "⏸️  Stopped polling run {}; the job keeps running. Resume with 'lanekeeper advance {}'",
                    outcome.run.run_id, outcome.run.run_id
                );
            }
        }
        Ok(())
    }
}
