use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::warn;

use crate::board::ItemId;
use crate::cli::AppContext;
use crate::coordinator::LaunchRequest;
use crate::endpoints::launch_and_stream;
use crate::events::write_ndjson;
use crate::runs::AgentKind;

pub struct LaunchCommand {
    pub item: String,
    pub kind: String,
    pub instruction: String,
    pub caller: String,
    pub budget_ms: Option<u64>,
    pub follow: bool,
}

impl LaunchCommand {
    /// Stream stage records to stdout as NDJSON and journal them.
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let agent_kind: AgentKind = self.kind.parse().map_err(anyhow::Error::msg)?;
        let request = LaunchRequest {
            item_id: ItemId::new(self.item.clone()),
            agent_kind,
            instruction: self.instruction.clone(),
            caller: self.caller.clone(),
            budget_ms: self.budget_ms,
        };

        let project_key = &ctx.config.project.key;
        let mut journal = ctx
            .journal
            .load(project_key)
            .await
            .context("Failed to load status journal")?;
        let limit = ctx.config.journal.progress_log_limit;

        let stream = launch_and_stream(ctx.coordinator()?, request, self.follow)
            .inspect(|event| journal.record_event(event, limit));
        let mut stdout = tokio::io::stdout();
        write_ndjson(stream, &mut stdout).await?;

        if let Err(e) = ctx.journal.save(&mut journal).await {
            warn!(project = %project_key, error = %e, "Could not save status journal");
        }
        Ok(())
    }
}
