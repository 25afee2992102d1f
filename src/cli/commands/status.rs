use anyhow::{Context, Result};
use tracing::warn;

use crate::cli::AppContext;
use crate::persistence::{
    restore, DirectoryTranscriptSource, MessageRole, NoRemoteTranscripts, TranscriptSource,
};
use crate::runs::AgentKind;

pub struct StatusCommand {
    pub kind: Option<String>,
    pub verbose: bool,
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let kind: Option<AgentKind> = self
            .kind
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(anyhow::Error::msg)?;

        let source: Box<dyn TranscriptSource> = match &ctx.config.journal.remote_transcripts {
            Some(dir) => Box::new(DirectoryTranscriptSource::new(dir)),
            None => Box::new(NoRemoteTranscripts),
        };
        let project_key = &ctx.config.project.key;
        let mut journal = restore(&ctx.journal, source.as_ref(), project_key)
            .await
            .context("Failed to restore status journal")?;

        println!("🤖 LANEKEEPER STATUS: {project_key}");
        println!("==========================");
        let mut shown = 0;
        for snapshot in journal
            .snapshots
            .iter()
            .filter(|s| kind.map_or(true, |k| s.agent_kind == k))
        {
            shown += 1;
            let status = snapshot.status.map(|s| s.as_str()).unwrap_or("unknown");
            println!();
            println!(
                "{} #{}  {}  item {}",
                snapshot.agent_kind,
                snapshot.instance,
                status,
                snapshot.item_id.as_ref().map(|i| i.as_str()).unwrap_or("-")
            );
            if let Some(run_id) = &snapshot.run_id {
                println!("   run: {run_id}");
            }
            if let Some(progress) = snapshot.progress.last() {
                println!(
                    "   last stage: {} {}",
                    progress.stage,
                    progress.detail.as_deref().unwrap_or_default()
                );
            }
            if let Some(error) = &snapshot.last_error {
                println!("   ❌ {error}");
            }
            if self.verbose {
                for message in &snapshot.transcript {
                    let who = match message.role {
                        MessageRole::User => "user",
                        MessageRole::Agent => "agent",
                        MessageRole::System => "system",
                    };
                    println!("   [{who}] {}", message.content);
                }
            } else if !snapshot.transcript.is_empty() {
                println!("   💬 {} messages (use -v to show)", snapshot.transcript.len());
            }
        }
        if shown == 0 {
            println!();
            println!("No agent activity journaled yet.");
        }

        if let Err(e) = ctx.journal.save(&mut journal).await {
            warn!(project = %project_key, error = %e, "Could not save merged journal");
        }
        Ok(())
    }
}
