use anyhow::Result;

use crate::board::{ColumnId, ItemId, MoveOutcome, Trigger, UnchangedReason};
use crate::cli::AppContext;

pub struct MoveCommand {
    pub item: String,
    pub column: String,
    pub trigger: String,
}

impl MoveCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let trigger: Trigger = self.trigger.parse().map_err(anyhow::Error::msg)?;
        let outcome = ctx
            .board()
            .move_work_item(
                &ItemId::new(self.item.clone()),
                &ColumnId::new(self.column.clone()),
                trigger,
            )
            .await?;

        match outcome {
            MoveOutcome::Moved(item) => {
                println!("✅ {} moved to {} ({})", item.display_id, item.column, trigger);
            }
            MoveOutcome::Unchanged {
                item_id,
                column,
                reason,
            } => {
                let why = match reason {
                    UnchangedReason::AlreadyInTarget => "already there",
                    UnchangedReason::NotPermitted => "no rule allows this move from its current column",
                    UnchangedReason::LostRace => "it was moved by someone else first",
                };
                println!("⏭️  {item_id} left in place (target {column}): {why}");
            }
        }
        Ok(())
    }
}
