use anyhow::{Context, Result};

use crate::board::MoveOutcome;
use crate::cli::AppContext;
use crate::signals::{BoardSignal, SignalConsumer};

pub struct SignalCommand {
    pub payload: String,
}

impl SignalCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let signal: BoardSignal =
            serde_json::from_str(&self.payload).context("Signal is not a valid board signal")?;
        let consumer = SignalConsumer::new(ctx.board(), ctx.signal_targets()?);

        match consumer.apply(&signal).await? {
            MoveOutcome::Moved(item) => println!("✅ {} moved to {}", item.display_id, item.column),
            MoveOutcome::Unchanged { item_id, .. } => {
                println!("⏭️  {item_id} unchanged; signal already applied or not permitted")
            }
        }
        Ok(())
    }
}
