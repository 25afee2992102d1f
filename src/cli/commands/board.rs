use anyhow::Result;

use crate::cli::AppContext;

pub struct BoardCommand {
    pub column: Option<String>,
}

impl BoardCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let board = ctx.board();
        let mut shown = 0;

        for column in ctx.layout.columns() {
            if let Some(only) = &self.column {
                if column.id.as_str() != only {
                    continue;
                }
            }
            shown += 1;

            let items = board.column_items(&column.id).await?;
            println!("📋 {} ({})", column.label, items.len());
            println!("────────────────────");
            if items.is_empty() {
                println!("   (empty)");
            }
            for item in items {
                println!("   {}  {}", item.display_id, item.title);
            }
            println!();
        }

        if shown == 0 {
            if let Some(only) = &self.column {
                anyhow::bail!("Column '{only}' is not registered");
            }
        }
        Ok(())
    }
}
