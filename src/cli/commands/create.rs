use anyhow::{Context, Result};

use crate::board::{ColumnId, NewWorkItem};
use crate::cli::AppContext;

pub struct CreateCommand {
    pub title: String,
    pub body: String,
    pub column: Option<String>,
    pub external_ref: Option<String>,
}

impl CreateCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let column = match &self.column {
            Some(column) => ColumnId::new(column.clone()),
            None => ctx
                .layout
                .first_column()
                .cloned()
                .context("The board has no columns")?,
        };

        let mut new_item = NewWorkItem::new(self.title.clone(), self.body.clone(), column);
        if let Some(external_ref) = &self.external_ref {
            new_item = new_item.with_external_ref(external_ref.clone());
        }

        let item = ctx
            .board()
            .create_item(new_item)
            .await
            .context("Failed to create work item")?;
        println!("✅ Created {} '{}' in {}", item.display_id, item.title, item.column);
        Ok(())
    }
}
