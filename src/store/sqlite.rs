use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, SqlitePool};
use tracing::info;

use super::{check_run_patch, RunStore, StoreError, WorkItemStore};
use crate::board::{ColumnId, ItemId, WorkItem};
use crate::config::DatabaseConfig;
use crate::external::ErrorCategory;
use crate::runs::{AgentKind, ExternalJobId, RunId, RunPatch, RunRecord, RunStatus};

/// SQLite-backed content store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                if db.message().contains("work_items.origin") {
                    StoreError::DuplicateOrigin(db.message().to_string())
                } else {
                    StoreError::UniqueViolation(db.message().to_string())
                }
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl SqliteStore {
    /// Open the database, creating it and running migrations when asked
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        if !sqlx::Sqlite::database_exists(&config.url).await? {
            info!("Creating database at {}", config.url);
            sqlx::Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        if config.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    /// In-memory database with the schema applied (single connection)
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            auto_migrate: true,
        })
        .await
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_time).transpose()
}

fn item_from_row(row: &SqliteRow) -> Result<WorkItem, StoreError> {
    let position: i64 = row.try_get("position")?;
    Ok(WorkItem {
        id: ItemId::new(row.try_get::<String, _>("id")?),
        display_id: row.try_get("display_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        column: ColumnId::new(row.try_get::<String, _>("column_id")?),
        position: u32::try_from(position)
            .map_err(|_| StoreError::Backend(format!("bad position {position}")))?,
        moved_at: parse_time(&row.try_get::<String, _>("moved_at")?)?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        origin: row.try_get("origin")?,
        external_ref: row.try_get("external_ref")?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord, StoreError> {
    let kind: String = row.try_get("agent_kind")?;
    let status: String = row.try_get("status")?;
    let category: Option<String> = row.try_get("error_category")?;
    Ok(RunRecord {
        run_id: RunId::new(row.try_get::<String, _>("run_id")?),
        item_id: ItemId::new(row.try_get::<String, _>("item_id")?),
        agent_kind: kind.parse::<AgentKind>().map_err(StoreError::Backend)?,
        status: status.parse::<RunStatus>().map_err(StoreError::Backend)?,
        instruction: row.try_get("instruction")?,
        caller: row.try_get("caller")?,
        external_job_id: row
            .try_get::<Option<String>, _>("external_job_id")?
            .map(ExternalJobId::new),
        last_error: row.try_get("last_error")?,
        error_category: category
            .map(|c| c.parse::<ErrorCategory>())
            .transpose()
            .map_err(StoreError::Backend)?,
        summary: row.try_get("summary")?,
        artifact: row.try_get("artifact")?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
        finished_at: parse_opt_time(row.try_get("finished_at")?)?,
    })
}

#[async_trait]
impl WorkItemStore for SqliteStore {
    async fn insert_item(&self, item: WorkItem) -> Result<WorkItem, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO work_items
                (id, display_id, title, body, column_id, position, moved_at, created_at, origin, external_ref)
            VALUES
                (?1, ?2, ?3, ?4, ?5,
                 (SELECT COUNT(*) FROM work_items WHERE column_id = ?5),
                 ?6, ?7, ?8, ?9)
            RETURNING *
            "#,
        )
        .bind(item.id.as_str())
        .bind(&item.display_id)
        .bind(&item.title)
        .bind(&item.body)
        .bind(item.column.as_str())
        .bind(item.moved_at.to_rfc3339())
        .bind(item.created_at.to_rfc3339())
        .bind(&item.origin)
        .bind(&item.external_ref)
        .fetch_one(&self.pool)
        .await?;

        item_from_row(&row)
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<WorkItem>, StoreError> {
        let row = sqlx::query("SELECT * FROM work_items WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self) -> Result<Vec<WorkItem>, StoreError> {
        let rows = sqlx::query("SELECT * FROM work_items ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn move_if_in_column(
        &self,
        id: &ItemId,
        expected: &ColumnId,
        target: &ColumnId,
        moved_at: DateTime<Utc>,
    ) -> Result<Option<WorkItem>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE work_items
            SET column_id = ?3,
                position = (SELECT COUNT(*) FROM work_items WHERE column_id = ?3),
                moved_at = ?4
            WHERE id = ?1 AND column_id = ?2
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(expected.as_str())
        .bind(target.as_str())
        .bind(moved_at.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => item_from_row(&row).map(Some),
            None => {
                if self.get_item(id).await?.is_none() {
                    return Err(StoreError::item_not_found(id));
                }
                Ok(None)
            }
        }
    }

    async fn update_body_if(
        &self,
        id: &ItemId,
        expected: &str,
        body: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE work_items SET body = ?3 WHERE id = ?1 AND body = ?2")
            .bind(id.as_str())
            .bind(expected)
            .bind(body)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            if self.get_item(id).await?.is_none() {
                return Err(StoreError::item_not_found(id));
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn find_by_origin(&self, origin: &str) -> Result<Option<WorkItem>, StoreError> {
        let row = sqlx::query("SELECT * FROM work_items WHERE origin = ?1")
            .bind(origin)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn insert_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO runs
                (run_id, item_id, agent_kind, status, instruction, caller, external_job_id,
                 last_error, error_category, summary, artifact, created_at, updated_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(run.run_id.as_str())
        .bind(run.item_id.as_str())
        .bind(run.agent_kind.as_str())
        .bind(run.status.as_str())
        .bind(&run.instruction)
        .bind(&run.caller)
        .bind(run.external_job_id.as_ref().map(|j| j.as_str().to_string()))
        .bind(&run.last_error)
        .bind(run.error_category.map(|c| c.as_str()))
        .bind(&run.summary)
        .bind(&run.artifact)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .bind(run.finished_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn find_active_run(
        &self,
        item: &ItemId,
        kind: AgentKind,
    ) -> Result<Option<RunRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE item_id = ?1 AND agent_kind = ?2 AND status NOT IN ('finished', 'failed')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(item.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn runs_for_item(&self, item: &ItemId) -> Result<Vec<RunRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM runs WHERE item_id = ?1 ORDER BY created_at ASC")
            .bind(item.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn update_run(
        &self,
        id: &RunId,
        expected: RunStatus,
        patch: &RunPatch,
    ) -> Result<Option<RunRecord>, StoreError> {
        let current = self
            .get_run(id)
            .await?
            .ok_or_else(|| StoreError::run_not_found(id))?;
        if !check_run_patch(&current, expected, patch)? {
            return Ok(None);
        }

        // The status and job id guards are repeated in the WHERE clause so a
        // concurrent writer between the read above and this update loses.
        let row = sqlx::query(
            r#"
            UPDATE runs
            SET status = COALESCE(?3, status),
                external_job_id = COALESCE(external_job_id, ?4),
                last_error = COALESCE(?5, last_error),
                error_category = COALESCE(?6, error_category),
                summary = COALESCE(?7, summary),
                artifact = COALESCE(?8, artifact),
                finished_at = COALESCE(?9, finished_at),
                updated_at = ?10
            WHERE run_id = ?1 AND status = ?2
              AND (?4 IS NULL OR external_job_id IS NULL OR external_job_id = ?4)
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(expected.as_str())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.external_job_id.as_ref().map(|j| j.as_str().to_string()))
        .bind(&patch.last_error)
        .bind(patch.error_category.map(|c| c.as_str()))
        .bind(&patch.summary)
        .bind(&patch.artifact)
        .bind(patch.finished_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(run_from_row).transpose()
    }
}
