use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::board::Trigger;
use crate::runs::AgentKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("column '{column}' referenced by {context} is not registered")]
    UnknownColumn { column: String, context: String },

    #[error("column '{0}' is registered more than once")]
    DuplicateColumn(String),

    #[error("agent kind '{0}' is configured more than once")]
    DuplicateAgentKind(AgentKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Main configuration structure for lanekeeper
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LanekeeperConfig {
    /// Project identity and id formatting
    pub project: ProjectConfig,
    /// Pipeline columns and their transition rules
    pub board: BoardConfig,
    /// Per agent kind behaviour
    pub agents: Vec<AgentKindConfig>,
    /// External execution service
    pub service: ServiceConfig,
    /// Run coordinator timing
    pub coordinator: CoordinatorConfig,
    /// Status/conversation journal
    pub journal: JournalConfig,
    /// Board signal targets
    pub signals: SignalConfig,
    /// Downstream GitHub synchronization (optional)
    pub github: Option<GitHubSyncConfig>,
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Project identity; keys the journal
    pub key: String,
    /// Prefix for display ids ("LK" gives "LK-0007")
    pub display_prefix: String,
    /// Zero-padding width of numeric ids
    pub id_width: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoardConfig {
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColumnConfig {
    pub id: String,
    pub label: String,
    /// Triggers that may move an item into this column, and from where
    pub rules: Vec<TransitionRuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransitionRuleConfig {
    pub trigger: Trigger,
    /// Allowed source columns; "*" admits every registered column
    pub from: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentKindConfig {
    pub kind: AgentKind,
    /// Column an item moves into (trigger agent-start) when a run is created
    pub start_column: Option<String>,
    /// Column an item moves into (trigger agent-complete) when a run finishes
    pub completion_column: String,
    /// Turn suggestions in the run summary into follow-up tickets
    pub creates_follow_ups: bool,
    /// Repository override for this kind
    pub repository: Option<String>,
    /// Opening line of the task brief sent to the service
    pub prompt_lead: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub base_url: String,
    /// API key (can be set via LANEKEEPER_API_KEY)
    pub api_key: Option<String>,
    pub default_repository: Option<String>,
    pub default_ref: String,
    /// Client-side request rate limit
    pub requests_per_second: u32,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    pub default_budget_ms: u64,
    pub min_budget_ms: u64,
    pub max_budget_ms: u64,
    pub poll_interval_ms: u64,
    /// A launch without a job id older than this is treated as interrupted
    pub launch_stale_after_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JournalConfig {
    pub directory: String,
    /// Bound on the recent-progress log kept per instance
    pub progress_log_limit: usize,
    /// Directory holding exported transcripts from the central store
    #[serde(default)]
    pub remote_transcripts: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalConfig {
    pub work_started_column: String,
    pub work_completed_column: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubSyncConfig {
    /// GitHub API token (can be set via GITHUB_TOKEN)
    pub token: Option<String>,
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

fn rule(trigger: Trigger, from: &[&str]) -> TransitionRuleConfig {
    TransitionRuleConfig {
        trigger,
        from: from.iter().map(|c| c.to_string()).collect(),
    }
}

fn column(id: &str, label: &str, mut rules: Vec<TransitionRuleConfig>) -> ColumnConfig {
    // Humans may always drag a card anywhere; the move is still guarded.
    rules.push(rule(Trigger::Manual, &["*"]));
    ColumnConfig {
        id: id.to_string(),
        label: label.to_string(),
        rules,
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            columns: vec![
                column("ToDo", "To Do", vec![]),
                column("Doing", "Doing", vec![rule(Trigger::AgentStart, &["ToDo"])]),
                column("QA", "QA", vec![rule(Trigger::AgentComplete, &["Doing"])]),
                column("Review", "Review", vec![rule(Trigger::AgentComplete, &["QA"])]),
                column(
                    "Done",
                    "Done",
                    vec![rule(Trigger::AgentComplete, &["QA", "Review"])],
                ),
            ],
        }
    }
}

pub fn default_agents() -> Vec<AgentKindConfig> {
    vec![
        AgentKindConfig {
            kind: AgentKind::Implementation,
            start_column: Some("Doing".to_string()),
            completion_column: "QA".to_string(),
            creates_follow_ups: false,
            repository: None,
            prompt_lead: "Implement the following ticket.".to_string(),
        },
        AgentKindConfig {
            kind: AgentKind::Qa,
            start_column: None,
            completion_column: "Review".to_string(),
            creates_follow_ups: false,
            repository: None,
            prompt_lead: "Verify the acceptance criteria of the following ticket.".to_string(),
        },
        AgentKindConfig {
            kind: AgentKind::Review,
            start_column: None,
            completion_column: "Done".to_string(),
            creates_follow_ups: true,
            repository: None,
            prompt_lead: "Review the work delivered for the following ticket. \
                          List follow-up work under a 'Suggestions' heading."
                .to_string(),
        },
    ]
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_budget_ms: 25_000,
            min_budget_ms: 1_000,
            max_budget_ms: 55_000,
            poll_interval_ms: 4_000,
            launch_stale_after_seconds: 120,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            directory: ".lanekeeper/journal".to_string(),
            progress_log_limit: 50,
            remote_transcripts: None,
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            work_started_column: "Doing".to_string(),
            work_completed_column: "QA".to_string(),
        }
    }
}

impl Default for LanekeeperConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                key: "default".to_string(),
                display_prefix: "LK".to_string(),
                id_width: crate::board::types::DEFAULT_ID_WIDTH,
            },
            board: BoardConfig::default(),
            agents: default_agents(),
            service: ServiceConfig {
                base_url: "https://api.example.invalid".to_string(),
                api_key: None, // Will be read from env var
                default_repository: None,
                default_ref: "main".to_string(),
                requests_per_second: 2,
                request_timeout_seconds: 20,
            },
            coordinator: CoordinatorConfig::default(),
            journal: JournalConfig::default(),
            signals: SignalConfig::default(),
            github: None,
            database: Some(DatabaseConfig {
                url: "sqlite://.lanekeeper/lanekeeper.db".to_string(),
                max_connections: 5,
                auto_migrate: true,
            }),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl LanekeeperConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (lanekeeper.toml, .lanekeeper-rc)
    /// 3. Environment variables (prefixed with LANEKEEPER__)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new("lanekeeper.toml").exists() {
            builder = builder.add_source(File::with_name("lanekeeper"));
        }

        if Path::new(".lanekeeper-rc").exists() {
            builder = builder.add_source(File::with_name(".lanekeeper-rc").format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("LANEKEEPER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: LanekeeperConfig = builder.build()?.try_deserialize()?;
        loaded.apply_secret_fallbacks();
        Ok(loaded)
    }

    /// Load from an explicit file on top of the defaults (no environment)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let loaded: LanekeeperConfig = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path.as_ref()).format(config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(loaded)
    }

    fn apply_secret_fallbacks(&mut self) {
        if self.service.api_key.is_none() {
            if let Ok(key) = std::env::var("LANEKEEPER_API_KEY") {
                self.service.api_key = Some(key);
            }
        }

        if let Some(github) = self.github.as_mut() {
            if github.token.is_none() {
                if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                    github.token = Some(token);
                }
            }
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() {
        if Path::new(".env").exists() {
            match dotenvy::dotenv() {
                Ok(_) => tracing::info!("Loaded environment variables from .env file"),
                Err(e) => tracing::warn!(error = %e, "Failed to read .env file"),
            }
        }
    }

    pub fn agent(&self, kind: AgentKind) -> Option<&AgentKindConfig> {
        self.agents.iter().find(|a| a.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_board_has_pipeline_columns() {
        let config = LanekeeperConfig::default();
        let ids: Vec<&str> = config.board.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["ToDo", "Doing", "QA", "Review", "Done"]);
        assert_eq!(config.coordinator.default_budget_ms, 25_000);
        assert!(config.agent(AgentKind::Review).unwrap().creates_follow_ups);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lanekeeper.toml");

        let mut config = LanekeeperConfig::default();
        config.project.key = "acme-board".to_string();
        config.coordinator.poll_interval_ms = 1_500;
        config.save_to_file(&path).unwrap();

        let reloaded = LanekeeperConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded.project.key, "acme-board");
        assert_eq!(reloaded.coordinator.poll_interval_ms, 1_500);
        assert_eq!(reloaded.board.columns.len(), 5);
    }
}
