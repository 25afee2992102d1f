use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::board::{BoardLayout, BoardStateMachine, IdAllocator};
use crate::config::LanekeeperConfig;
use crate::coordinator::{BudgetPolicy, RunCoordinator};
use crate::external::HttpExecutionService;
use crate::persistence::FileJournal;
use crate::runs::AgentRegistry;
use crate::signals::SignalTargets;
use crate::store::{ContentStore, SharedStore};
use crate::sync::{DownstreamSync, GitHubIssueSync};

pub mod commands;

#[derive(Parser)]
#[command(name = "lanekeeper")]
#[command(about = "Ticket pipeline orchestration with resumable external agent runs")]
#[command(long_about = "Lanekeeper moves work items across a column board and drives slow external \
                       agent jobs (implementation, QA, review) in bounded, resumable slices. \
                       Start with 'lanekeeper create' and 'lanekeeper launch'.")]
pub struct Cli {
    /// Configuration file to use instead of lanekeeper.toml
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a work item with the next free id
    Create {
        /// Item title
        title: String,
        /// Item body
        #[arg(long, default_value = "", help = "Markdown body of the item")]
        body: String,
        /// Column to create the item in (defaults to the first column)
        #[arg(long, help = "Column id; defaults to the first registered column")]
        column: Option<String>,
        /// Linked external reference such as github#123
        #[arg(long, help = "External reference used by downstream sync, e.g. github#123")]
        external_ref: Option<String>,
    },
    /// Move a work item, subject to the column's transition rules
    Move {
        /// Item id, e.g. 0010
        item: String,
        /// Target column id
        column: String,
        /// What caused the move
        #[arg(long, default_value = "manual", help = "Trigger: manual, agent-start or agent-complete")]
        trigger: String,
    },
    /// Show the board, one column at a time
    Board {
        /// Only show this column
        #[arg(long, help = "Restrict output to a single column")]
        column: Option<String>,
    },
    /// Start an agent run on an item and stream its stages as NDJSON
    Launch {
        /// Item id, e.g. 0010
        item: String,
        /// Agent kind: implementation, qa or review
        #[arg(long, default_value = "implementation")]
        kind: String,
        /// Instruction passed to the agent
        #[arg(long, default_value = "")]
        instruction: String,
        /// Caller identity recorded on the run
        #[arg(long, default_value = "cli")]
        caller: String,
        /// Time budget for this invocation in milliseconds
        #[arg(long, help = "Budget in ms, clamped to the configured bounds")]
        budget_ms: Option<u64>,
        /// Keep advancing until the run is terminal
        #[arg(long, help = "Keep advancing the run until it finishes or fails")]
        follow: bool,
    },
    /// Continue a run for one budget and print the JSON outcome
    Advance {
        /// Run id returned by launch
        run_id: String,
        /// Time budget for this invocation in milliseconds
        #[arg(long)]
        budget_ms: Option<u64>,
        /// Drive the run to completion in the background until Ctrl-C
        #[arg(long, help = "Keep advancing until terminal; Ctrl-C stops polling only")]
        follow: bool,
    },
    /// Apply a board signal such as {"type":"WORK_STARTED","itemId":"0010"}
    Signal {
        /// JSON-encoded signal
        payload: String,
    },
    /// Show journaled status and conversation per agent instance
    Status {
        /// Only show this agent kind
        #[arg(long)]
        kind: Option<String>,
        /// Show full transcripts
        #[arg(long, short = 'v')]
        verbose: bool,
    },
}

/// Everything a command needs, built once from configuration.
pub struct AppContext {
    pub config: LanekeeperConfig,
    pub layout: Arc<BoardLayout>,
    pub store: SharedStore,
    pub agents: Arc<AgentRegistry>,
    pub journal: FileJournal,
}

impl AppContext {
    pub fn new(config: LanekeeperConfig, store: SharedStore) -> Result<Self> {
        let layout = Arc::new(
            BoardLayout::from_config(&config.board).context("Invalid board configuration")?,
        );
        let agents = Arc::new(
            AgentRegistry::from_config(&config.agents, &layout)
                .context("Invalid agent configuration")?,
        );
        let journal = FileJournal::from_config(&config.journal);
        Ok(Self {
            config,
            layout,
            store,
            agents,
            journal,
        })
    }

    pub fn board(&self) -> BoardStateMachine<dyn ContentStore> {
        BoardStateMachine::new(Arc::clone(&self.layout), Arc::clone(&self.store)).with_ids(
            IdAllocator::new(self.config.project.id_width),
            self.config.project.display_prefix.clone(),
        )
    }

    pub fn signal_targets(&self) -> Result<SignalTargets> {
        SignalTargets::from_config(&self.config.signals, &self.layout)
            .context("Invalid signal configuration")
    }

    /// Coordinator wired to the HTTP execution service and, when configured,
    /// GitHub issue sync.
    pub fn coordinator(&self) -> Result<Arc<RunCoordinator>> {
        let service = HttpExecutionService::from_config(&self.config.service)
            .context("Failed to build execution service client")?;
        let mut coordinator = RunCoordinator::new(
            Arc::clone(&self.store),
            self.board(),
            Arc::clone(&self.agents),
            Arc::new(service),
            self.config.service.clone(),
            BudgetPolicy::from_config(&self.config.coordinator),
        );
        if let Some(github) = &self.config.github {
            let sync: Arc<dyn DownstreamSync> = Arc::new(
                GitHubIssueSync::from_config(github).context("Failed to set up GitHub sync")?,
            );
            coordinator = coordinator.with_sync(sync);
        }
        Ok(Arc::new(coordinator))
    }
}
