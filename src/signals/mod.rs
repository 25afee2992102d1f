// Typed board signals from an embedding UI, applied as guarded moves

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::board::{BoardError, BoardStateMachine, ColumnId, ItemId, MoveOutcome, Trigger};
use crate::config::{ConfigError, SignalConfig};
use crate::store::ContentStore;

const BUS_CAPACITY: usize = 256;

/// Message contract shared with the board UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoardSignal {
    #[serde(rename_all = "camelCase")]
    WorkStarted { item_id: ItemId },
    #[serde(rename_all = "camelCase")]
    WorkCompleted { item_id: ItemId },
}

impl BoardSignal {
    pub fn item_id(&self) -> &ItemId {
        match self {
            BoardSignal::WorkStarted { item_id } | BoardSignal::WorkCompleted { item_id } => item_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<BoardSignal>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publish to every subscriber. Returns how many received it.
    pub fn publish(&self, signal: BoardSignal) -> usize {
        self.sender.send(signal).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardSignal> {
        self.sender.subscribe()
    }
}

/// Resolved signal targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTargets {
    pub started: ColumnId,
    pub completed: ColumnId,
}

impl SignalTargets {
    pub fn from_config(
        config: &SignalConfig,
        layout: &crate::board::BoardLayout,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            started: layout.require(&config.work_started_column, "signals.work_started_column")?,
            completed: layout.require(&config.work_completed_column, "signals.work_completed_column")?,
        })
    }
}

/// Applies signals as guarded moves. Duplicate delivery is a no-op.
pub struct SignalConsumer {
    board: BoardStateMachine<dyn ContentStore>,
    targets: SignalTargets,
}

impl SignalConsumer {
    pub fn new(board: BoardStateMachine<dyn ContentStore>, targets: SignalTargets) -> Self {
        Self { board, targets }
    }

    pub async fn apply(&self, signal: &BoardSignal) -> Result<MoveOutcome, BoardError> {
        let (target, trigger) = match signal {
            BoardSignal::WorkStarted { .. } => (&self.targets.started, Trigger::AgentStart),
            BoardSignal::WorkCompleted { .. } => (&self.targets.completed, Trigger::AgentComplete),
        };
        self.board.move_work_item(signal.item_id(), target, trigger).await
    }

    /// Consume the bus until it closes.
    pub fn spawn(self, mut receiver: broadcast::Receiver<BoardSignal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(signal) => match self.apply(&signal).await {
                        Ok(MoveOutcome::Moved(item)) => {
                            info!(item = %item.id, column = %item.column, "Applied board signal")
                        }
                        Ok(MoveOutcome::Unchanged { .. }) => {}
                        Err(err) => warn!(item = %signal.item_id(), error = %err, "Board signal rejected"),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Signal consumer lagged; signals dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
