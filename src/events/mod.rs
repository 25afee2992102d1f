// Ordered progress records for one coordinator invocation

pub mod stage;
pub mod stream;
pub mod tracker;

use thiserror::Error;

pub use stage::{Stage, StageEvent};
pub use stream::{channel, write_ndjson, StageSink, StageStream, DEFAULT_STREAM_CAPACITY};
pub use tracker::StageTracker;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stage {to} cannot follow {from:?}")]
    OutOfOrder { from: Option<Stage>, to: Stage },

    #[error("failed to encode stage event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write stage event: {0}")]
    Io(#[from] std::io::Error),
}
