// Cross-session status and transcript journal

pub mod journal;
pub mod merge;
pub mod snapshot;

use thiserror::Error;

pub use journal::FileJournal;
pub use merge::{
    merge_remote, restore, DirectoryTranscriptSource, MergeReport, NoRemoteTranscripts,
    RemoteTranscript, TranscriptSource,
};
pub use snapshot::{
    CheckpointMetadata, MessageRole, ProgressEntry, ProjectJournal, StatusSnapshot,
    TranscriptMessage,
};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Journal corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Journal is locked by another writer: {path}")]
    Locked { path: String },

    #[error("Lock acquisition failed: {reason}")]
    Lock { reason: String },
}
