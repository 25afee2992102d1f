use chrono::Utc;
use fd_lock::RwLock;
use rand::Rng;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::snapshot::{CheckpointMetadata, ProjectJournal, JOURNAL_VERSION};
use super::PersistenceError;
use crate::config::JournalConfig;

/// Journal files on local disk, one per project key.
#[derive(Debug, Clone)]
pub struct FileJournal {
    directory: PathBuf,
}

fn file_stem(project_key: &str) -> String {
    project_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl FileJournal {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn from_config(config: &JournalConfig) -> Self {
        Self::new(&config.directory)
    }

    pub fn journal_path(&self, project_key: &str) -> PathBuf {
        self.directory.join(format!("{}.journal.json", file_stem(project_key)))
    }

    pub fn lock_path(&self, project_key: &str) -> PathBuf {
        self.directory.join(format!("{}.lock", file_stem(project_key)))
    }

    /// Load the journal for a project; an absent file is an empty journal.
    pub async fn load(&self, project_key: &str) -> Result<ProjectJournal, PersistenceError> {
        let path = self.journal_path(project_key);
        if !tokio::fs::try_exists(&path).await? {
            debug!(project = project_key, file = ?path, "No journal yet");
            return Ok(ProjectJournal::new(project_key));
        }

        let contents = tokio::fs::read_to_string(&path).await?;
        let journal: ProjectJournal = serde_json::from_str(&contents)?;
        if journal.version != JOURNAL_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: JOURNAL_VERSION.to_string(),
                found: journal.version,
            });
        }
        if journal.project_key != project_key {
            return Err(PersistenceError::Corrupt {
                reason: format!(
                    "journal at {} belongs to project '{}'",
                    path.display(),
                    journal.project_key
                ),
            });
        }
        Ok(journal)
    }

    /// Write atomically under an exclusive lock. Returns the checkpoint id.
    pub async fn save(&self, journal: &mut ProjectJournal) -> Result<String, PersistenceError> {
        let checkpoint_id = format!("{}_{}", Utc::now().timestamp(), rand::rng().random::<u32>());
        journal.checkpoint = Some(CheckpointMetadata {
            checkpoint_id: checkpoint_id.clone(),
            hostname: hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            saved_at: Utc::now(),
        });
        let serialized = serde_json::to_string_pretty(journal)?;

        let directory = self.directory.clone();
        let path = self.journal_path(&journal.project_key);
        let lock_path = self.lock_path(&journal.project_key);
        tokio::task::spawn_blocking(move || write_locked(&directory, &lock_path, &path, &serialized))
            .await
            .map_err(|e| PersistenceError::Lock {
                reason: format!("journal writer task failed: {e}"),
            })??;

        info!(
            project = %journal.project_key,
            checkpoint_id = %checkpoint_id,
            snapshots = journal.snapshots.len(),
            "Journal saved"
        );
        Ok(checkpoint_id)
    }
}

fn write_locked(
    directory: &Path,
    lock_path: &Path,
    path: &Path,
    serialized: &str,
) -> Result<(), PersistenceError> {
    fs::create_dir_all(directory)?;
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.try_write().map_err(|_| PersistenceError::Locked {
        path: lock_path.display().to_string(),
    })?;

    // Write to temporary file first, then rename (atomic operation)
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, serialized)?;
    fs::rename(&temp, path)?;
    Ok(())
}
