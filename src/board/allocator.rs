use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::ItemId;
use crate::store::StoreError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("no free id after {attempts} attempts (last tried {last_attempted})")]
    Exhausted {
        last_attempted: ItemId,
        attempts: u32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sequential id allocator. Candidates advance linearly from one snapshot of
/// the existing ids; the snapshot is never re-read between attempts.
#[derive(Debug, Clone, Copy)]
pub struct IdAllocator {
    width: usize,
    max_attempts: u32,
}

impl IdAllocator {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// First candidate: one past the largest numeric id. Non-numeric ids are
    /// ignored.
    pub fn first_candidate(existing: &[ItemId]) -> u64 {
        existing
            .iter()
            .filter_map(ItemId::number)
            .max()
            .map(|max| max + 1)
            .unwrap_or(1)
    }

    /// Run `insert` with successive candidate ids until one succeeds.
    /// Only unique violations are retried; every other error aborts at once.
    pub async fn allocate<T, F, Fut>(
        &self,
        existing: &[ItemId],
        mut insert: F,
    ) -> Result<T, AllocationError>
    where
        F: FnMut(ItemId) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let start = Self::first_candidate(existing);
        let mut last_attempted = ItemId::from_number(start, self.width);

        for attempt in 0..self.max_attempts {
            let candidate = ItemId::from_number(start + u64::from(attempt), self.width);
            last_attempted = candidate.clone();

            match insert(candidate.clone()).await {
                Ok(value) => {
                    debug!(id = %candidate, attempt, "Allocated work item id");
                    return Ok(value);
                }
                Err(err) if err.is_unique_violation() => {
                    warn!(id = %candidate, attempt, "Id collision, trying next candidate");
                }
                Err(err) => return Err(AllocationError::Store(err)),
            }
        }

        Err(AllocationError::Exhausted {
            last_attempted,
            attempts: self.max_attempts,
        })
    }
}
