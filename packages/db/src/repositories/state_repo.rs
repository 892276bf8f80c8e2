//! Coordinator state repository: one durable record per coordinator instance.

use queue_core::QueueState;
use serde::{Deserialize, Serialize};

use crate::{DbError, get_db};

const TABLE: &str = "coordinator_state";

/// Repository for coordinator state persistence.
pub struct CoordinatorStateRepository;

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct StateRecord {
    state: String,
    version: u64,
}

/// Struct for writing state - omits `updated_at`, which SurrealDB sets.
#[derive(Debug, Serialize)]
struct StateWrite {
    state: String,
    version: u64,
}

/// A loaded coordinator state together with its storage version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredState {
    pub state: QueueState,
    pub version: u64,
}

impl CoordinatorStateRepository {
    /// Load the state saved for `instance`, if any.
    pub async fn load(instance: &str) -> Result<Option<StoredState>, DbError> {
        let db = get_db()?;

        let record: Option<StateRecord> = db.select((TABLE, instance.to_string())).await?;

        record
            .map(|r| {
                Ok(StoredState {
                    state: serde_json::from_str(&r.state)?,
                    version: r.version,
                })
            })
            .transpose()
    }

    /// Replace the state saved for `instance`, returning the new version.
    pub async fn save(instance: &str, state: &QueueState) -> Result<u64, DbError> {
        let db = get_db()?;

        let current: Option<StateRecord> = db.select((TABLE, instance.to_string())).await?;
        let write = StateWrite {
            state: serde_json::to_string(state)?,
            version: current.map_or(0, |r| r.version) + 1,
        };

        let record: Option<StateRecord> = db
            .upsert((TABLE, instance.to_string()))
            .content(write)
            .await?;

        let version = record
            .map(|r| r.version)
            .ok_or_else(|| DbError::Query(format!("Failed to save state for {}", instance)))?;

        tracing::debug!("Saved coordinator state {} at version {}", instance, version);
        Ok(version)
    }

    /// Delete the state saved for `instance`.
    pub async fn delete(instance: &str) -> Result<(), DbError> {
        let db = get_db()?;

        let _: Option<StateRecord> = db.delete((TABLE, instance.to_string())).await?;

        Ok(())
    }
}
