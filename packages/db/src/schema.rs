//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(COORDINATOR_STATE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Coordinator state table schema.
///
/// One record per coordinator instance, keyed by instance name. The queue
/// state is stored as a serialized document so its layout stays owned by the
/// coordinator; `version` increases by one on every save.
const COORDINATOR_STATE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS coordinator_state SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS state ON coordinator_state TYPE string;
DEFINE FIELD IF NOT EXISTS version ON coordinator_state TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS updated_at ON coordinator_state TYPE datetime VALUE time::now();
"#;
