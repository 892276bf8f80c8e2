//! Process-wide SurrealDB handle backing the coordinator state store.

use std::sync::LazyLock;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Set once by [`init_db`].
static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

pub type Database = Surreal<Any>;

/// Where the coordinator state database lives.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `mem://`, `file://path` or `rocksdb://path`; the last two need the
    /// `rocksdb` feature.
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Root sign-in, when the server requires it.
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "optqueue".to_string(),
            database: "coordinator".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Volatile in-process store, the default.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Coordinator state kept on disk under `path`.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// Build a config from `QUEUE_DB_*` environment variables.
    ///
    /// `QUEUE_DB_ENDPOINT` defaults to in-memory; `QUEUE_DB_USER` and
    /// `QUEUE_DB_PASS` enable root sign-in when both are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("QUEUE_DB_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(namespace) = std::env::var("QUEUE_DB_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(database) = std::env::var("QUEUE_DB_DATABASE") {
            config.database = database;
        }
        if let (Ok(user), Ok(pass)) = (std::env::var("QUEUE_DB_USER"), std::env::var("QUEUE_DB_PASS")) {
            config = config.with_credentials(user, pass);
        }
        config
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Failures reaching or querying the state database.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized; call db::init at startup")]
    NotInitialized,
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Connect and select the namespace. Later calls return the first connection
/// and ignore their config.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!("Connecting to state database at {}", config.endpoint);
        let db = connect(&config.endpoint).await?;

        if let Some((username, password)) = &config.credentials {
            db.signin(Root {
                username,
                password,
            })
            .await?;
        }

        db.use_ns(&config.namespace).use_db(&config.database).await?;
        tracing::info!("Using state database {}/{}", config.namespace, config.database);
        Ok(db)
    })
    .await
}

/// The connection opened by [`init_db`].
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}
