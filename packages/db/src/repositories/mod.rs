//! Repository implementations for database operations.

mod state_repo;

pub use state_repo::{CoordinatorStateRepository, StoredState};
