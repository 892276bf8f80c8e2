//! Submitting client for the optimization job queue.
//!
//! Turns optimization jobs into queue submissions, polls them until they
//! finish, and maps queue state back onto the job.
//!
//! # Usage
//!
//! ```ignore
//! let client = QueueClient::new(coordinator, ClientConfig::default());
//! let submission = client.submit(job, |update| println!("{}", update.message)).await?;
//! let finished = submission.wait().await?;
//! ```

mod config;
mod submission;

pub use config::ClientConfig;
pub use submission::{ClientError, JobUpdate, QueueClient, Submission};
