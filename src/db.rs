//! Relational store of models, parameter sets, executables, jobs and their
//! result files.
//!
//! [`Database`] owns the connection pool and is shared by all workers.
//! Each worker works through its own [`Session`], usually wrapped in a
//! retrying [`Store`].

pub mod diagnostics;
pub mod entity;
mod error;
pub mod job;
pub mod model;
pub mod open;
pub mod retry;
pub mod session;
pub mod store;

pub use entity::{Record, Stored};
pub use error::{ErrorClass, PersistenceError};
pub use job::load::{ArtifactSummary, JobRecord, JobSummary};
pub use job::state::JobState;
pub use job::JobPaths;
pub use open::Database;
pub use retry::RetryPolicy;
pub use session::Session;
pub use store::Store;
