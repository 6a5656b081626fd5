//! # Repo Warehouse Core
//!
//! Pure, I/O-free logic for Repo Warehouse: data models, repository path
//! resolution, the warehouse lifecycle transition table, the reprocessing
//! decision, catalogue parsing, and the storage abstraction.
//!
//! This crate contains no tokio runtime, sqlx, git subprocesses, or
//! filesystem access. Everything that touches the network or disk lives in
//! the `repo-warehouse` crate.

pub mod catalogue;
pub mod changes;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod path;
pub mod store;

pub use error::PipelineError;
