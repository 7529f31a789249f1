//! # batchmat core
//!
//! Least-privilege access policies for catalog tables, and the batch job
//! definitions that carry them.
//!
//! The [`PolicyResolver`] turns a database and a list of tables into one S3
//! statement and one Glue statement, locating each table through a
//! [`CatalogStore`]. The [`JobAssembler`] folds resolved policies into a job
//! definition with an execution identity, a job identity, a container spec
//! and an optional schedule binding.

pub mod types;
pub mod error;
pub mod config;
pub mod retry;
pub mod schedule;
pub mod backend;
pub mod locator;
pub mod permissions;
pub mod assembler;
pub mod manifest;
pub mod invocation;

#[cfg(test)]
mod test_support;

pub use types::*;
pub use error::{Error, Result};
pub use config::*;
pub use retry::RetryConfig;
pub use schedule::Schedule;
pub use backend::*;
pub use locator::CatalogLocator;
pub use permissions::*;
pub use assembler::*;
pub use manifest::*;
pub use invocation::*;
