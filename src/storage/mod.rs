#[cfg(test)]
pub(crate) mod mock;
mod queries;
mod repository;
mod transaction;

pub use repository::*;
pub use transaction::*;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");
