//! # Lion Policy Store
//!
//! `lion_policy_store` persists Casbin-style policy rules in a SQL table.
//! A policy engine loads rules through an [`Adapter`] and writes changes
//! back either in full or one batch at a time.
//!
//! Key concepts:
//!
//! 1. **Rule Row**: One stored rule, a policy type plus up to six values.
//!
//! 2. **Filter**: A selection of rules to load, by policy type and per-field
//!    values.
//!
//! 3. **Session**: The transaction an operation runs in, either its own or a
//!    caller-owned [`SharedSession`].
//!
//! 4. **Deletion Strategy**: Hard deletion removes rows. Soft deletion flags
//!    them and keeps unchanged rules in place when the whole policy is saved.

pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod store;

// Re-export key types and traits for convenience
pub use config::AdapterConfig;
pub use error::{AdapterError, Result};
pub use model::{Filter, MemoryModel, PolicyModel, RuleRow, Section};
pub use schema::{ColumnDef, ColumnType, RuleSchema};
pub use store::{Adapter, DeletionStrategy, SharedSession, SqlAdapter, SqlAdapterBuilder};
