//! Policy storage.
//!
//! This module provides the adapter interface the policy engine calls and
//! its SQL implementation.

pub mod deletion;
pub mod query;
mod session;
mod sql;

pub use deletion::DeletionStrategy;
pub use query::{Field, Predicate, RuleQuery};
pub use session::{SharedSession, SqliteTransaction};
pub use sql::{SqlAdapter, SqlAdapterBuilder};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Filter, PolicyModel, Section};

/// Trait for policy persistence adapters.
///
/// An adapter loads stored rules into a policy model and persists changes
/// made to it, either in full or incrementally. Each call runs in a single
/// transaction.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Load every visible rule into `model`, ordered by id.
    async fn load_policy(&self, model: &mut dyn PolicyModel) -> Result<()>;

    /// Load the visible rules matching `filter` into `model`.
    ///
    /// Marks the adapter as filtered.
    async fn load_filtered_policy(&self, model: &mut dyn PolicyModel, filter: &Filter)
        -> Result<()>;

    /// Whether the last load was partial.
    fn is_filtered(&self) -> bool;

    /// Make the stored rules match `model`.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the rules were saved.
    /// * `Err` - If the rules could not be saved.
    async fn save_policy(&self, model: &dyn PolicyModel) -> Result<bool>;

    /// Add a rule.
    async fn add_policy(&self, sec: Section, ptype: &str, rule: &[String]) -> Result<()>;

    /// Add several rules in one batch.
    async fn add_policies(&self, sec: Section, ptype: &str, rules: &[Vec<String>]) -> Result<()>;

    /// Remove the rule matching `rule`'s values.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If at least one row was removed.
    /// * `Ok(false)` - If nothing matched.
    async fn remove_policy(&self, sec: Section, ptype: &str, rule: &[String]) -> Result<bool>;

    /// Remove several rules in one statement.
    ///
    /// Field `i` of a removed row equals one of the values at position `i` in
    /// `rules`, independently per field.
    async fn remove_policies(&self, sec: Section, ptype: &str, rules: &[Vec<String>])
        -> Result<bool>;

    /// Remove rules whose values from `field_index` onwards match
    /// `field_values`. Empty strings match anything.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if nothing matched or the span is invalid.
    async fn remove_filtered_policy(
        &self,
        sec: Section,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool>;

    /// Replace `old_rule` with `new_rule`.
    ///
    /// Fails unless exactly one visible row holds `old_rule`.
    async fn update_policy(
        &self,
        sec: Section,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<()>;

    /// Replace each of `old_rules` with the rule at the same index in
    /// `new_rules`.
    async fn update_policies(
        &self,
        sec: Section,
        ptype: &str,
        old_rules: &[Vec<String>],
        new_rules: &[Vec<String>],
    ) -> Result<()>;

    /// Replace the rules matching a field filter with `new_rules`.
    ///
    /// # Returns
    ///
    /// The rules that were replaced.
    async fn update_filtered_policies(
        &self,
        sec: Section,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>>;
}
