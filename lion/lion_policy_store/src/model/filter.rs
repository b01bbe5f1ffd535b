//! Rule filters.
//!
//! A filter restricts which rows are loaded or matched. Each of the seven
//! slots (`ptype`, `v0`..`v5`) holds a set of accepted values; an empty set
//! places no constraint on that slot.

use serde::{Deserialize, Serialize};

use super::rule::{RuleRow, MAX_FIELDS};
use crate::error::{AdapterError, Result};

/// A multi-field inclusion predicate over rule rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Accepted policy types.
    #[serde(default)]
    pub ptype: Vec<String>,

    /// Accepted values for `v0`..`v5`.
    #[serde(default)]
    pub values: [Vec<String>; MAX_FIELDS],
}

impl Filter {
    /// Create a filter that matches every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the policy type.
    pub fn with_ptype<I, S>(mut self, ptypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ptype = ptypes.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the value at `index`.
    ///
    /// # Returns
    ///
    /// * `Ok(Filter)` - The updated filter.
    /// * `Err` - If `index` is not in `0..=5`.
    pub fn with_field<I, S>(mut self, index: usize, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slot = self
            .values
            .get_mut(index)
            .ok_or(AdapterError::FieldIndexOutOfRange(index))?;
        *slot = values.into_iter().map(Into::into).collect();
        Ok(self)
    }

    /// Build the filter for a filtered update or removal.
    ///
    /// `values[k]` is placed at slot `start_index + k`. Empty strings leave
    /// their slot unconstrained.
    ///
    /// # Returns
    ///
    /// `None` if the span is invalid, see [`valid_span`].
    pub fn from_field_values<S: AsRef<str>>(
        ptype: impl Into<String>,
        start_index: usize,
        values: &[S],
    ) -> Option<Self> {
        if !valid_span(start_index, values.len()) {
            return None;
        }

        let mut filter = Self::new().with_ptype([ptype]);
        for (offset, value) in values.iter().enumerate() {
            let value = value.as_ref();
            if !value.is_empty() {
                filter.values[start_index + offset] = vec![value.to_string()];
            }
        }
        Some(filter)
    }

    /// Check whether this filter places no constraint at all.
    pub fn is_empty(&self) -> bool {
        self.ptype.is_empty() && self.values.iter().all(Vec::is_empty)
    }

    /// Evaluate the filter against a row in memory.
    ///
    /// An unset field never satisfies a non-empty slot.
    pub fn matches(&self, row: &RuleRow) -> bool {
        if !self.ptype.is_empty() && !self.ptype.contains(&row.ptype) {
            return false;
        }

        self.values
            .iter()
            .zip(row.values.iter())
            .all(|(accepted, value)| {
                accepted.is_empty()
                    || value
                        .as_ref()
                        .map(|v| accepted.contains(v))
                        .unwrap_or(false)
            })
    }
}

/// Check a filtered-operation span.
///
/// `start_index` must be in `0..=5` and `start_index + len` in `1..=6`.
pub fn valid_span(start_index: usize, len: usize) -> bool {
    start_index < MAX_FIELDS && (1..=MAX_FIELDS).contains(&(start_index + len))
}
