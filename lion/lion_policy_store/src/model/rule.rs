//! Stored rule row.
//!
//! This module defines the fixed-width record that backs one policy tuple.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdapterError, Result};

/// The number of positional value columns (`v0`..`v5`).
pub const MAX_FIELDS: usize = 6;

/// One stored policy tuple.
///
/// A rule is a policy type tag plus up to six positional string values.
/// Unset slots are `None`, which is distinct from an empty string, and only
/// trailing slots may be unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRow {
    /// The surrogate key, assigned by storage on insert.
    pub id: Option<i64>,

    /// The policy type tag, e.g. `p` or `g`.
    pub ptype: String,

    /// The positional values `v0`..`v5`.
    pub values: [Option<String>; MAX_FIELDS],

    /// The soft-delete flag, present only when soft delete is configured.
    pub deleted: Option<bool>,
}

impl RuleRow {
    /// Create a row from a policy type and its values.
    ///
    /// # Arguments
    ///
    /// * `ptype` - The policy type tag.
    /// * `values` - Between zero and six values, placed in `v0` onwards.
    ///
    /// # Returns
    ///
    /// * `Ok(RuleRow)` - The row, with unused trailing slots unset.
    /// * `Err` - If more than six values were given.
    pub fn from_tuple<S: AsRef<str>>(ptype: impl Into<String>, values: &[S]) -> Result<Self> {
        if values.len() > MAX_FIELDS {
            return Err(AdapterError::TooManyValues(values.len()));
        }

        let mut slots: [Option<String>; MAX_FIELDS] = Default::default();
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = Some(value.as_ref().to_string());
        }

        Ok(Self {
            id: None,
            ptype: ptype.into(),
            values: slots,
            deleted: None,
        })
    }

    /// Convert the row back into its rule values.
    ///
    /// Stops at the first unset slot. Empty strings before that point are
    /// kept.
    pub fn to_tuple(&self) -> Vec<String> {
        self.values.iter().map_while(|v| v.clone()).collect()
    }

    /// The number of present values.
    pub fn arity(&self) -> usize {
        self.values.iter().take_while(|v| v.is_some()).count()
    }

    /// Get the value at `index`, if present.
    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// Set the soft-delete flag.
    pub fn with_deleted_flag(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    /// Check whether this row has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted.unwrap_or(false)
    }
}

impl fmt::Display for RuleRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ptype)?;
        for value in self.values.iter().map_while(|v| v.as_deref()) {
            write!(f, ", {}", value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let rule = RuleRow::from_tuple("p", &["alice", "data1", "read"]).unwrap();
        assert_eq!(rule.to_string(), "p, alice, data1, read");

        let rule = RuleRow::from_tuple("g", &["alice", "data2_admin"]).unwrap();
        assert_eq!(rule.to_string(), "g, alice, data2_admin");

        let rule = RuleRow::from_tuple::<&str>("p", &[]).unwrap();
        assert_eq!(rule.to_string(), "p");
    }

    #[test]
    fn test_display_stops_at_first_unset() {
        let mut rule = RuleRow::from_tuple("p", &["alice"]).unwrap();
        rule.values[2] = Some("orphan".to_string());
        assert_eq!(rule.to_string(), "p, alice");
        assert_eq!(rule.to_tuple(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_tuple_round_trip() {
        let all = ["a", "b", "c", "d", "e", "f"];
        for len in 1..=MAX_FIELDS {
            let values: Vec<String> = all[..len].iter().map(|s| s.to_string()).collect();
            let rule = RuleRow::from_tuple("p", &values).unwrap();
            assert_eq!(rule.arity(), len);
            assert_eq!(rule.to_tuple(), values);
        }
    }

    #[test]
    fn test_empty_string_is_not_unset() {
        let rule = RuleRow::from_tuple("p", &["alice", "", "read"]).unwrap();
        assert_eq!(rule.value(1), Some(""));
        assert_eq!(rule.to_tuple(), vec!["alice", "", "read"]);
        assert_eq!(rule.to_string(), "p, alice, , read");
    }

    #[test]
    fn test_too_many_values() {
        let values = ["1", "2", "3", "4", "5", "6", "7"];
        let result = RuleRow::from_tuple("p", &values);
        assert!(matches!(result, Err(AdapterError::TooManyValues(7))));
    }

    #[test]
    fn test_deleted_flag() {
        let rule = RuleRow::from_tuple("p", &["alice"]).unwrap();
        assert!(!rule.is_deleted());
        assert!(rule.with_deleted_flag(true).is_deleted());
    }
}
