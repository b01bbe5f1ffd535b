//! Policy model sections.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A top-level grouping in the policy model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    /// Main policy rules (`p`, `p2`, ...).
    Policy,

    /// Grouping / role rules (`g`, `g2`, ...).
    Grouping,
}

impl Section {
    /// Sections persisted by a full save, in save order.
    pub const PERSISTED: [Section; 2] = [Section::Policy, Section::Grouping];

    /// Derive the section from a policy type tag.
    ///
    /// The first character of the tag names the section. Tags that start
    /// with anything other than `p` or `g` belong to no section.
    pub fn of_ptype(ptype: &str) -> Option<Self> {
        match ptype.chars().next() {
            Some('p') => Some(Section::Policy),
            Some('g') => Some(Section::Grouping),
            _ => None,
        }
    }

    /// The section key as used in model definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Policy => "p",
            Section::Grouping => "g",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_ptype() {
        assert_eq!(Section::of_ptype("p"), Some(Section::Policy));
        assert_eq!(Section::of_ptype("p2"), Some(Section::Policy));
        assert_eq!(Section::of_ptype("g"), Some(Section::Grouping));
        assert_eq!(Section::of_ptype("g3"), Some(Section::Grouping));
        assert_eq!(Section::of_ptype("e"), None);
        assert_eq!(Section::of_ptype(""), None);
    }
}
