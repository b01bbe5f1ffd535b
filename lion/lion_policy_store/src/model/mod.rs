//! Policy rule models.
//!
//! This module defines the stored rule row, filters, sections and the
//! policy model seam.

pub mod filter;
pub mod memory;
pub mod rule;
pub mod section;

pub use filter::{valid_span, Filter};
pub use memory::{load_policy_line, MemoryModel, PolicyModel};
pub use rule::{RuleRow, MAX_FIELDS};
pub use section::Section;
