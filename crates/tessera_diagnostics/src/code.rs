//! Stable identifiers for the problems the cache engine reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Area of the engine a [`DiagnosticCode`] belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Category {
    /// Values or types the cache cannot represent, prefixed with `U`.
    Unsupported,
    /// Illegal usage detected while serializing, prefixed with `P`.
    Problem,
    /// Field-level mismatches during bean reconstruction, prefixed with `F`.
    Field,
    /// Cache entry lifecycle (discarded, stale), prefixed with `C`.
    Cache,
}

impl Category {
    /// Letter the rendered code starts with.
    pub fn prefix(self) -> char {
        match self {
            Category::Unsupported => 'U',
            Category::Problem => 'P',
            Category::Field => 'F',
            Category::Cache => 'C',
        }
    }
}

/// Category plus number, rendered as `U001`, `F001` and so on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DiagnosticCode {
    /// Area of the engine.
    pub category: Category,
    /// Number within the category.
    pub number: u16,
}

impl DiagnosticCode {
    /// A value whose runtime type is on the unsupported-types denylist.
    pub const UNSUPPORTED_TYPE: Self = Self::new(Category::Unsupported, 1);
    /// A bean field whose declared type cannot be serialized.
    pub const UNSUPPORTED_FIELD: Self = Self::new(Category::Unsupported, 2);
    /// A value for which no binding and no bean registration exists.
    pub const NO_CODEC: Self = Self::new(Category::Unsupported, 3);
    /// A provider used in a context where it is not legal (e.g. flow providers).
    pub const PROVIDER_MISUSE: Self = Self::new(Category::Problem, 1);
    /// A decoded field value could not be assigned to the target field.
    pub const FIELD_NOT_ASSIGNABLE: Self = Self::new(Category::Field, 1);
    /// A cache entry was found but could not be used.
    pub const ENTRY_DISCARDED: Self = Self::new(Category::Cache, 1);

    /// Builds a code from its parts.
    pub const fn new(category: Category, number: u16) -> Self {
        Self { category, number }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.category.prefix(), self.number)
    }
}
