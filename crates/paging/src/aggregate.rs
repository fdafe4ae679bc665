//! Concatenation of decoded page bodies

use serde_json::Value;

/// Result accumulated across pages.
///
/// The first page's decoded body is the seed. Only an array seed grows;
/// a non-array seed is a complete single-page result.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate(Value);

impl Aggregate {
    pub fn seed(first_page: Value) -> Self {
        Self(first_page)
    }

    /// Whether further pages can be merged in.
    pub fn is_list(&self) -> bool {
        self.0.is_array()
    }

    /// Merge a continuation page.
    ///
    /// Array pages are concatenated in order; any other value is appended
    /// as a single element. Does nothing when the seed is not an array.
    pub fn extend(&mut self, page: Value) {
        let Value::Array(items) = &mut self.0 else {
            return;
        };
        match page {
            Value::Array(more) => items.extend(more),
            other => items.push(other),
        }
    }

    /// Number of elements collected so far (1 for a non-array seed).
    pub fn len(&self) -> usize {
        match &self.0 {
            Value::Array(items) => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.0, Value::Array(items) if items.is_empty())
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}
