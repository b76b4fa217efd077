//! Persisted result records.
//!
//! A record lives in cell metadata under a single key and survives save and
//! reload of the document. Each entry keeps the expression text it was
//! computed for, so a record can be checked against the cell's current
//! expressions before anything is rendered from it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::expression::{Expression, ExpressionResult};
use crate::{ImarkdownError, Result};

/// One persisted result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Text of the expression the result was computed for.
    pub expression: String,
    /// The result itself.
    pub result: ExpressionResult,
}

impl ResultEntry {
    /// Create an entry.
    pub fn new(expression: impl Into<String>, result: ExpressionResult) -> Self {
        Self {
            expression: expression.into(),
            result,
        }
    }
}

/// Why a record does not belong to the cell's current expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordMismatch {
    /// Different number of entries and expressions.
    #[error("record holds {found} results but the cell has {expected} expressions")]
    Length {
        /// Number of expressions in the cell.
        expected: usize,
        /// Number of entries in the record.
        found: usize,
    },
    /// An entry was computed for different text.
    #[error("result {ordinal} was computed for '{found}' but the expression is now '{expected}'")]
    Expression {
        /// Position of the mismatch.
        ordinal: usize,
        /// Current expression text.
        expected: String,
        /// Text stored in the record.
        found: String,
    },
}

/// Ordered results for every expression of a cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord {
    entries: Vec<ResultEntry>,
}

impl ResultRecord {
    /// Create a record from entries in expression order.
    pub fn new(entries: Vec<ResultEntry>) -> Self {
        Self { entries }
    }

    /// Entries in expression order.
    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    /// Iterate over entries in expression order.
    pub fn iter(&self) -> std::slice::Iter<'_, ResultEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that every entry matches the expression at the same position.
    pub fn check_against(&self, expressions: &[Expression]) -> std::result::Result<(), RecordMismatch> {
        if self.entries.len() != expressions.len() {
            return Err(RecordMismatch::Length {
                expected: expressions.len(),
                found: self.entries.len(),
            });
        }
        for (ordinal, (entry, expression)) in self.entries.iter().zip(expressions).enumerate() {
            if entry.expression != expression.text {
                return Err(RecordMismatch::Expression {
                    ordinal,
                    expected: expression.text.clone(),
                    found: entry.expression.clone(),
                });
            }
        }
        Ok(())
    }

    /// Read the record stored under `key`, if any.
    pub fn load(metadata: &Map<String, Value>, key: &str) -> Result<Option<Self>> {
        let Some(value) = metadata.get(key) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ImarkdownError::InvalidMetadata {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Replace whatever is stored under `key` with this record.
    ///
    /// The record is serialized before the old value is touched, so a
    /// failure leaves the metadata unchanged. An existing record is replaced
    /// in place; other keys keep their order.
    pub fn store(&self, metadata: &mut Map<String, Value>, key: &str) -> Result<()> {
        let value = serde_json::to_value(self)?;
        metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove the record stored under `key`. Returns whether one was present.
    pub fn clear(metadata: &mut Map<String, Value>, key: &str) -> bool {
        metadata.shift_remove(key).is_some()
    }
}

impl<'a> IntoIterator for &'a ResultRecord {
    type Item = &'a ResultEntry;
    type IntoIter = std::slice::Iter<'a, ResultEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ResultRecord {
        ResultRecord::new(vec![
            ResultEntry::new("x + 1", ExpressionResult::plain("2")),
            ResultEntry::new("y", ExpressionResult::error("NameError", "y", vec![])),
        ])
    }

    fn expressions(texts: &[&str]) -> Vec<Expression> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Expression::new(i, *t))
            .collect()
    }

    #[test]
    fn test_store_and_load() {
        let mut metadata = Map::new();
        metadata.insert("tags".to_string(), json!(["keep"]));

        record().store(&mut metadata, "user_expressions").unwrap();
        let loaded = ResultRecord::load(&metadata, "user_expressions").unwrap();

        assert_eq!(loaded, Some(record()));
        assert_eq!(metadata["tags"], json!(["keep"]));
        assert_eq!(metadata["user_expressions"][0]["expression"], json!("x + 1"));
        assert_eq!(metadata["user_expressions"][0]["result"]["status"], json!("ok"));
    }

    #[test]
    fn test_store_keeps_key_order() {
        let mut metadata = Map::new();
        for key in ["a", "user_expressions", "b", "c"] {
            metadata.insert(key.to_string(), json!(null));
        }

        record().store(&mut metadata, "user_expressions").unwrap();
        let keys: Vec<&str> = metadata.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "user_expressions", "b", "c"]);

        ResultRecord::clear(&mut metadata, "user_expressions");
        let keys: Vec<&str> = metadata.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_load_missing_key() {
        assert_eq!(ResultRecord::load(&Map::new(), "user_expressions").unwrap(), None);
    }

    #[test]
    fn test_load_invalid_value() {
        let mut metadata = Map::new();
        metadata.insert("user_expressions".to_string(), json!({"not": "a list"}));

        let err = ResultRecord::load(&metadata, "user_expressions").unwrap_err();
        assert!(matches!(err, ImarkdownError::InvalidMetadata { .. }));
    }

    #[test]
    fn test_check_against() {
        assert!(record().check_against(&expressions(&["x + 1", "y"])).is_ok());

        assert_eq!(
            record().check_against(&expressions(&["x + 1"])),
            Err(RecordMismatch::Length { expected: 1, found: 2 })
        );

        assert_eq!(
            record().check_against(&expressions(&["x+1", "y"])),
            Err(RecordMismatch::Expression {
                ordinal: 0,
                expected: "x+1".to_string(),
                found: "x + 1".to_string(),
            })
        );
    }

    #[test]
    fn test_clear() {
        let mut metadata = Map::new();
        record().store(&mut metadata, "k").unwrap();

        assert!(ResultRecord::clear(&mut metadata, "k"));
        assert!(!ResultRecord::clear(&mut metadata, "k"));
    }
}
