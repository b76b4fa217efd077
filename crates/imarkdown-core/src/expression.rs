//! Expressions and the per-expression results returned by a kernel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A mime bundle: mime type to payload.
pub type MimeBundle = Map<String, Value>;

/// Mime type used for error results.
pub const STDERR_MIMETYPE: &str = "application/vnd.jupyter.stderr";

/// An inline expression, numbered by document position within its cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expression {
    /// Zero-based position among the cell's placeholders.
    pub ordinal: usize,
    /// Raw source text, untrimmed.
    pub text: String,
}

impl Expression {
    /// Create an expression.
    pub fn new(ordinal: usize, text: impl Into<String>) -> Self {
        Self {
            ordinal,
            text: text.into(),
        }
    }

    /// Key used for this expression on the wire.
    pub fn key(&self) -> String {
        self.ordinal.to_string()
    }
}

/// Outcome of evaluating a single expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ExpressionResult {
    /// The expression produced a displayable value.
    #[serde(rename = "ok")]
    Output {
        /// Representations of the value keyed by mime type.
        #[serde(default)]
        data: MimeBundle,
        /// Display metadata.
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// The expression raised.
    #[serde(rename = "error")]
    Error {
        /// Exception name.
        ename: String,
        /// Exception message.
        evalue: String,
        /// Formatted traceback lines.
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl ExpressionResult {
    /// An output result with a single `text/plain` representation.
    pub fn plain(text: impl Into<String>) -> Self {
        let mut data = MimeBundle::new();
        data.insert("text/plain".to_string(), Value::String(text.into()));
        ExpressionResult::Output {
            data,
            metadata: Map::new(),
        }
    }

    /// An error result.
    pub fn error(ename: impl Into<String>, evalue: impl Into<String>, traceback: Vec<String>) -> Self {
        ExpressionResult::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        }
    }

    /// Whether this is an error result.
    pub fn is_error(&self) -> bool {
        matches!(self, ExpressionResult::Error { .. })
    }

    /// The bundle and metadata to display.
    ///
    /// Errors are shown as a single stderr entry: the traceback lines joined
    /// by newlines, or `"ename: evalue"` when there is no traceback.
    pub fn display_bundle(&self) -> (MimeBundle, Map<String, Value>) {
        match self {
            ExpressionResult::Output { data, metadata } => (data.clone(), metadata.clone()),
            ExpressionResult::Error {
                ename,
                evalue,
                traceback,
            } => {
                let text = if traceback.is_empty() {
                    format!("{}: {}", ename, evalue)
                } else {
                    traceback.join("\n")
                };
                let mut data = MimeBundle::new();
                data.insert(STDERR_MIMETYPE.to_string(), Value::String(text));
                (data, Map::new())
            }
        }
    }
}
