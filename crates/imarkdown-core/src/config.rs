//! # imarkdown Configuration
//!
//! Process-wide settings for the directive scanner, the placeholder
//! identifier and the reconciler. Resolve a config once at startup and pass it
//! explicitly (usually as `Arc<ImarkdownConfig>`) to the components that need it.

use std::env;

use crate::{ImarkdownError, Result};

/// Default opening delimiter for inline directives.
pub const DEFAULT_OPEN_DELIMITER: &str = "{{";

/// Default closing delimiter for inline directives.
pub const DEFAULT_CLOSE_DELIMITER: &str = "}}";

/// Default marker class carried by placeholder nodes.
pub const DEFAULT_PLACEHOLDER_CLASS: &str = "jupyter-imarkdown-expr";

/// Default cell metadata key under which result records are persisted.
pub const DEFAULT_METADATA_KEY: &str = "user_expressions";

/// Configuration for the expression lifecycle.
///
/// # Example
/// ```rust
/// use imarkdown_core::ImarkdownConfig;
///
/// let config = ImarkdownConfig::default()
///     .with_delimiters("<<", ">>")
///     .with_strip_quotes(false);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImarkdownConfig {
    /// Opening delimiter of an inline directive.
    /// Default: `{{`, Env: IMARKDOWN_OPEN_DELIMITER
    pub open_delimiter: String,

    /// Closing delimiter of an inline directive.
    /// Default: `}}`, Env: IMARKDOWN_CLOSE_DELIMITER
    pub close_delimiter: String,

    /// Class marking placeholder nodes in the output tree.
    /// Env: IMARKDOWN_PLACEHOLDER_CLASS
    pub placeholder_class: String,

    /// Cell metadata key holding the persisted result record.
    /// Env: IMARKDOWN_METADATA_KEY
    pub metadata_key: String,

    /// Base class for every node produced by the reconciler.
    pub rendered_class: String,

    /// Class for nodes rendered from a kernel result.
    pub result_class: String,

    /// Class for the inline error marker.
    pub error_class: String,

    /// Strip one pair of matching quotes from `text/plain` results
    /// (`'hello'` renders as `hello`).
    /// Default: true, Env: IMARKDOWN_STRIP_QUOTES=false
    pub strip_quotes: bool,
}

impl Default for ImarkdownConfig {
    fn default() -> Self {
        Self {
            open_delimiter: DEFAULT_OPEN_DELIMITER.to_string(),
            close_delimiter: DEFAULT_CLOSE_DELIMITER.to_string(),
            placeholder_class: DEFAULT_PLACEHOLDER_CLASS.to_string(),
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            rendered_class: "im-rendered".to_string(),
            result_class: "im-result".to_string(),
            error_class: "im-error".to_string(),
            strip_quotes: true,
        }
    }
}

impl ImarkdownConfig {
    /// Create a new config from environment variables.
    /// Falls back to defaults for missing variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("IMARKDOWN_OPEN_DELIMITER") {
            config.open_delimiter = v;
        }
        if let Ok(v) = env::var("IMARKDOWN_CLOSE_DELIMITER") {
            config.close_delimiter = v;
        }
        if let Ok(v) = env::var("IMARKDOWN_PLACEHOLDER_CLASS") {
            config.placeholder_class = v;
        }
        if let Ok(v) = env::var("IMARKDOWN_METADATA_KEY") {
            config.metadata_key = v;
        }
        if let Ok(v) = env::var("IMARKDOWN_STRIP_QUOTES") {
            config.strip_quotes = v.to_lowercase() != "false" && v != "0";
        }

        config
    }

    /// Builder: Set both directive delimiters.
    pub fn with_delimiters(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.open_delimiter = open.into();
        self.close_delimiter = close.into();
        self
    }

    /// Builder: Set the placeholder marker class.
    pub fn with_placeholder_class(mut self, class: impl Into<String>) -> Self {
        self.placeholder_class = class.into();
        self
    }

    /// Builder: Set the metadata key for persisted results.
    pub fn with_metadata_key(mut self, key: impl Into<String>) -> Self {
        self.metadata_key = key.into();
        self
    }

    /// Builder: Enable or disable quote stripping for plain text results.
    pub fn with_strip_quotes(mut self, enabled: bool) -> Self {
        self.strip_quotes = enabled;
        self
    }

    /// Check that the configuration can drive the scanner.
    ///
    /// The opening delimiter must start with an ASCII punctuation character:
    /// the host text rule only yields control at punctuation, so any other
    /// leading character would be swallowed as plain text.
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.open_delimiter.chars().next() else {
            return Err(ImarkdownError::ConfigError(
                "open delimiter must not be empty".to_string(),
            ));
        };
        if !first.is_ascii_punctuation() {
            return Err(ImarkdownError::ConfigError(format!(
                "open delimiter '{}' must start with ASCII punctuation",
                self.open_delimiter
            )));
        }
        if self.close_delimiter.is_empty() {
            return Err(ImarkdownError::ConfigError(
                "close delimiter must not be empty".to_string(),
            ));
        }
        if self.placeholder_class.split_whitespace().count() != 1 {
            return Err(ImarkdownError::ConfigError(format!(
                "placeholder class '{}' must be a single class name",
                self.placeholder_class
            )));
        }
        if self.metadata_key.is_empty() {
            return Err(ImarkdownError::ConfigError(
                "metadata key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ImarkdownConfig::default();
        assert_eq!(config.open_delimiter, "{{");
        assert_eq!(config.close_delimiter, "}}");
        assert_eq!(config.metadata_key, "user_expressions");
        assert!(config.strip_quotes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ImarkdownConfig::default()
            .with_delimiters("[[", "]]")
            .with_metadata_key("results")
            .with_strip_quotes(false);

        assert_eq!(config.open_delimiter, "[[");
        assert_eq!(config.close_delimiter, "]]");
        assert_eq!(config.metadata_key, "results");
        assert!(!config.strip_quotes);
    }

    #[test]
    fn test_validate_rejects_bad_delimiters() {
        let empty = ImarkdownConfig::default().with_delimiters("", "}}");
        assert!(matches!(empty.validate(), Err(ImarkdownError::ConfigError(_))));

        let alpha = ImarkdownConfig::default().with_delimiters("ab", "}}");
        assert!(alpha.validate().is_err());

        let no_close = ImarkdownConfig::default().with_delimiters("{{", "");
        assert!(no_close.validate().is_err());

        let two_classes = ImarkdownConfig::default().with_placeholder_class("a b");
        assert!(two_classes.validate().is_err());
    }
}
