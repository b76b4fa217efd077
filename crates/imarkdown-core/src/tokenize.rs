//! Inline directive scanner.
//!
//! Recognizes `{{ expression }}` spans inside the host's inline chain and
//! emits a hidden `input` placeholder carrying the raw expression text.

use crate::markup::{InlineRule, InlineRuler, InlineState};
use crate::{ImarkdownConfig, Result};

/// Name of the scanner in the inline chain.
pub const RULE_NAME: &str = "expr";

/// Rule the scanner is inserted after.
pub const ANCHOR_RULE: &str = "emphasis";

/// A directive found in an inline source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive<'a> {
    /// Text between the delimiters, verbatim.
    pub text: &'a str,
    /// Byte offset just past the closing delimiter.
    pub end: usize,
}

/// Inline rule recognizing delimited expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionRule {
    open: String,
    close: String,
    class: String,
}

impl ExpressionRule {
    /// Create a rule with explicit delimiters and placeholder class.
    pub fn new(open: impl Into<String>, close: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
            class: class.into(),
        }
    }

    /// Create a rule from configuration.
    pub fn from_config(config: &ImarkdownConfig) -> Self {
        Self::new(
            &config.open_delimiter,
            &config.close_delimiter,
            &config.placeholder_class,
        )
    }

    /// Validate the config and insert the rule after emphasis.
    pub fn install(ruler: &mut InlineRuler, config: &ImarkdownConfig) -> Result<()> {
        config.validate()?;
        ruler.insert_after(ANCHOR_RULE, Self::from_config(config))
    }

    /// Scan for a directive starting exactly at `pos`.
    ///
    /// The closing delimiter is the first occurrence after the opening one
    /// and must end at or before `pos_max`. Content is never trimmed.
    pub fn scan<'a>(&self, src: &'a str, pos: usize, pos_max: usize) -> Option<Directive<'a>> {
        if pos >= pos_max || pos_max > src.len() {
            return None;
        }
        let bytes = src.as_bytes();
        let open = self.open.as_bytes();
        let close = self.close.as_bytes();
        if open.is_empty() || close.is_empty() || !bytes[pos..pos_max].starts_with(open) {
            return None;
        }

        let body_start = pos + open.len();
        let mut cursor = body_start;
        loop {
            if cursor + close.len() > pos_max {
                return None;
            }
            if bytes[cursor] == close[0] && bytes[cursor..].starts_with(close) {
                break;
            }
            cursor += 1;
        }

        // Delimiters are whole UTF-8 sequences, so both cuts land on
        // character boundaries.
        let text = src.get(body_start..cursor)?;
        Some(Directive {
            text,
            end: cursor + close.len(),
        })
    }

    /// Scan a whole inline source, returning every directive in order.
    pub fn scan_all<'a>(&self, src: &'a str) -> Vec<&'a str> {
        let mut found = Vec::new();
        let mut pos = 0;
        while pos < src.len() {
            match self.scan(src, pos, src.len()) {
                Some(directive) => {
                    found.push(directive.text);
                    pos = directive.end;
                }
                None => pos += src[pos..].chars().next().map_or(1, char::len_utf8),
            }
        }
        found
    }
}

impl InlineRule for ExpressionRule {
    fn name(&self) -> &str {
        RULE_NAME
    }

    fn tokenize(&self, state: &mut InlineState<'_>, silent: bool) -> bool {
        let Some(directive) = self.scan(state.src, state.pos, state.pos_max) else {
            return false;
        };
        if !silent {
            let token = state.push(RULE_NAME, "input", 0);
            token.attr_set("type", "hidden");
            token.attr_set("class", self.class.as_str());
            token.attr_set("value", directive.text);
            token.content = directive.text.to_string();
        }
        state.pos = directive.end;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::Token;

    fn rule() -> ExpressionRule {
        ExpressionRule::from_config(&ImarkdownConfig::default())
    }

    fn ruler() -> InlineRuler {
        let mut ruler = InlineRuler::with_defaults();
        ExpressionRule::install(&mut ruler, &ImarkdownConfig::default()).unwrap();
        ruler
    }

    fn exprs(tokens: &[Token]) -> Vec<&str> {
        tokens
            .iter()
            .filter(|t| t.kind == RULE_NAME)
            .map(|t| t.content.as_str())
            .collect()
    }

    #[test]
    fn test_whole_directive_consumed() {
        let src = "{{x + 1}}";
        let directive = rule().scan(src, 0, src.len()).unwrap();
        assert_eq!(directive.text, "x + 1");
        assert_eq!(directive.end, src.len());
    }

    #[test]
    fn test_empty_directive() {
        let directive = rule().scan("{{}}", 0, 4).unwrap();
        assert_eq!(directive.text, "");
        assert_eq!(directive.end, 4);
    }

    #[test]
    fn test_unterminated_directive_declines() {
        let src = "{{x";
        assert!(rule().scan(src, 0, src.len()).is_none());

        let tokens = ruler().parse("value {{x");
        assert!(exprs(&tokens).is_empty());
        assert_eq!(tokens[0].content, "value {{x");
    }

    #[test]
    fn test_lone_close_character_is_content() {
        let src = "{{a}b}}";
        assert_eq!(rule().scan(src, 0, src.len()).unwrap().text, "a}b");
    }

    #[test]
    fn test_close_beyond_span_declines() {
        let src = "{{x}} tail";
        assert!(rule().scan(src, 0, 4).is_none());
        assert!(rule().scan(src, 0, 5).is_some());
    }

    #[test]
    fn test_first_close_wins() {
        let src = "{{{x}}}";
        let directive = rule().scan(src, 0, src.len()).unwrap();
        assert_eq!(directive.text, "{x");
        assert_eq!(directive.end, 6);
    }

    #[test]
    fn test_directives_in_order() {
        let tokens = ruler().parse("{{a}} and *{{b}}* then {{ c }}");
        assert_eq!(exprs(&tokens), vec!["a", "b", " c "]);
    }

    #[test]
    fn test_placeholder_token_shape() {
        let tokens = ruler().parse("{{x+1}}");
        let token = &tokens[0];

        assert_eq!(token.tag, "input");
        assert_eq!(token.nesting, 0);
        assert_eq!(token.attr_get("type"), Some("hidden"));
        assert_eq!(token.attr_get("class"), Some("jupyter-imarkdown-expr"));
        assert_eq!(token.attr_get("value"), Some("x+1"));
    }

    #[test]
    fn test_custom_delimiters() {
        let config = ImarkdownConfig::default().with_delimiters("<%", "%>");
        let rule = ExpressionRule::from_config(&config);

        assert_eq!(rule.scan_all("a <%x%> {{y}} <%z%>"), vec!["x", "z"]);
    }

    #[test]
    fn test_multibyte_content() {
        let src = "{{\"héllo → wörld\"}}";
        assert_eq!(rule().scan(src, 0, src.len()).unwrap().text, "\"héllo → wörld\"");
        assert_eq!(rule().scan_all("é {{ü}} ö"), vec!["ü"]);
    }

    #[test]
    fn test_silent_mode_emits_nothing() {
        let ruler = InlineRuler::new();
        let mut state = InlineState::new("{{x}}", &ruler);

        assert!(rule().tokenize(&mut state, true));
        assert_eq!(state.pos, 5);
        assert!(state.finish().is_empty());
    }
}
