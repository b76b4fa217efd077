//! Host markup pipeline.
//!
//! The host owns an ordered chain of inline rules. Each rule is offered the
//! current position and either consumes input (emitting tokens) or declines.
//! The directive scanner plugs into this chain; [`ParagraphRenderer`] is a
//! minimal host that turns Markdown paragraphs and headings into an
//! [`OutputTree`].

use async_trait::async_trait;

use crate::tokenize::ExpressionRule;
use crate::tree::{Fragment, OutputTree};
use crate::{ImarkdownConfig, ImarkdownError, Result};

/// A single inline token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token kind (`text`, `em_open`, `expr`, ...).
    pub kind: String,
    /// Output tag, empty for text.
    pub tag: String,
    /// 1 opens an element, -1 closes it, 0 is self-contained.
    pub nesting: i8,
    /// Attributes in insertion order.
    pub attrs: Vec<(String, String)>,
    /// Text payload.
    pub content: String,
}

impl Token {
    /// Create a token without attributes or content.
    pub fn new(kind: impl Into<String>, tag: impl Into<String>, nesting: i8) -> Self {
        Self {
            kind: kind.into(),
            tag: tag.into(),
            nesting,
            attrs: Vec::new(),
            content: String::new(),
        }
    }

    /// Set an attribute, replacing any previous value.
    pub fn attr_set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    /// Get an attribute value.
    pub fn attr_get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A run of `*` or `_` characters that may open or close emphasis.
///
/// Each character of a run is recorded separately. Delimiters are paired
/// only after the whole span has been tokenized, so a marker can never cut
/// into a construct another rule consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiter {
    /// `*` or `_`.
    pub marker: u8,
    /// Byte offset of the run this character belongs to.
    pub run: usize,
    /// Index of the text token holding the marker.
    pub token: usize,
    /// Whether the run is left-flanking (and allowed to open).
    pub can_open: bool,
    /// Whether the run is right-flanking (and allowed to close).
    pub can_close: bool,
}

/// Mutable state of one inline parse.
///
/// Rules must only look at `src[pos..pos_max]`.
pub struct InlineState<'a> {
    /// The full inline source.
    pub src: &'a str,
    /// Current byte offset.
    pub pos: usize,
    /// Exclusive end of the span being tokenized.
    pub pos_max: usize,
    /// Emitted tokens.
    pub tokens: Vec<Token>,
    /// Emphasis delimiters in source order.
    pub delimiters: Vec<Delimiter>,
    pending: String,
    ruler: &'a InlineRuler,
}

impl<'a> InlineState<'a> {
    /// Start a parse over the whole of `src`.
    pub fn new(src: &'a str, ruler: &'a InlineRuler) -> Self {
        Self {
            src,
            pos: 0,
            pos_max: src.len(),
            tokens: Vec::new(),
            delimiters: Vec::new(),
            pending: String::new(),
            ruler,
        }
    }

    /// Push a token, flushing pending text first.
    pub fn push(&mut self, kind: &str, tag: &str, nesting: i8) -> &mut Token {
        self.flush_pending();
        let index = self.tokens.len();
        self.tokens.push(Token::new(kind, tag, nesting));
        &mut self.tokens[index]
    }

    /// Queue plain text; consecutive text is merged into one token.
    pub fn push_pending(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// Emit one marker character as text and remember it as a delimiter.
    pub fn push_delimiter(&mut self, marker: u8, run: usize, can_open: bool, can_close: bool) {
        let token = self.tokens.len() + usize::from(!self.pending.is_empty());
        self.push("text", "", 0).content = char::from(marker).to_string();
        self.delimiters.push(Delimiter {
            marker,
            run,
            token,
            can_open,
            can_close,
        });
    }

    /// Run the rule chain over `pos..pos_max`.
    pub fn tokenize_span(&mut self) {
        let ruler = self.ruler;
        ruler.run(self);
    }

    /// Finish the parse: pair emphasis delimiters and merge adjacent text.
    pub fn finish(mut self) -> Vec<Token> {
        self.flush_pending();
        balance_emphasis(&mut self.tokens, &self.delimiters);
        join_text(self.tokens)
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut token = Token::new("text", "", 0);
        token.content = std::mem::take(&mut self.pending);
        self.tokens.push(token);
    }
}

/// Turn matched delimiter pairs into `em_open` / `em_close`.
///
/// Each closer takes the nearest earlier opener with the same marker from a
/// different run. Openers between the two are dropped, which keeps the
/// result properly nested.
fn balance_emphasis(tokens: &mut [Token], delimiters: &[Delimiter]) {
    let mut openers: Vec<&Delimiter> = Vec::new();
    for delimiter in delimiters {
        if delimiter.can_close {
            let found = openers
                .iter()
                .rposition(|o| o.marker == delimiter.marker && o.run != delimiter.run);
            if let Some(at) = found {
                let opener = openers[at];
                openers.truncate(at);
                mark(&mut tokens[opener.token], "em_open", 1);
                mark(&mut tokens[delimiter.token], "em_close", -1);
                continue;
            }
        }
        if delimiter.can_open {
            openers.push(delimiter);
        }
    }
}

fn mark(token: &mut Token, kind: &str, nesting: i8) {
    token.kind = kind.to_string();
    token.tag = "em".to_string();
    token.nesting = nesting;
    token.content.clear();
}

fn join_text(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match out.last_mut() {
            Some(last) if last.kind == "text" && token.kind == "text" => {
                last.content.push_str(&token.content);
            }
            _ => out.push(token),
        }
    }
    out
}

/// A rule in the host's inline chain.
pub trait InlineRule: Send + Sync {
    /// Name used to position other rules relative to this one.
    fn name(&self) -> &str;

    /// Try to consume input at `state.pos`.
    ///
    /// On success the rule advances `state.pos` and returns true. In silent
    /// mode it must not emit tokens. On failure `state.pos` is left untouched.
    fn tokenize(&self, state: &mut InlineState<'_>, silent: bool) -> bool;
}

/// Ordered chain of inline rules.
#[derive(Default)]
pub struct InlineRuler {
    rules: Vec<Box<dyn InlineRule>>,
}

impl InlineRuler {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the default chain: text, then emphasis.
    pub fn with_defaults() -> Self {
        let mut ruler = Self::new();
        ruler.push(TextRule);
        ruler.push(EmphasisRule);
        ruler
    }

    /// Append a rule to the end of the chain.
    pub fn push(&mut self, rule: impl InlineRule + 'static) {
        self.rules.push(Box::new(rule));
    }

    /// Insert a rule directly after the rule named `anchor`.
    pub fn insert_after(&mut self, anchor: &str, rule: impl InlineRule + 'static) -> Result<()> {
        let index = self
            .rules
            .iter()
            .position(|r| r.name() == anchor)
            .ok_or_else(|| ImarkdownError::ConfigError(format!("No inline rule named '{}'", anchor)))?;
        self.rules.insert(index + 1, Box::new(rule));
        Ok(())
    }

    /// Rule names in chain order.
    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Tokenize an inline source.
    pub fn parse(&self, src: &str) -> Vec<Token> {
        let mut state = InlineState::new(src, self);
        state.tokenize_span();
        state.finish()
    }

    fn run(&self, state: &mut InlineState<'_>) {
        while state.pos < state.pos_max {
            let start = state.pos;
            let mut matched = false;
            for rule in &self.rules {
                if rule.tokenize(state, false) && state.pos > start {
                    matched = true;
                    break;
                }
                state.pos = start;
            }
            if matched {
                continue;
            }
            let Some(ch) = state.src[start..state.pos_max].chars().next() else {
                break;
            };
            let mut buf = [0u8; 4];
            state.push_pending(ch.encode_utf8(&mut buf));
            state.pos = start + ch.len_utf8();
        }
    }
}

/// Consumes runs of characters that no other rule can start on.
pub struct TextRule;

impl InlineRule for TextRule {
    fn name(&self) -> &str {
        "text"
    }

    fn tokenize(&self, state: &mut InlineState<'_>, silent: bool) -> bool {
        let src = state.src;
        let rest = &src[state.pos..state.pos_max];
        let len = rest.find(|c: char| c.is_ascii_punctuation()).unwrap_or(rest.len());
        if len == 0 {
            return false;
        }
        if !silent {
            state.push_pending(&rest[..len]);
        }
        state.pos += len;
        true
    }
}

/// `*em*` and `_em_`, using the CommonMark flanking rules.
///
/// The rule only records delimiter runs; pairing happens in
/// [`InlineState::finish`].
pub struct EmphasisRule;

impl InlineRule for EmphasisRule {
    fn name(&self) -> &str {
        "emphasis"
    }

    fn tokenize(&self, state: &mut InlineState<'_>, silent: bool) -> bool {
        let bytes = state.src.as_bytes();
        let start = state.pos;
        let marker = match bytes.get(start) {
            Some(b @ (b'*' | b'_')) if start < state.pos_max => *b,
            _ => return false,
        };
        let run_end = start
            + bytes[start..state.pos_max]
                .iter()
                .take_while(|b| **b == marker)
                .count();

        if !silent {
            let before = state.src[..start].chars().next_back();
            let after = state.src[run_end..state.pos_max].chars().next();
            let (can_open, can_close) = flanking(marker, before, after);
            for _ in start..run_end {
                state.push_delimiter(marker, start, can_open, can_close);
            }
        }
        state.pos = run_end;
        true
    }
}

fn is_space(c: Option<char>) -> bool {
    c.map_or(true, char::is_whitespace)
}

fn is_punct(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_ascii_punctuation())
}

/// Whether a delimiter run can open and close emphasis.
fn flanking(marker: u8, before: Option<char>, after: Option<char>) -> (bool, bool) {
    let left = !is_space(after) && (!is_punct(after) || is_space(before) || is_punct(before));
    let right = !is_space(before) && (!is_punct(before) || is_space(after) || is_punct(after));
    if marker == b'_' {
        (
            left && (!right || is_punct(before)),
            right && (!left || is_punct(after)),
        )
    } else {
        (left, right)
    }
}

/// The host's render-markup capability.
#[async_trait]
pub trait MarkupRenderer<T: OutputTree>: Send + Sync {
    /// Renderer name for logging.
    fn name(&self) -> &str;

    /// Render `source` into `tree`, replacing its previous contents.
    async fn render(&self, source: &str, tree: &mut T) -> Result<()>;
}

enum Block {
    Heading(usize, String),
    Paragraph(String),
}

/// Minimal Markdown host: ATX headings and paragraphs with inline rules.
///
/// # Example
/// ```rust
/// use imarkdown_core::{ImarkdownConfig, MarkupRenderer, NodeTree, ParagraphRenderer};
///
/// # #[tokio::main]
/// # async fn main() -> imarkdown_core::Result<()> {
/// let renderer = ParagraphRenderer::new(&ImarkdownConfig::default())?;
/// let mut tree = NodeTree::new();
/// renderer.render("Total: {{x}}", &mut tree).await?;
/// assert!(tree.to_html().contains("jupyter-imarkdown-expr"));
/// # Ok(())
/// # }
/// ```
pub struct ParagraphRenderer {
    ruler: InlineRuler,
}

impl ParagraphRenderer {
    /// Create a host with the default rules plus the expression rule.
    pub fn new(config: &ImarkdownConfig) -> Result<Self> {
        let mut ruler = InlineRuler::with_defaults();
        ExpressionRule::install(&mut ruler, config)?;
        Ok(Self { ruler })
    }

    /// Create a host from a prepared rule chain.
    pub fn with_ruler(ruler: InlineRuler) -> Self {
        Self { ruler }
    }

    /// The rule chain.
    pub fn ruler(&self) -> &InlineRuler {
        &self.ruler
    }

    /// Render a source into detached fragments.
    pub fn fragments(&self, source: &str) -> Vec<Fragment> {
        split_blocks(source)
            .into_iter()
            .map(|block| {
                let (tag, text) = match block {
                    Block::Heading(level, text) => (format!("h{}", level), text),
                    Block::Paragraph(text) => ("p".to_string(), text),
                };
                let children = tokens_to_fragments(self.ruler.parse(&text));
                Fragment::Element {
                    tag,
                    attrs: Vec::new(),
                    children,
                }
            })
            .collect()
    }
}

#[async_trait]
impl<T: OutputTree> MarkupRenderer<T> for ParagraphRenderer {
    fn name(&self) -> &str {
        "paragraph"
    }

    async fn render(&self, source: &str, tree: &mut T) -> Result<()> {
        let fragments = self.fragments(source);
        let root = tree.root();
        tree.clear(root);
        for fragment in fragments {
            tree.append(root, fragment);
        }
        Ok(())
    }
}

fn split_blocks(source: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    let flush = |lines: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        if !lines.is_empty() {
            blocks.push(Block::Paragraph(lines.join("\n")));
            lines.clear();
        }
    };

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush(&mut lines, &mut blocks);
            continue;
        }
        if let Some((level, text)) = parse_heading(line) {
            flush(&mut lines, &mut blocks);
            blocks.push(Block::Heading(level, text.to_string()));
            continue;
        }
        lines.push(line);
    }
    flush(&mut lines, &mut blocks);
    blocks
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.bytes().take_while(|b| *b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim()))
}

fn tokens_to_fragments(tokens: Vec<Token>) -> Vec<Fragment> {
    let mut open: Vec<Fragment> = Vec::new();
    let mut top: Vec<Fragment> = Vec::new();

    for token in tokens {
        match token.nesting {
            1 => open.push(Fragment::Element {
                tag: token.tag,
                attrs: token.attrs,
                children: Vec::new(),
            }),
            -1 => {
                if let Some(element) = open.pop() {
                    push_child(&mut open, &mut top, element);
                }
            }
            _ => {
                let node = if token.kind == "text" {
                    Fragment::Text(token.content)
                } else {
                    Fragment::Element {
                        tag: token.tag,
                        attrs: token.attrs,
                        children: Vec::new(),
                    }
                };
                push_child(&mut open, &mut top, node);
            }
        }
    }
    while let Some(element) = open.pop() {
        push_child(&mut open, &mut top, element);
    }
    top
}

fn push_child(open: &mut [Fragment], top: &mut Vec<Fragment>, node: Fragment) {
    match open.last_mut() {
        Some(Fragment::Element { children, .. }) => children.push(node),
        _ => top.push(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeTree;

    #[test]
    fn test_text_and_emphasis() {
        let ruler = InlineRuler::with_defaults();
        let tokens = ruler.parse("a *b* c");
        let kinds: Vec<&str> = tokens.iter().map(|t| t.kind.as_str()).collect();

        assert_eq!(kinds, vec!["text", "em_open", "text", "em_close", "text"]);
        assert_eq!(tokens[2].content, "b");
    }

    #[test]
    fn test_unmatched_punctuation_is_text() {
        let ruler = InlineRuler::with_defaults();
        let tokens = ruler.parse("a * b {");

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].content, "a * b {");
    }

    #[test]
    fn test_insert_after_unknown_anchor() {
        let mut ruler = InlineRuler::with_defaults();
        let err = ruler.insert_after("link", TextRule).unwrap_err();
        assert!(matches!(err, ImarkdownError::ConfigError(_)));
    }

    #[test]
    fn test_expression_rule_follows_emphasis() {
        let renderer = ParagraphRenderer::new(&ImarkdownConfig::default()).unwrap();
        assert_eq!(renderer.ruler().names(), vec!["text", "emphasis", "expr"]);
    }

    fn expressions(source: &str) -> Vec<String> {
        let renderer = ParagraphRenderer::new(&ImarkdownConfig::default()).unwrap();
        renderer
            .ruler()
            .parse(source)
            .into_iter()
            .filter(|t| t.kind == "expr")
            .map(|t| t.content)
            .collect()
    }

    #[test]
    fn test_intraword_underscore_keeps_directive() {
        assert_eq!(
            expressions("Column total_sales is {{total_sales}}"),
            vec!["total_sales"]
        );
        assert_eq!(expressions("_a {{b_c}}"), vec!["b_c"]);
    }

    #[test]
    fn test_loose_star_keeps_directive() {
        assert_eq!(expressions("Price: 3 * {{n*2}}"), vec!["n*2"]);
        assert_eq!(expressions("*a {{x*}}"), vec!["x*"]);
    }

    #[test]
    fn test_marker_inside_directive_does_not_close_emphasis() {
        let renderer = ParagraphRenderer::new(&ImarkdownConfig::default()).unwrap();
        let tokens = renderer.ruler().parse("*a {{b*c}} d*");
        let kinds: Vec<&str> = tokens.iter().map(|t| t.kind.as_str()).collect();

        assert_eq!(kinds, vec!["em_open", "text", "expr", "text", "em_close"]);
        assert_eq!(tokens[2].content, "b*c");
    }

    #[test]
    fn test_emphasis_flanking() {
        let ruler = InlineRuler::with_defaults();
        let kinds = |src: &str| -> Vec<String> {
            ruler.parse(src).into_iter().map(|t| t.kind).collect()
        };

        assert_eq!(kinds("snake_case_name"), vec!["text"]);
        assert_eq!(kinds("a*b*c"), vec!["text", "em_open", "text", "em_close", "text"]);
        assert_eq!(kinds("a_b_c"), vec!["text"]);
        assert_eq!(kinds("_x_"), vec!["em_open", "text", "em_close"]);
        assert_eq!(kinds("a**b"), vec!["text"]);
    }

    #[tokio::test]
    async fn test_render_emphasis_around_directive() {
        let renderer = ParagraphRenderer::new(&ImarkdownConfig::default()).unwrap();
        let mut tree = NodeTree::new();

        renderer.render("*{{x}}*", &mut tree).await.unwrap();

        assert_eq!(
            tree.to_html(),
            "<p><em><input type=\"hidden\" class=\"jupyter-imarkdown-expr\" value=\"x\"></em></p>"
        );
    }

    #[tokio::test]
    async fn test_render_blocks() {
        let renderer = ParagraphRenderer::new(&ImarkdownConfig::default()).unwrap();
        let mut tree = NodeTree::new();

        renderer
            .render("# Title\n\nvalue *is* {{x}}\nnext line", &mut tree)
            .await
            .unwrap();

        assert_eq!(
            tree.to_html(),
            "<h1>Title</h1><p>value <em>is</em> <input type=\"hidden\" \
             class=\"jupyter-imarkdown-expr\" value=\"x\">\nnext line</p>"
        );
    }

    #[tokio::test]
    async fn test_render_replaces_previous_content() {
        let renderer = ParagraphRenderer::new(&ImarkdownConfig::default()).unwrap();
        let mut tree = NodeTree::new();

        renderer.render("first", &mut tree).await.unwrap();
        renderer.render("second", &mut tree).await.unwrap();

        assert_eq!(tree.to_html(), "<p>second</p>");
    }

    #[test]
    fn test_heading_requires_space() {
        assert!(parse_heading("#tag").is_none());
        assert_eq!(parse_heading("### Three").map(|(l, _)| l), Some(3));
        assert!(parse_heading("####### seven").is_none());
    }
}
