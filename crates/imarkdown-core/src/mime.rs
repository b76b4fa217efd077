//! Mime renderer registry.
//!
//! Results arrive as mime bundles. The registry picks the representation to
//! show, honoring the cell's trust, and produces a renderer for it.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use crate::expression::{MimeBundle, STDERR_MIMETYPE};
use crate::tree::Fragment;
use crate::{ImarkdownConfig, ImarkdownError, Result};

/// Plain text mime type.
pub const PLAIN_TEXT_MIMETYPE: &str = "text/plain";

/// HTML mime type.
pub const HTML_MIMETYPE: &str = "text/html";

/// A value wrapped in one pair of matching quotes.
const QUOTED_PATTERN: &str = r#"^(?:"(.*)"|'(.*)')$"#;

static QUOTED_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_quoted_regex() -> &'static Regex {
    QUOTED_REGEX.get_or_init(|| Regex::new(QUOTED_PATTERN).expect("Invalid quoted value regex"))
}

/// Strip one pair of matching outer quotes: `'hello'` becomes `hello`.
pub fn strip_quotes(text: &str) -> &str {
    get_quoted_regex()
        .captures(text)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map_or(text, |m| m.as_str())
}

/// Flatten a bundle value to text. Line lists are concatenated.
pub fn bundle_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(lines) => lines
            .iter()
            .map(|line| match line {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => other.to_string(),
    }
}

/// Which renderers may be chosen for a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Any renderer.
    Any,
    /// Safe renderers only.
    Ensure,
    /// Safe renderers first, unsafe ones as a fallback.
    Prefer,
}

impl TrustPolicy {
    /// The policy for a cell's trust flag.
    pub fn for_trusted(trusted: bool) -> Self {
        if trusted {
            TrustPolicy::Any
        } else {
            TrustPolicy::Ensure
        }
    }
}

/// A mime bundle ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct MimeModel {
    /// Representations keyed by mime type.
    pub data: MimeBundle,
    /// Display metadata.
    pub metadata: Map<String, Value>,
    /// Whether the source is trusted.
    pub trusted: bool,
}

impl MimeModel {
    /// Create a model.
    pub fn new(data: MimeBundle, metadata: Map<String, Value>, trusted: bool) -> Self {
        Self {
            data,
            metadata,
            trusted,
        }
    }

    /// Text of one representation.
    pub fn text(&self, mime_type: &str) -> Option<String> {
        self.data.get(mime_type).map(bundle_text)
    }
}

/// Renders one mime type into a fragment.
#[async_trait]
pub trait MimeRenderer: Send + Sync {
    /// The mime type this renderer was created for.
    fn mime_type(&self) -> &str;

    /// Render the model.
    async fn render(&self, model: &MimeModel) -> Result<Fragment>;
}

/// Creates renderers for a set of mime types.
pub trait RendererFactory: Send + Sync {
    /// Mime types handled, most preferred first.
    fn mime_types(&self) -> &[String];

    /// Whether output is safe for untrusted sources.
    fn safe(&self) -> bool;

    /// Lower ranks are preferred.
    fn rank(&self) -> i32;

    /// Create a renderer for `mime_type`.
    fn create_renderer(&self, mime_type: &str) -> Box<dyn MimeRenderer>;
}

/// The registry interface consumed by the reconciler.
pub trait RenderMimeRegistry: Send + Sync {
    /// Wrap a bundle in a model.
    fn create_model(&self, data: MimeBundle, metadata: Map<String, Value>, trusted: bool) -> MimeModel {
        MimeModel::new(data, metadata, trusted)
    }

    /// The best mime type in `bundle` allowed by `policy`.
    fn preferred_mime_type(&self, bundle: &MimeBundle, policy: TrustPolicy) -> Option<String>;

    /// A renderer for `mime_type`.
    fn create_renderer(&self, mime_type: &str) -> Result<Box<dyn MimeRenderer>>;
}

/// Renders text as an escaped text node.
pub struct TextRenderer {
    mime_type: String,
    strip_quotes: bool,
}

#[async_trait]
impl MimeRenderer for TextRenderer {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn render(&self, model: &MimeModel) -> Result<Fragment> {
        let text = model.text(&self.mime_type).unwrap_or_default();
        let text = if self.strip_quotes {
            strip_quotes(&text).to_string()
        } else {
            text
        };
        Ok(Fragment::element("span")
            .with_class("im-RenderedText")
            .with_attr("data-mime-type", self.mime_type.as_str())
            .with_child(Fragment::text(text)))
    }
}

/// Factory for [`TextRenderer`].
pub struct TextRendererFactory {
    mime_types: Vec<String>,
    rank: i32,
    strip_quotes: bool,
}

impl TextRendererFactory {
    /// Create a factory.
    pub fn new(mime_types: &[&str], rank: i32, strip_quotes: bool) -> Self {
        Self {
            mime_types: mime_types.iter().map(|m| m.to_string()).collect(),
            rank,
            strip_quotes,
        }
    }
}

impl RendererFactory for TextRendererFactory {
    fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    fn safe(&self) -> bool {
        true
    }

    fn rank(&self) -> i32 {
        self.rank
    }

    fn create_renderer(&self, mime_type: &str) -> Box<dyn MimeRenderer> {
        Box::new(TextRenderer {
            mime_type: mime_type.to_string(),
            strip_quotes: self.strip_quotes,
        })
    }
}

/// Emits HTML verbatim. Unsafe.
pub struct HtmlRenderer;

#[async_trait]
impl MimeRenderer for HtmlRenderer {
    fn mime_type(&self) -> &str {
        HTML_MIMETYPE
    }

    async fn render(&self, model: &MimeModel) -> Result<Fragment> {
        let html = model
            .text(HTML_MIMETYPE)
            .ok_or_else(|| ImarkdownError::RenderError("Bundle has no text/html entry".to_string()))?;
        Ok(Fragment::element("span")
            .with_class("im-RenderedHTML")
            .with_child(Fragment::raw(html)))
    }
}

/// Factory for [`HtmlRenderer`].
pub struct HtmlRendererFactory {
    mime_types: Vec<String>,
}

impl Default for HtmlRendererFactory {
    fn default() -> Self {
        Self {
            mime_types: vec![HTML_MIMETYPE.to_string()],
        }
    }
}

impl RendererFactory for HtmlRendererFactory {
    fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    fn safe(&self) -> bool {
        false
    }

    fn rank(&self) -> i32 {
        50
    }

    fn create_renderer(&self, _mime_type: &str) -> Box<dyn MimeRenderer> {
        Box::new(HtmlRenderer)
    }
}

/// Rank-ordered collection of renderer factories.
///
/// # Example
/// ```rust
/// use imarkdown_core::{ImarkdownConfig, MimeRegistry, RenderMimeRegistry, TrustPolicy};
/// use serde_json::json;
///
/// let registry = MimeRegistry::new(&ImarkdownConfig::default());
/// let bundle = json!({"text/html": "<b>2</b>", "text/plain": "2"});
/// let bundle = bundle.as_object().unwrap();
///
/// assert_eq!(registry.preferred_mime_type(bundle, TrustPolicy::Any).as_deref(), Some("text/html"));
/// assert_eq!(registry.preferred_mime_type(bundle, TrustPolicy::Ensure).as_deref(), Some("text/plain"));
/// ```
#[derive(Default)]
pub struct MimeRegistry {
    factories: Vec<Arc<dyn RendererFactory>>,
}

impl MimeRegistry {
    /// Create a registry with no factories.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in HTML, plain text and stderr factories.
    pub fn new(config: &ImarkdownConfig) -> Self {
        let mut registry = Self::empty();
        registry.add_factory(Arc::new(HtmlRendererFactory::default()));
        registry.add_factory(Arc::new(TextRendererFactory::new(
            &[PLAIN_TEXT_MIMETYPE],
            100,
            config.strip_quotes,
        )));
        registry.add_factory(Arc::new(TextRendererFactory::new(&[STDERR_MIMETYPE], 110, false)));
        registry
    }

    /// Add a factory, keeping factories ordered by rank.
    pub fn add_factory(&mut self, factory: Arc<dyn RendererFactory>) {
        let index = self.factories.partition_point(|f| f.rank() <= factory.rank());
        self.factories.insert(index, factory);
    }

    /// Builder: Add a factory.
    pub fn with_factory(mut self, factory: Arc<dyn RendererFactory>) -> Self {
        self.add_factory(factory);
        self
    }

    /// All registered mime types in preference order.
    pub fn mime_types(&self) -> Vec<&str> {
        self.factories
            .iter()
            .flat_map(|f| f.mime_types().iter().map(String::as_str))
            .collect()
    }
}

impl RenderMimeRegistry for MimeRegistry {
    fn preferred_mime_type(&self, bundle: &MimeBundle, policy: TrustPolicy) -> Option<String> {
        let mut fallback = None;
        for factory in &self.factories {
            for mime_type in factory.mime_types() {
                if !bundle.contains_key(mime_type) {
                    continue;
                }
                if policy == TrustPolicy::Any || factory.safe() {
                    return Some(mime_type.clone());
                }
                if policy == TrustPolicy::Prefer && fallback.is_none() {
                    fallback = Some(mime_type.clone());
                }
            }
        }
        fallback
    }

    fn create_renderer(&self, mime_type: &str) -> Result<Box<dyn MimeRenderer>> {
        self.factories
            .iter()
            .find(|f| f.mime_types().iter().any(|m| m == mime_type))
            .map(|f| f.create_renderer(mime_type))
            .ok_or_else(|| ImarkdownError::RenderError(format!("No renderer for mime type '{}'", mime_type)))
    }
}
