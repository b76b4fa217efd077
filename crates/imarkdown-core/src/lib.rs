//! # imarkdown Core
//!
//! Inline expressions for Markdown cells, evaluated by an external compute
//! kernel.
//!
//! ## Features
//!
//! - `{{ expression }}` directive scanner for the host's inline rule chain
//! - Placeholder identification in the rendered output tree
//! - Batched evaluation with request/cell correlation
//! - Persisted results restored on re-render, guarded against staleness
//! - Render-completion gate sequencing execution after rendering
//!
//! ## Example
//!
//! ```rust
//! use imarkdown_core::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let runtime = ImarkdownRuntime::new(ImarkdownConfig::default())?
//!     .with_engine(MockKernel::new().with_value("x + 1", "2"));
//!
//! let cell = MarkdownCell::new("Answer: {{x + 1}}").into_shared();
//! runtime.render_input(&cell).await?;
//! let report = runtime.execute_cell(&cell).await?;
//!
//! assert_eq!(report.reconcile.replaced(), 1);
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod expression;
pub mod gate;
pub mod identify;
pub mod kernel;
pub mod markup;
pub mod mime;
pub mod notebook;
pub mod reconcile;
pub mod record;
pub mod runtime;
pub mod tokenize;
pub mod tree;

pub use cell::{ExpressionCell, MarkdownCell, SharedCell};
pub use config::ImarkdownConfig;
pub use coordinator::{EvaluationCoordinator, EvaluationOutcome};
pub use error::{ImarkdownError, Result};
pub use expression::{Expression, ExpressionResult, MimeBundle};
pub use gate::{GateController, RenderGate};
pub use identify::{identify_placeholders, PlaceholderMatcher};
pub use kernel::{ComputeEngine, ExecuteReply, ExecuteRequest, MockKernel, ReplyStatus};
pub use markup::{InlineRule, InlineRuler, MarkupRenderer, ParagraphRenderer};
pub use mime::{MimeRegistry, RenderMimeRegistry, TrustPolicy};
pub use notebook::Notebook;
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use record::{RecordMismatch, ResultEntry, ResultRecord};
pub use runtime::{ExecutionReport, ImarkdownRuntime};
pub use tokenize::ExpressionRule;
pub use tree::{Fragment, NodeTree, OutputTree};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        ComputeEngine, ExpressionCell, ImarkdownConfig, ImarkdownError, ImarkdownRuntime,
        MarkdownCell, MockKernel, Notebook, OutputTree, ReconcileOutcome, Result,
        ResultRecord,
    };
}
