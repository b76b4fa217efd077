//! Wires the host, the identifier, the reconciler and the coordinator into
//! the two cell flows: rendering input and executing expressions.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cell::{ExpressionCell, MarkdownCell, SharedCell};
use crate::coordinator::{EvaluationCoordinator, EvaluationOutcome};
use crate::identify::PlaceholderMatcher;
use crate::kernel::ComputeEngine;
use crate::markup::{MarkupRenderer, ParagraphRenderer};
use crate::mime::{MimeRegistry, RenderMimeRegistry};
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::tree::{NodeTree, OutputTree};
use crate::{ImarkdownConfig, Result};

/// What an execution did to a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// What happened to the kernel reply.
    pub evaluation: EvaluationOutcome,
    /// What the follow-up render did.
    pub reconcile: ReconcileOutcome,
}

/// The expression lifecycle for cells rendering into `T`.
///
/// # Example
/// ```rust
/// use imarkdown_core::{ImarkdownConfig, ImarkdownRuntime, MarkdownCell, MockKernel};
///
/// # #[tokio::main]
/// # async fn main() -> imarkdown_core::Result<()> {
/// let runtime = ImarkdownRuntime::new(ImarkdownConfig::default())?
///     .with_engine(MockKernel::new().with_value("x + 1", "2"));
///
/// let cell = MarkdownCell::new("x + 1 = {{x + 1}}").into_shared();
/// runtime.render_input(&cell).await?;
/// runtime.execute_cell(&cell).await?;
///
/// assert_eq!(cell.lock().await.tree().to_html(),
///     "<p>x + 1 = <span class=\"im-RenderedText im-rendered im-result\" data-mime-type=\"text/plain\">2</span></p>");
/// # Ok(())
/// # }
/// ```
pub struct ImarkdownRuntime<T: OutputTree = NodeTree> {
    config: Arc<ImarkdownConfig>,
    host: Arc<dyn MarkupRenderer<T>>,
    matcher: PlaceholderMatcher,
    reconciler: Reconciler,
    coordinator: EvaluationCoordinator,
}

impl ImarkdownRuntime<NodeTree> {
    /// Create a runtime with the built-in host and mime registry.
    pub fn new(config: ImarkdownConfig) -> Result<Self> {
        let config = Arc::new(config);
        let host = ParagraphRenderer::new(&config)?;
        let registry = MimeRegistry::new(&config);
        Ok(Self::with_parts(config, Arc::new(host), Arc::new(registry)))
    }
}

impl<T: OutputTree> ImarkdownRuntime<T> {
    /// Create a runtime from explicit collaborators.
    pub fn with_parts(
        config: Arc<ImarkdownConfig>,
        host: Arc<dyn MarkupRenderer<T>>,
        registry: Arc<dyn RenderMimeRegistry>,
    ) -> Self {
        Self {
            matcher: PlaceholderMatcher::from_config(&config),
            reconciler: Reconciler::new(registry, Arc::clone(&config)),
            coordinator: EvaluationCoordinator::new(Arc::clone(&config)),
            host,
            config,
        }
    }

    /// Builder: Attach a kernel.
    pub fn with_engine(mut self, engine: impl ComputeEngine + 'static) -> Self {
        self.coordinator = self.coordinator.with_engine(engine);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &ImarkdownConfig {
        &self.config
    }

    /// The placeholder matcher.
    pub fn matcher(&self) -> &PlaceholderMatcher {
        &self.matcher
    }

    /// The reconciler.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// The coordinator.
    pub fn coordinator(&self) -> &EvaluationCoordinator {
        &self.coordinator
    }

    /// Mutable coordinator, for attaching or detaching kernels.
    pub fn coordinator_mut(&mut self) -> &mut EvaluationCoordinator {
        &mut self.coordinator
    }

    /// Render a shared cell's source. See [`render_cell`](Self::render_cell).
    pub async fn render_input(&self, cell: &SharedCell<T>) -> Result<bool> {
        let mut guard = cell.lock().await;
        self.render_cell(&mut guard).await
    }

    /// Render the cell's source if it changed since the last render.
    ///
    /// Renders the markup, re-identifies expressions, restores stored
    /// results and frees the nodes that were replaced. Then it resolves the
    /// render gate. Returns false when the source
    /// was unchanged and nothing happened. A failed restore is logged and
    /// leaves the placeholders in place; a failed host render clears the
    /// expressions and is returned.
    #[instrument(skip(self, cell), fields(cell_id = %cell.id()))]
    pub async fn render_cell(&self, cell: &mut MarkdownCell<T>) -> Result<bool> {
        if !cell.needs_render() {
            debug!("Source unchanged, skipping render");
            return Ok(false);
        }

        let source = cell.begin_render();
        if let Err(e) = self.host.render(&source, cell.tree_mut()).await {
            warn!(host = self.host.name(), "Markup render failed: {}", e);
            cell.clear_expressions();
            cell.tree_mut().release_holding();
            cell.finish_render();
            return Err(e);
        }

        let found = cell.identify_expressions(&self.matcher).len();
        match self.reconciler.reconcile(cell).await {
            Ok(outcome) => debug!(expressions = found, ?outcome, "Rendered cell"),
            Err(e) => warn!("Could not restore stored results: {}", e),
        }
        let freed = cell.tree_mut().release_holding();
        debug!(freed, "Released detached nodes");
        cell.finish_render();
        Ok(true)
    }

    /// Evaluate the cell's expressions and render the results.
    ///
    /// Waits for the current render to finish first. If evaluation fails the
    /// cell is still reconciled against whatever record it holds before the
    /// error is returned.
    pub async fn execute_cell(&self, cell: &SharedCell<T>) -> Result<ExecutionReport> {
        let gate = cell.lock().await.done_rendering();
        gate.wait().await?;

        let evaluation = self.coordinator.evaluate_shared(cell).await;
        if let Err(e) = &evaluation {
            warn!("Expression evaluation failed: {}", e);
        }

        let reconcile = {
            let mut guard = cell.lock().await;
            let reconcile = self.reconciler.reconcile(&mut *guard).await;
            guard.tree_mut().release_holding();
            reconcile
        };

        let evaluation = evaluation?;
        let reconcile = reconcile?;
        info!(?evaluation, replaced = reconcile.replaced(), "Executed cell");
        Ok(ExecutionReport {
            evaluation,
            reconcile,
        })
    }
}
