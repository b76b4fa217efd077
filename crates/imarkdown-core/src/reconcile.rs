//! Render reconciler.
//!
//! Replaces each placeholder with the rendering of its persisted result, but
//! only when the stored record still belongs to the cell's current
//! expressions.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::cell::ExpressionCell;
use crate::expression::ExpressionResult;
use crate::mime::{MimeModel, RenderMimeRegistry, TrustPolicy};
use crate::record::{RecordMismatch, ResultRecord};
use crate::tree::Fragment;
use crate::{ImarkdownConfig, Result};

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The cell has no stored record. Placeholders stay.
    NoRecord,
    /// The record belongs to other expressions. Placeholders stay.
    Stale(RecordMismatch),
    /// Placeholders were replaced.
    Rendered {
        /// Placeholders swapped for output.
        replaced: usize,
        /// Of those, how many became error markers.
        markers: usize,
    },
}

impl ReconcileOutcome {
    /// Number of placeholders replaced.
    pub fn replaced(&self) -> usize {
        match self {
            ReconcileOutcome::Rendered { replaced, .. } => *replaced,
            _ => 0,
        }
    }
}

/// Renders stored results into a cell's output tree.
pub struct Reconciler {
    registry: Arc<dyn RenderMimeRegistry>,
    config: Arc<ImarkdownConfig>,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(registry: Arc<dyn RenderMimeRegistry>, config: Arc<ImarkdownConfig>) -> Self {
        Self { registry, config }
    }

    /// The mime registry.
    pub fn registry(&self) -> &Arc<dyn RenderMimeRegistry> {
        &self.registry
    }

    /// Render the cell's stored record into its output tree.
    ///
    /// Metadata is never modified. A record that cannot be parsed is an
    /// error; a record that does not match is reported as stale.
    #[instrument(skip(self, cell), fields(cell_id = %cell.id()))]
    pub async fn reconcile<C: ExpressionCell + ?Sized>(&self, cell: &mut C) -> Result<ReconcileOutcome> {
        let Some(record) = ResultRecord::load(cell.metadata(), &self.config.metadata_key)? else {
            debug!("No stored results");
            return Ok(ReconcileOutcome::NoRecord);
        };
        if let Err(mismatch) = record.check_against(cell.expressions()) {
            warn!("Stored results are stale: {}", mismatch);
            return Ok(ReconcileOutcome::Stale(mismatch));
        }

        let trusted = cell.trusted();
        let mut replaced = 0;
        let mut markers = 0;
        for (ordinal, entry) in record.iter().enumerate() {
            let fragment = match self.render_result(&entry.result, trusted).await {
                Some(fragment) => fragment,
                None => {
                    markers += 1;
                    self.error_marker()
                }
            };
            if cell.replace_expression_node(ordinal, fragment) {
                replaced += 1;
            } else {
                warn!(ordinal, "Placeholder is no longer in the tree");
            }
        }

        debug!(replaced, markers, "Reconciled stored results");
        Ok(ReconcileOutcome::Rendered { replaced, markers })
    }

    /// Build the mime model shown for a result.
    pub fn create_result_model(&self, result: &ExpressionResult, trusted: bool) -> MimeModel {
        let (data, metadata) = result.display_bundle();
        self.registry.create_model(data, metadata, trusted)
    }

    /// Render a result, or `None` when nothing displayable is allowed.
    pub async fn render_result(&self, result: &ExpressionResult, trusted: bool) -> Option<Fragment> {
        let model = self.create_result_model(result, trusted);
        let mime_type = self
            .registry
            .preferred_mime_type(&model.data, TrustPolicy::for_trusted(trusted))?;

        let rendered = match self.registry.create_renderer(&mime_type) {
            Ok(renderer) => renderer.render(&model).await,
            Err(e) => Err(e),
        };
        match rendered {
            Ok(fragment) => Some(
                fragment
                    .with_class(&self.config.rendered_class)
                    .with_class(&self.config.result_class),
            ),
            Err(e) => {
                warn!(mime_type = %mime_type, "Failed to render result: {}", e);
                None
            }
        }
    }

    /// Inline marker shown when a result cannot be displayed.
    pub fn error_marker(&self) -> Fragment {
        Fragment::element("span")
            .with_class(&self.config.rendered_class)
            .with_class(&self.config.error_class)
    }
}
