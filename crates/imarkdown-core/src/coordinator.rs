//! Evaluation coordinator.
//!
//! Batches a cell's expressions into one kernel request, remembers which cell
//! and which expressions the request was built from, and turns the reply into
//! a result record stored on that cell.
//!
//! A cell has at most one request in flight. Starting a new one supersedes
//! the previous request; its reply is discarded when it eventually arrives.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cell::ExpressionCell;
use crate::expression::Expression;
use crate::kernel::{ComputeEngine, ExecuteContent, ExecuteReply, ExecuteRequest, ReplyStatus, CELL_ID_KEY};
use crate::record::{ResultEntry, ResultRecord};
use crate::{ImarkdownConfig, ImarkdownError, Result};

/// Snapshot taken when a request is submitted.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Cell that issued the request.
    pub cell_id: String,
    /// Expressions as they were at submission time.
    pub expressions: Vec<Expression>,
}

/// A request ready to be sent to the kernel.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Correlation id for the reply.
    pub request_id: Uuid,
    /// The request itself.
    pub request: ExecuteRequest,
}

/// What happened to a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// Results were stored on the cell.
    Stored {
        /// Entries written to the record.
        entries: usize,
        /// Reply keys that matched no submitted expression.
        skipped: usize,
    },
    /// The kernel replied with a non-ok status. Nothing was stored.
    Rejected(ReplyStatus),
    /// The request had been superseded. Nothing was stored.
    Superseded,
}

impl EvaluationOutcome {
    /// Whether a record was written.
    pub fn is_stored(&self) -> bool {
        matches!(self, EvaluationOutcome::Stored { .. })
    }
}

/// Removes a request from the pending table when dropped.
///
/// Covers every way an evaluation can end, including the caller dropping
/// the future while the kernel is still working.
struct PendingGuard<'a> {
    pending: &'a DashMap<Uuid, PendingRequest>,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(&self.request_id).is_some() {
            debug!(request_id = %self.request_id, "Dropped unanswered request");
        }
    }
}

/// Correlates kernel requests with the cells that issued them.
pub struct EvaluationCoordinator {
    engine: Option<Arc<dyn ComputeEngine>>,
    config: Arc<ImarkdownConfig>,
    pending: DashMap<Uuid, PendingRequest>,
}

impl EvaluationCoordinator {
    /// Create a coordinator with no kernel attached.
    pub fn new(config: Arc<ImarkdownConfig>) -> Self {
        Self {
            engine: None,
            config,
            pending: DashMap::new(),
        }
    }

    /// Builder: Attach a kernel.
    pub fn with_engine(self, engine: impl ComputeEngine + 'static) -> Self {
        self.with_shared_engine(Arc::new(engine))
    }

    /// Builder: Attach a shared kernel.
    pub fn with_shared_engine(mut self, engine: Arc<dyn ComputeEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Attach or replace the kernel.
    pub fn attach_engine(&mut self, engine: Arc<dyn ComputeEngine>) {
        info!("Attached kernel '{}'", engine.name());
        self.engine = Some(engine);
    }

    /// Detach the kernel. Requests already in flight still complete.
    pub fn detach_engine(&mut self) -> Option<Arc<dyn ComputeEngine>> {
        self.engine.take()
    }

    /// Whether a kernel is attached.
    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `cell_id` has a request awaiting a reply.
    pub fn is_pending(&self, cell_id: &str) -> bool {
        self.pending.iter().any(|entry| entry.cell_id == cell_id)
    }

    fn engine(&self) -> Result<Arc<dyn ComputeEngine>> {
        self.engine.clone().ok_or(ImarkdownError::NoKernel)
    }

    /// Build a request for the cell's current expressions and record it as pending.
    ///
    /// Any request still pending for the same cell is superseded.
    pub fn begin<C: ExpressionCell + ?Sized>(&self, cell: &C) -> Result<Submission> {
        if self.engine.is_none() {
            return Err(ImarkdownError::NoKernel);
        }

        let expressions = cell.expressions().to_vec();
        let user_expressions: BTreeMap<String, String> = expressions
            .iter()
            .map(|e| (e.key(), e.text.clone()))
            .collect();

        let mut metadata = cell.metadata().clone();
        metadata.insert(CELL_ID_KEY.to_string(), Value::String(cell.id().to_string()));

        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.cell_id != cell.id());
        if self.pending.len() < before {
            debug!(cell_id = %cell.id(), "Superseded pending request");
        }

        let request_id = Uuid::new_v4();
        self.pending.insert(
            request_id,
            PendingRequest {
                cell_id: cell.id().to_string(),
                expressions,
            },
        );

        Ok(Submission {
            request_id,
            request: ExecuteRequest {
                content: ExecuteContent::expressions(user_expressions),
                metadata,
            },
        })
    }

    /// Apply a reply to the cell that issued the request.
    ///
    /// Results are matched to the expressions captured by [`begin`](Self::begin),
    /// not to whatever the cell holds now, and stored in expression order.
    pub fn complete<C: ExpressionCell + ?Sized>(
        &self,
        request_id: Uuid,
        reply: ExecuteReply,
        cell: &mut C,
    ) -> Result<EvaluationOutcome> {
        let Some(owner) = self.pending.get(&request_id).map(|p| p.cell_id.clone()) else {
            warn!(%request_id, "Discarding reply for superseded request");
            return Ok(EvaluationOutcome::Superseded);
        };
        if owner != cell.id() {
            return Err(ImarkdownError::CellMismatch {
                expected: owner,
                found: cell.id().to_string(),
            });
        }
        let Some((_, pending)) = self.pending.remove(&request_id) else {
            return Ok(EvaluationOutcome::Superseded);
        };

        if reply.status != ReplyStatus::Ok {
            warn!(
                cell_id = %owner,
                status = ?reply.status,
                ename = reply.ename.as_deref().unwrap_or_default(),
                "Kernel rejected expression request"
            );
            return Ok(EvaluationOutcome::Rejected(reply.status));
        }

        let mut ordered = BTreeMap::new();
        let mut skipped = 0;
        for (key, result) in reply.user_expressions {
            // Ordinals are contiguous from zero, so they index the snapshot.
            let expression = key.parse::<usize>().ok().and_then(|i| pending.expressions.get(i));
            match expression {
                Some(expression) => {
                    ordered.insert(
                        expression.ordinal,
                        ResultEntry::new(expression.text.clone(), result),
                    );
                }
                None => {
                    warn!(cell_id = %owner, key = %key, "Reply key matches no submitted expression");
                    skipped += 1;
                }
            }
        }

        let record = ResultRecord::new(ordered.into_values().collect());
        record.store(cell.metadata_mut(), &self.config.metadata_key)?;
        info!(cell_id = %owner, entries = record.len(), "Stored expression results");

        Ok(EvaluationOutcome::Stored {
            entries: record.len(),
            skipped,
        })
    }

    /// Evaluate the cell's expressions and store the results on it.
    #[instrument(skip(self, cell), fields(cell_id = %cell.id()))]
    pub async fn evaluate<C: ExpressionCell + ?Sized>(&self, cell: &mut C) -> Result<EvaluationOutcome> {
        let engine = self.engine()?;
        let submission = self.begin(cell)?;
        let _pending = self.guard(submission.request_id);
        let reply = self.send(engine.as_ref(), &submission).await?;
        self.complete(submission.request_id, reply, cell)
    }

    /// Like [`evaluate`](Self::evaluate) for a cell behind a lock.
    ///
    /// The lock is released while the kernel works, so the cell can be edited
    /// and re-rendered in the meantime.
    pub async fn evaluate_shared<C: ExpressionCell>(&self, cell: &Arc<Mutex<C>>) -> Result<EvaluationOutcome> {
        let engine = self.engine()?;
        let submission = {
            let guard = cell.lock().await;
            self.begin(&*guard)?
        };
        let _pending = self.guard(submission.request_id);
        let reply = self.send(engine.as_ref(), &submission).await?;
        let mut guard = cell.lock().await;
        self.complete(submission.request_id, reply, &mut *guard)
    }

    async fn send(&self, engine: &dyn ComputeEngine, submission: &Submission) -> Result<ExecuteReply> {
        debug!(
            request_id = %submission.request_id,
            expressions = submission.request.content.user_expressions.len(),
            kernel = engine.name(),
            "Submitting expressions"
        );
        engine.execute(submission.request.clone()).await
    }

    fn guard(&self, request_id: Uuid) -> PendingGuard<'_> {
        PendingGuard {
            pending: &self.pending,
            request_id,
        }
    }
}
