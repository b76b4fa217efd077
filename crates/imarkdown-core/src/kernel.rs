//! Compute kernel interface.
//!
//! Defines the request and reply shapes exchanged with the kernel and the
//! trait a kernel connection must implement.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::expression::ExpressionResult;
use crate::Result;

/// Metadata key carrying the id of the requesting cell.
pub const CELL_ID_KEY: &str = "cellId";

/// Body of an execute request.
///
/// Expressions travel in `user_expressions`; `code` stays empty so the kernel
/// runs nothing besides the expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteContent {
    /// Statements to run. Always empty for expression evaluation.
    pub code: String,
    /// Suppress output broadcast.
    pub silent: bool,
    /// Record the request in the kernel's history.
    pub store_history: bool,
    /// Expressions keyed by ordinal (`"0"`, `"1"`, ...).
    pub user_expressions: BTreeMap<String, String>,
    /// Allow the kernel to prompt for input.
    pub allow_stdin: bool,
    /// Abort queued requests on error.
    pub stop_on_error: bool,
}

impl ExecuteContent {
    /// Content evaluating only the given expressions.
    pub fn expressions(user_expressions: BTreeMap<String, String>) -> Self {
        Self {
            code: String::new(),
            silent: false,
            store_history: false,
            user_expressions,
            allow_stdin: false,
            stop_on_error: false,
        }
    }
}

/// A request submitted to the kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    /// Message content.
    pub content: ExecuteContent,
    /// Message metadata: the cell's metadata plus its id under `cellId`.
    pub metadata: Map<String, Value>,
}

/// Status of an execute reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// The request ran.
    Ok,
    /// The request itself failed.
    Error,
    /// The request was aborted before running.
    Aborted,
    /// Any status this client does not know.
    #[serde(other)]
    Unknown,
}

/// Reply content of an execute request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReply {
    /// Overall status.
    pub status: ReplyStatus,
    /// Execution counter, when the kernel reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u64>,
    /// Per-expression results keyed like the request.
    #[serde(default)]
    pub user_expressions: BTreeMap<String, ExpressionResult>,
    /// Exception name for a failed request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ename: Option<String>,
    /// Exception message for a failed request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evalue: Option<String>,
}

impl ExecuteReply {
    /// A successful reply.
    pub fn ok(user_expressions: BTreeMap<String, ExpressionResult>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            execution_count: None,
            user_expressions,
            ename: None,
            evalue: None,
        }
    }

    /// A reply with a non-ok status and no results.
    pub fn with_status(status: ReplyStatus) -> Self {
        Self {
            status,
            ..Self::ok(BTreeMap::new())
        }
    }

    /// A failed request.
    pub fn error(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self {
            ename: Some(ename.into()),
            evalue: Some(evalue.into()),
            ..Self::with_status(ReplyStatus::Error)
        }
    }
}

/// A connection to a compute kernel.
///
/// Implementations deliver exactly one reply per request or fail.
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    /// Get the kernel name.
    fn name(&self) -> &str;

    /// Submit a request and wait for its reply.
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteReply>;

    /// Check if the kernel is reachable.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// A scripted kernel for testing.
///
/// Known expressions get their scripted result; anything else fails like an
/// undefined name would.
#[derive(Debug, Default)]
pub struct MockKernel {
    /// Scripted results (expression text -> result).
    pub results: HashMap<String, ExpressionResult>,
    /// Status forced on every reply.
    pub status: Option<ReplyStatus>,
    requests: Mutex<Vec<ExecuteRequest>>,
}

impl MockKernel {
    /// Create a new mock kernel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a result for an expression.
    pub fn with_result(mut self, expression: impl Into<String>, result: ExpressionResult) -> Self {
        self.results.insert(expression.into(), result);
        self
    }

    /// Script a `text/plain` value for an expression.
    pub fn with_value(self, expression: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_result(expression, ExpressionResult::plain(value))
    }

    /// Force a reply status.
    pub fn with_status(mut self, status: ReplyStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ExecuteRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn evaluate(&self, expression: &str) -> ExpressionResult {
        self.results.get(expression).cloned().unwrap_or_else(|| {
            ExpressionResult::error(
                "NameError",
                format!("name '{}' is not defined", expression.trim()),
                Vec::new(),
            )
        })
    }
}

#[async_trait]
impl ComputeEngine for MockKernel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteReply> {
        let reply = match self.status {
            Some(status) if status != ReplyStatus::Ok => ExecuteReply::with_status(status),
            _ => ExecuteReply::ok(
                request
                    .content
                    .user_expressions
                    .iter()
                    .map(|(key, text)| (key.clone(), self.evaluate(text)))
                    .collect(),
            ),
        };

        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        Ok(reply)
    }
}
