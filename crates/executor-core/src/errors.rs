use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single scalar value attachable to a [`FailureContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}
impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}
impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}
impl From<i32> for ContextValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}
impl From<f64> for ContextValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}
impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Structured debugging annotations accumulated along the failure path.
///
/// A plain `map of string -> scalar`, built up with [`FailureContext::with`]
/// as an error propagates rather than all at once at the raise site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureContext(BTreeMap<String, ContextValue>);

impl FailureContext {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert; returns `self` so call sites can chain.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, ContextValue> {
        &self.0
    }
}

/// Reasons a [`JobError`] — a fault in the submitted workload — can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFailureReason {
    Timeout,
    NonzeroReturnCode,
    DownloadFailed,
    UploadFailed,
}

/// The submitted workload itself was at fault: timeouts, non-zero exit,
/// or download/upload failure of user-supplied inputs.
///
/// Maps to `V0JobFailedRequest` on the wire (§7). Distinct from
/// [`HordeError`] — different wire message, different downstream billing
/// and routing.
#[derive(Debug, thiserror::Error, Clone)]
#[error("{message}")]
pub struct JobError {
    pub reason: JobFailureReason,
    pub message: String,
    pub context: FailureContext,
}

impl JobError {
    pub fn new(message: impl Into<String>, reason: JobFailureReason) -> Self {
        Self {
            reason,
            message: message.into(),
            context: FailureContext::new(),
        }
    }

    pub fn with_context(mut self, context: FailureContext) -> Self {
        self.context = context;
        self
    }
}

/// Reasons a [`HordeError`] — an infrastructure/executor fault — can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HordeFailureReason {
    SecurityCheckFailed,
    /// Catch-all bucket for an unanticipated exception wrapped at the
    /// driver's top-level boundary (§7).
    Unexpected,
}

/// Infrastructure/executor fault: the timing message was missing, the
/// security gate failed, or an unanticipated exception was caught at the
/// driver boundary.
///
/// Maps to `V0HordeFailedRequest` on the wire (§7).
#[derive(Debug, thiserror::Error, Clone)]
#[error("{message}")]
pub struct HordeError {
    pub reason: HordeFailureReason,
    pub message: String,
    pub context: FailureContext,
}

impl HordeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            reason: HordeFailureReason::Unexpected,
            message: message.into(),
            context: FailureContext::new(),
        }
    }

    pub fn security_check_failed(message: impl Into<String>, context: FailureContext) -> Self {
        Self {
            reason: HordeFailureReason::SecurityCheckFailed,
            message: message.into(),
            context,
        }
    }

    pub fn with_context(mut self, context: FailureContext) -> Self {
        self.context = context;
        self
    }

    /// Wrap an arbitrary error caught at the driver's top-level boundary
    /// into the catch-all `Unexpected` bucket (§7's "wrapped unexpected
    /// exception" path).
    pub fn wrap_unhandled(err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            reason: HordeFailureReason::Unexpected,
            message: err.to_string(),
            context: FailureContext::new(),
        }
    }

    pub fn add_context(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.context.insert(key, value);
    }
}
