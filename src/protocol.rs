//! Message contract between the filter engine and whatever evaluates requests.
//!
//! The same messages flow through the background worker thread and the inline
//! shim, so call sites do not change when one substitutes for the other. All
//! messages are serde-serializable so an out-of-process transport can carry
//! them as JSON.

use crate::errors::AppError;
use crate::models::{DreamEntry, FilterCriteria, FilterOptions, FilterStatistics, VisibilityEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRequestMessage {
    pub request_id: u64,
    pub entries: Arc<Vec<DreamEntry>>,
    pub criteria: FilterCriteria,
    pub options: FilterOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterPhase {
    Preparing,
    Filtering,
    Statistics,
    Complete,
}

impl FilterPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Filtering => "filtering",
            Self::Statistics => "statistics",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub request_id: u64,
    /// Percentage, 0 to 100.
    pub progress: u8,
    pub entries_processed: usize,
    pub current_phase: FilterPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResponse {
    pub request_id: u64,
    pub visibility_map: Vec<VisibilityEntry>,
    pub statistics: Option<FilterStatistics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Panicked,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Panicked => "panicked",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// `None` when the failure is not tied to a request (start-up).
    pub request_id: Option<u64>,
    pub error_kind: FailureKind,
    pub message: String,
}

impl From<FailureReport> for AppError {
    fn from(value: FailureReport) -> Self {
        AppError::Worker {
            kind: value.error_kind.as_str().to_string(),
            message: value.message,
        }
    }
}

/// Everything a worker can post back to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    Ready,
    Progress(ProgressUpdate),
    Result(FilterResponse),
    Failure(FailureReport),
}

impl WorkerMessage {
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::Ready => None,
            Self::Progress(update) => Some(update.request_id),
            Self::Result(response) => Some(response.request_id),
            Self::Failure(report) => report.request_id,
        }
    }
}

pub fn encode_message(message: &WorkerMessage) -> Result<String, AppError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode_message(raw: &str) -> Result<WorkerMessage, AppError> {
    Ok(serde_json::from_str(raw)?)
}
