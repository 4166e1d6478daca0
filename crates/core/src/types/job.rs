//! Diagnostic job status and log entries

use serde::{Deserialize, Serialize};

/// Diagnostic job state, sent as the `hacking:status` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
}

/// Classification of one streamed job log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobEventKind {
    Info,
    Tool,
    Output,
    Error,
    Summary,
}

/// One entry of the job's event log, sent as the `hacking:output` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub content: String,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(JobEventKind::Info, content)
    }

    pub fn output(content: impl Into<String>) -> Self {
        Self::new(JobEventKind::Output, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(JobEventKind::Error, content)
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(JobEventKind::Summary, content)
    }
}
