//! Per-case structured logging
//!
//! `WorkflowLogger` forwards to `tracing` and retains a bounded in-memory
//! ring of structured events so tests and the health surface can inspect
//! what happened without scraping log output. Correlation ids tie an API
//! call to its response across stages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Maximum retained events per case
const EVENT_RING_CAPACITY: usize = 2048;

/// Log level for free-form events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured event retained by the logger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    StageStarted {
        stage: String,
        timestamp: DateTime<Utc>,
    },
    StageCompleted {
        stage: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StageFailed {
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ApiCall {
        correlation_id: String,
        stage: String,
        operation: String,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    ApiResponse {
        correlation_id: String,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    StateTransition {
        source: String,
        operation: String,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    Message {
        level: LogLevel,
        source: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

struct LoggerInner {
    events: Vec<LogEvent>,
}

/// Correlated structured event sink, one per case
#[derive(Clone)]
pub struct WorkflowLogger {
    case_id: String,
    inner: Arc<Mutex<LoggerInner>>,
}

impl WorkflowLogger {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            inner: Arc::new(Mutex::new(LoggerInner { events: Vec::new() })),
        }
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    fn push(&self, event: LogEvent) {
        let mut inner = self.inner.lock();
        if inner.events.len() >= EVENT_RING_CAPACITY {
            inner.events.remove(0);
        }
        inner.events.push(event);
    }

    pub fn stage_started(&self, stage: &str) {
        info!(case_id = %self.case_id, stage, "stage started");
        self.push(LogEvent::StageStarted {
            stage: stage.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn stage_completed(&self, stage: &str, duration_ms: u64) {
        info!(case_id = %self.case_id, stage, duration_ms, "stage completed");
        self.push(LogEvent::StageCompleted {
            stage: stage.to_string(),
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn stage_failed(&self, stage: &str, err: &str) {
        error!(case_id = %self.case_id, stage, error = err, "stage failed");
        self.push(LogEvent::StageFailed {
            stage: stage.to_string(),
            error: err.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Record an outbound API call; returns the correlation id to pass to
    /// `api_response` when the call resolves.
    pub fn api_call(&self, stage: &str, operation: &str, summary: &str) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        debug!(
            case_id = %self.case_id,
            stage,
            operation,
            correlation_id = %correlation_id,
            summary,
            "api call"
        );
        self.push(LogEvent::ApiCall {
            correlation_id: correlation_id.clone(),
            stage: stage.to_string(),
            operation: operation.to_string(),
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
        correlation_id
    }

    pub fn api_response(&self, correlation_id: &str, duration_ms: u64, error: Option<&str>) {
        match error {
            Some(err) => warn!(
                case_id = %self.case_id,
                correlation_id,
                duration_ms,
                error = err,
                "api response"
            ),
            None => debug!(case_id = %self.case_id, correlation_id, duration_ms, "api response"),
        }
        self.push(LogEvent::ApiResponse {
            correlation_id: correlation_id.to_string(),
            duration_ms,
            error: error.map(|e| e.to_string()),
            timestamp: Utc::now(),
        });
    }

    pub fn state_transition(&self, source: &str, operation: &str, summary: &str) {
        debug!(case_id = %self.case_id, source, operation, summary, "state transition");
        self.push(LogEvent::StateTransition {
            source: source.to_string(),
            operation: operation.to_string(),
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn log(&self, level: LogLevel, source: &str, message: &str) {
        match level {
            LogLevel::Debug => debug!(case_id = %self.case_id, source, "{}", message),
            LogLevel::Info => info!(case_id = %self.case_id, source, "{}", message),
            LogLevel::Warn => warn!(case_id = %self.case_id, source, "{}", message),
            LogLevel::Error => error!(case_id = %self.case_id, source, "{}", message),
        }
        self.push(LogEvent::Message {
            level,
            source: source.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Snapshot of retained events
    pub fn events(&self) -> Vec<LogEvent> {
        self.inner.lock().events.clone()
    }

    /// Per-stage durations collected from completed-stage events
    pub fn stage_durations(&self) -> Vec<(String, u64)> {
        self.inner
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                LogEvent::StageCompleted {
                    stage, duration_ms, ..
                } => Some((stage.clone(), *duration_ms)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_call_correlation() {
        let logger = WorkflowLogger::new("case-1");
        let id = logger.api_call("procedure-codes", "generate_structured", "extraction");
        logger.api_response(&id, 120, None);

        let events = logger.events();
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (
                LogEvent::ApiCall { correlation_id: a, .. },
                LogEvent::ApiResponse { correlation_id: b, .. },
            ) => assert_eq!(a, b),
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_stage_durations() {
        let logger = WorkflowLogger::new("case-1");
        logger.stage_started("compliance");
        logger.stage_completed("compliance", 42);
        assert_eq!(logger.stage_durations(), vec![("compliance".to_string(), 42)]);
    }

    #[test]
    fn test_ring_capacity() {
        let logger = WorkflowLogger::new("case-1");
        for i in 0..EVENT_RING_CAPACITY + 10 {
            logger.log(LogLevel::Debug, "test", &format!("event {}", i));
        }
        assert_eq!(logger.events().len(), EVENT_RING_CAPACITY);
    }
}
