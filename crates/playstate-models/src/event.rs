use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use crate::error::ModelError;

/// Maximum number of log lines kept per event, oldest are evicted first
pub const MAX_LOG_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl EventStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            EventStatus::Pending => 0,
            EventStatus::Running => 1,
            EventStatus::Success => 2,
            EventStatus::Failed => 3,
            EventStatus::Cancelled => 4,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self, ModelError> {
        match value {
            0 => Ok(EventStatus::Pending),
            1 => Ok(EventStatus::Running),
            2 => Ok(EventStatus::Success),
            3 => Ok(EventStatus::Failed),
            4 => Ok(EventStatus::Cancelled),
            other => Err(ModelError::InvalidStatus(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Running => "running",
            EventStatus::Success => "success",
            EventStatus::Failed => "failed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    /// No further transitions are allowed from a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Success | EventStatus::Failed | EventStatus::Cancelled)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>, // Seconds
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A queued unit of background work with its own bounded audit trail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub event: String,
    #[serde(default)]
    pub event_data: Value,
    #[serde(default)]
    pub options: EventOptions,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub logs: VecDeque<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(event: impl Into<String>, event_data: Value) -> Self {
        Self {
            id: None,
            status: EventStatus::Pending,
            reference: None,
            event: event.into(),
            event_data,
            options: EventOptions::default(),
            attempts: 0,
            logs: VecDeque::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_options(mut self, options: EventOptions) -> Self {
        self.options = options;
        self
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    fn transition(&mut self, expected: EventStatus, to: EventStatus) -> Result<(), ModelError> {
        if self.status != expected {
            return Err(ModelError::InvalidTransition { from: self.status, to });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    pub fn add_log(&mut self, line: impl Into<String>) {
        self.logs.push_back(line.into());
        while self.logs.len() > MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.touch();
    }

    /// Pending -> Running, counts one execution attempt
    pub fn start(&mut self) -> Result<(), ModelError> {
        self.transition(EventStatus::Pending, EventStatus::Running)?;
        self.attempts += 1;
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<(), ModelError> {
        self.transition(EventStatus::Running, EventStatus::Success)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ModelError> {
        self.transition(EventStatus::Running, EventStatus::Failed)?;
        self.add_log(reason);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ModelError> {
        if self.status == EventStatus::Running {
            return Err(ModelError::CancelRunning);
        }
        self.transition(EventStatus::Pending, EventStatus::Cancelled)
    }

    pub fn is_pending(&self) -> bool {
        self.status == EventStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_is_capped() {
        let mut event = Event::new("run_task", json!({}));
        for i in 0..203 {
            event.add_log(format!("line {}", i));
        }

        assert_eq!(event.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(event.logs.front().map(String::as_str), Some("line 3"));
        assert_eq!(event.logs.back().map(String::as_str), Some("line 202"));
        assert!(event.updated_at.is_some());
    }

    #[test]
    fn test_lifecycle() {
        let mut event = Event::new("run_task", json!({"name": "scan"}));
        assert!(event.succeed().is_err());

        event.start().unwrap();
        assert_eq!(event.status, EventStatus::Running);
        assert_eq!(event.attempts, 1);

        event.fail("boom").unwrap();
        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(event.logs.back().map(String::as_str), Some("boom"));
        assert!(event.status.is_terminal());
        assert!(event.start().is_err());
    }

    #[test]
    fn test_cancel_rules() {
        let mut pending = Event::new("run_task", json!({}));
        pending.cancel().unwrap();
        assert_eq!(pending.status, EventStatus::Cancelled);
        assert!(pending.cancel().is_err());

        let mut running = Event::new("run_task", json!({}));
        running.start().unwrap();
        assert_eq!(running.cancel(), Err(ModelError::CancelRunning));
        assert_eq!(running.status, EventStatus::Running);
    }

    #[test]
    fn test_status_codes() {
        for status in [
            EventStatus::Pending,
            EventStatus::Running,
            EventStatus::Success,
            EventStatus::Failed,
            EventStatus::Cancelled,
        ] {
            assert_eq!(EventStatus::from_i64(status.as_i64()).unwrap(), status);
        }
        assert!(EventStatus::from_i64(9).is_err());
    }
}
