//! Append-only run log kept by every plan instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task_instance::TaskStatus;

/// Something notable that happened while driving a plan instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PlanStarted,
    TaskStatusChanged {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
        reason: String,
    },
    ListenerTriggered {
        listener_id: String,
        task_id: String,
        status: TaskStatus,
    },
    ListenerExecuted {
        listener_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A late result arrived after the instance stopped being active.
    ResultDiscarded { listener_id: String },
    RetryScheduled { listener_id: String, attempt: u32 },
    RetriesExhausted { listener_id: String, failed_retries: u32 },
    Resumed { listener_id: String },
    Verified,
    VerificationRejected { reason: String },
    Cancelled,
    Unrecoverable { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunEvent,
}

impl RunLogEntry {
    pub fn now(event: RunEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Listener whose failure put the main task into its current Error.
///
/// Walks the log backwards and only looks at entries since the main task
/// last recovered: a retry was scheduled, the instance was resumed, or the
/// main task moved to anything other than Error. Older failures already
/// had their retry and are not blamed again.
pub fn last_failed_listener<'a>(log: &'a [RunLogEntry], main_task_id: &str) -> Option<&'a str> {
    for entry in log.iter().rev() {
        match &entry.event {
            RunEvent::ListenerExecuted {
                listener_id,
                success: false,
                ..
            } => return Some(listener_id.as_str()),
            RunEvent::TaskStatusChanged { task_id, to, .. } if task_id == main_task_id => {
                if *to != TaskStatus::Error {
                    return None;
                }
            }
            RunEvent::PlanStarted | RunEvent::RetryScheduled { .. } | RunEvent::Resumed { .. } => return None,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_failed_listener_picks_newest() {
        let log = vec![
            RunLogEntry::now(RunEvent::ListenerExecuted {
                listener_id: "L1".into(),
                success: false,
                error: Some("boom".into()),
            }),
            RunLogEntry::now(RunEvent::ListenerExecuted {
                listener_id: "L2".into(),
                success: true,
                error: None,
            }),
            RunLogEntry::now(RunEvent::ListenerExecuted {
                listener_id: "L3".into(),
                success: false,
                error: None,
            }),
        ];
        assert_eq!(last_failed_listener(&log, "001"), Some("L3"));
        assert_eq!(last_failed_listener(&log[..2], "001"), Some("L1"));
        assert_eq!(last_failed_listener(&[], "001"), None);
    }

    fn main_changed(from: TaskStatus, to: TaskStatus) -> RunLogEntry {
        RunLogEntry::now(RunEvent::TaskStatusChanged {
            task_id: "001".into(),
            from,
            to,
            reason: "test".into(),
        })
    }

    fn executed(listener_id: &str, success: bool) -> RunLogEntry {
        RunLogEntry::now(RunEvent::ListenerExecuted {
            listener_id: listener_id.into(),
            success,
            error: None,
        })
    }

    #[test]
    fn test_last_failed_listener_ignores_failures_before_recovery() {
        let mut log = vec![
            RunLogEntry::now(RunEvent::PlanStarted),
            main_changed(TaskStatus::NotStarted, TaskStatus::Running),
            executed("L1", false),
            main_changed(TaskStatus::Running, TaskStatus::Error),
        ];
        assert_eq!(last_failed_listener(&log, "001"), Some("L1"));

        log.push(RunLogEntry::now(RunEvent::RetryScheduled {
            listener_id: "L1".into(),
            attempt: 1,
        }));
        log.push(main_changed(TaskStatus::Error, TaskStatus::Retrying));
        log.push(executed("L1", true));
        log.push(main_changed(TaskStatus::Retrying, TaskStatus::Running));
        log.push(main_changed(TaskStatus::Running, TaskStatus::Error));
        assert_eq!(last_failed_listener(&log, "001"), None);

        // Transitions of other tasks do not end the window.
        log.push(RunLogEntry::now(RunEvent::TaskStatusChanged {
            task_id: "002".into(),
            from: TaskStatus::NotStarted,
            to: TaskStatus::Running,
            reason: "test".into(),
        }));
        log.push(executed("L2", false));
        assert_eq!(last_failed_listener(&log, "001"), Some("L2"));

        log.push(RunLogEntry::now(RunEvent::Resumed { listener_id: "L2".into() }));
        assert_eq!(last_failed_listener(&log, "001"), None);
    }

    #[test]
    fn test_entry_serializes_flat() {
        let entry = RunLogEntry::now(RunEvent::RetryScheduled {
            listener_id: "L1".into(),
            attempt: 2,
        });
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["event"], "retry_scheduled");
        assert_eq!(value["attempt"], 2);
        assert!(value.get("timestamp").is_some());
    }
}
