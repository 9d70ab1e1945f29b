//! Audit trail entries.
//!
//! Every enforcement transition produces one entry. The line rendering is
//! a stable external contract consumed by downstream tooling:
//!
//! `[timestamp] VERDICT=<v> PID=<pid> REASON="<reason>" COMMAND="<command>"`

use chrono::{DateTime, Local};
use serde::Serialize;

/// What the enforcement controller actually did for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    /// Allowed event, nothing to do (only audited in verbose mode).
    None,
    /// Freeze signal delivered.
    Frozen,
    /// Already frozen, logged as continuing.
    StillFrozen,
    /// Kill signal delivered.
    Terminated,
    /// The target exited before the signal could land.
    TargetGone,
    /// Monitor-only mode: freeze suppressed.
    WouldFreeze,
    /// Monitor-only mode: kill suppressed.
    WouldTerminate,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Local>,
    pub pid: i32,
    pub verdict: &'static str,
    pub reason: String,
    pub command: String,
    pub action: ActionTaken,
}

impl AuditEntry {
    pub fn new(
        pid: i32,
        verdict: &'static str,
        reason: impl Into<String>,
        command: impl Into<String>,
        action: ActionTaken,
    ) -> Self {
        AuditEntry {
            timestamp: Local::now(),
            pid,
            verdict,
            reason: reason.into(),
            command: command.into(),
            action,
        }
    }

    /// Render the stable audit line. Embedded double quotes are escaped so
    /// a crafted command line cannot forge fields.
    pub fn render_line(&self) -> String {
        format!(
            "[{}] VERDICT={} PID={} REASON=\"{}\" COMMAND=\"{}\"",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.verdict,
            self.pid,
            escape(&self.reason),
            escape(&self.command),
        )
    }
}

fn escape(field: &str) -> String {
    field.replace('\\', "\\\\").replace('"', "\\\"")
}
