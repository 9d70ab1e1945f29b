//! Policy evaluation: rule databases plus the per-event judgement logic.
//!
//! The engine is owned by the ingestion task. Both rule tables are held
//! behind `Arc`s and replaced wholesale on reload; evaluation of a single
//! event always sees one consistent table generation.

use std::sync::Arc;

use warden_core::{AncestryRecord, ByteString, Event, Severity, Verdict};

mod database;
mod loader;

pub use database::{CommandTable, SeverityTable};
pub use loader::{RuleFileError, RuleSet};

/// Default minimum interval between process creations before the
/// rapid-spawn heuristic fires: 1ms.
pub const DEFAULT_RAPID_SPAWN_NS: u64 = 1_000_000;

/// What the evaluator concluded about one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    /// Exec and file events produce a verdict for the enforcement
    /// controller, along with the evaluated target for the audit trail.
    Verdict {
        verdict: Verdict,
        command: ByteString,
    },
    /// Informational signal with no enforcement action (rate heuristics,
    /// warning-severity matches).
    Advisory {
        severity: Severity,
        message: String,
    },
    /// Events outside the verdict path (raw syscall telemetry).
    Ignored,
}

pub struct PolicyEngine {
    severity: Arc<SeverityTable>,
    commands: Arc<CommandTable>,
    rapid_spawn_ns: u64,
    /// Timestamp of the last process creation from any pid. Deliberately
    /// global, not per process tree: the heuristic measures system-wide
    /// spawn pressure.
    last_spawn: Option<warden_core::Timestamp>,
}

impl PolicyEngine {
    pub fn new(rules: RuleSet) -> Self {
        PolicyEngine {
            severity: Arc::new(rules.severity),
            commands: Arc::new(rules.commands),
            rapid_spawn_ns: DEFAULT_RAPID_SPAWN_NS,
            last_spawn: None,
        }
    }

    pub fn with_rapid_spawn_interval(mut self, nanos: u64) -> Self {
        self.rapid_spawn_ns = nanos;
        self
    }

    /// Replace both tables atomically. Readers holding the old `Arc`s
    /// finish their evaluation against the old generation.
    pub fn load(&mut self, rules: RuleSet) {
        self.severity = Arc::new(rules.severity);
        self.commands = Arc::new(rules.commands);
    }

    pub fn severity_table(&self) -> &SeverityTable {
        &self.severity
    }

    /// Judge one event against the rule databases, with the process's
    /// ancestry as context.
    pub fn assess(&mut self, event: &Event, ancestry: Option<&AncestryRecord>) -> Assessment {
        match event {
            Event::Exec {
                comm,
                program_path,
                argv0,
                ..
            } => {
                let command = full_command(comm, program_path, argv0);
                let verdict = self.commands.evaluate(command.as_bytes());
                if !verdict.is_allow() {
                    return Assessment::Verdict { verdict, command };
                }
                match self.severity.first_match(basename(program_path.as_bytes())) {
                    Some(rule) if rule.severity == Severity::Critical => Assessment::Verdict {
                        verdict: Verdict::Dangerous {
                            reason: format!(
                                "critical execution pattern \"{}\"",
                                String::from_utf8_lossy(&rule.pattern)
                            ),
                        },
                        command,
                    },
                    Some(rule) if rule.severity == Severity::Warning => Assessment::Advisory {
                        severity: Severity::Warning,
                        message: format!(
                            "watched program executed: {program_path}{}",
                            ancestry_suffix(ancestry)
                        ),
                    },
                    _ => Assessment::Verdict {
                        verdict: Verdict::Allow,
                        command,
                    },
                }
            }
            Event::FileAccess {
                target_path,
                access,
                ..
            } => match self.severity.first_match(target_path.as_bytes()) {
                Some(rule) if rule.severity == Severity::Critical => Assessment::Verdict {
                    verdict: Verdict::Dangerous {
                        reason: format!("critical file {access}: {target_path}"),
                    },
                    command: target_path.clone(),
                },
                Some(rule) if rule.severity == Severity::Warning => Assessment::Advisory {
                    severity: Severity::Warning,
                    message: format!(
                        "sensitive file {access}: {target_path}{}",
                        ancestry_suffix(ancestry)
                    ),
                },
                _ => Assessment::Verdict {
                    verdict: Verdict::Allow,
                    command: target_path.clone(),
                },
            },
            Event::ProcessCreate {
                timestamp, comm, ..
            } => {
                let rapid = self
                    .last_spawn
                    .is_some_and(|last| timestamp.nanos_since(last) < self.rapid_spawn_ns);
                self.last_spawn = Some(*timestamp);
                if rapid {
                    Assessment::Advisory {
                        severity: Severity::Warning,
                        message: format!(
                            "rapid process creation: {comm}{}",
                            ancestry_suffix(ancestry)
                        ),
                    }
                } else {
                    Assessment::Ignored
                }
            }
            // Raw syscall telemetry feeds a downstream sequence analyzer,
            // not the verdict path.
            Event::Syscall { .. } => Assessment::Ignored,
        }
    }
}

/// Reconstruct the judged command line: `comm + " " + program_path + " " +
/// argv0`, single ASCII space separators. The format is stable; the audit
/// trail and the rule corpus both depend on it.
pub fn full_command(comm: &ByteString, program_path: &ByteString, argv0: &ByteString) -> ByteString {
    let mut bytes =
        Vec::with_capacity(comm.len() + program_path.len() + argv0.len() + 2);
    bytes.extend_from_slice(comm.as_bytes());
    bytes.push(b' ');
    bytes.extend_from_slice(program_path.as_bytes());
    bytes.push(b' ');
    bytes.extend_from_slice(argv0.as_bytes());
    ByteString::from_bytes(bytes)
}

fn basename(path: &[u8]) -> &[u8] {
    path.rsplit(|b| *b == b'/').next().unwrap_or(path)
}

fn ancestry_suffix(ancestry: Option<&AncestryRecord>) -> String {
    match ancestry {
        Some(record) => format!(
            " (parent {} [{}], grandparent {} [{}])",
            record.parent_comm, record.parent_pid, record.grandparent_comm, record.grandparent_pid
        ),
        None => String::new(),
    }
}
