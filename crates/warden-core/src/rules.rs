//! Rule and verdict model shared by the policy engine, the enforcement
//! controller and the probe veto table.

use std::fmt;

use probe_common::control::{MAX_VETO_ENTRIES, VETO_PATTERN_LEN, VetoEntry};
use serde::{Deserialize, Serialize};

/// How a [`PatternRule`] matches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Full-length byte equality.
    Exact,
    /// Target starts with the pattern.
    Prefix,
}

/// Graded classification for non-command events (execution paths, file
/// access). Distinct from the binary command verdict.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{name}")
    }
}

/// One entry of the severity table. Tables are ordered: the first enabled
/// matching rule wins, regardless of the severity of later rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRule {
    pub pattern: Vec<u8>,
    pub match_mode: MatchMode,
    pub severity: Severity,
    pub enabled: bool,
}

impl PatternRule {
    pub fn new(pattern: impl Into<Vec<u8>>, match_mode: MatchMode, severity: Severity) -> Self {
        PatternRule {
            pattern: pattern.into(),
            match_mode,
            severity,
            enabled: true,
        }
    }
}

/// One entry of the command tables. Matching is a byte-oriented,
/// case-sensitive substring search over the reconstructed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRule {
    pub pattern: Vec<u8>,
    pub reason: String,
    pub correction_hint: Option<String>,
}

impl CommandRule {
    pub fn new(pattern: impl Into<Vec<u8>>, reason: impl Into<String>) -> Self {
        CommandRule {
            pattern: pattern.into(),
            reason: reason.into(),
            correction_hint: None,
        }
    }

    pub fn with_correction(
        pattern: impl Into<Vec<u8>>,
        reason: impl Into<String>,
        correction: impl Into<String>,
    ) -> Self {
        CommandRule {
            pattern: pattern.into(),
            reason: reason.into(),
            correction_hint: Some(correction.into()),
        }
    }
}

/// Outcome of judging one event. Recomputed per event, never stored.
///
/// Only correctable (`Banned`) verdicts carry a correction hint;
/// `Dangerous` behavior gets no second chance and no hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Banned {
        reason: String,
        correction: Option<String>,
    },
    Dangerous {
        reason: String,
    },
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Banned { .. } => "BANNED",
            Verdict::Dangerous { .. } => "DANGEROUS",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::Banned { reason, .. } | Verdict::Dangerous { reason } => Some(reason),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Project the enabled critical rules into probe veto entries.
///
/// The probe's pre-exec veto is a plain deny table with no severity
/// grading, so only `Critical` rules belong there; lower severities stay
/// userspace-only. Rules that do not fit the fixed pattern field or the
/// table capacity are kept in userspace and logged.
pub fn veto_entries(rules: &[PatternRule]) -> Vec<VetoEntry> {
    let mut entries = Vec::new();
    for rule in rules {
        if !rule.enabled || rule.severity < Severity::Critical {
            continue;
        }
        if entries.len() == MAX_VETO_ENTRIES {
            log::warn!(
                "veto table full ({MAX_VETO_ENTRIES} entries), remaining critical rules are userspace-only"
            );
            break;
        }
        if rule.pattern.len() > VETO_PATTERN_LEN {
            log::warn!(
                "critical rule pattern of {} bytes exceeds veto field, userspace-only",
                rule.pattern.len()
            );
            continue;
        }
        match VetoEntry::new(&rule.pattern, rule.match_mode == MatchMode::Exact) {
            Ok(entry) => entries.push(entry),
            Err(err) => log::warn!("skipping veto entry: {err}"),
        }
    }
    entries
}
