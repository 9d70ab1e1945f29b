//! The two rule databases.
//!
//! Both tables are immutable once built; reload replaces the whole table
//! behind an `Arc`, so an in-flight evaluation keeps the table it started
//! with and no reader ever observes a partial update.
//!
//! Matching is byte-oriented and case-sensitive with no Unicode
//! normalization. That is a compatibility requirement with the deployed
//! rule corpus, not an oversight; see the tests pinning it down.

use warden_core::{CommandRule, MatchMode, PatternRule, Severity, Verdict};

/// Byte-slice substring search. Empty patterns never match: a rule with
/// no pattern is a configuration mistake, not a match-everything wildcard.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Ordered severity table for execution paths and file access targets.
#[derive(Debug, Default, Clone)]
pub struct SeverityTable {
    rules: Vec<PatternRule>,
}

impl SeverityTable {
    pub fn new(rules: Vec<PatternRule>) -> Self {
        SeverityTable { rules }
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// First enabled rule matching `target`, in table order. Order wins
    /// over severity: an early Info rule shadows a later Critical one.
    pub fn first_match(&self, target: &[u8]) -> Option<&PatternRule> {
        self.rules
            .iter()
            .filter(|rule| rule.enabled && !rule.pattern.is_empty())
            .find(|rule| match rule.match_mode {
                MatchMode::Exact => target == rule.pattern.as_slice(),
                MatchMode::Prefix => target.starts_with(&rule.pattern),
            })
    }

    pub fn evaluate(&self, target: &[u8]) -> Severity {
        self.first_match(target)
            .map(|rule| rule.severity)
            .unwrap_or(Severity::Info)
    }
}

/// Ordered command tables. Dangerous rules are always checked before
/// banned rules, whatever the insertion order within each list.
#[derive(Debug, Default, Clone)]
pub struct CommandTable {
    dangerous: Vec<CommandRule>,
    banned: Vec<CommandRule>,
}

impl CommandTable {
    pub fn new(dangerous: Vec<CommandRule>, banned: Vec<CommandRule>) -> Self {
        CommandTable { dangerous, banned }
    }

    pub fn dangerous(&self) -> &[CommandRule] {
        &self.dangerous
    }

    pub fn banned(&self) -> &[CommandRule] {
        &self.banned
    }

    pub fn evaluate(&self, full_command: &[u8]) -> Verdict {
        for rule in &self.dangerous {
            if contains(full_command, &rule.pattern) {
                return Verdict::Dangerous {
                    reason: rule.reason.clone(),
                };
            }
        }
        for rule in &self.banned {
            if contains(full_command, &rule.pattern) {
                return Verdict::Banned {
                    reason: rule.reason.clone(),
                    correction: rule.correction_hint.clone(),
                };
            }
        }
        Verdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_enabled_match_wins_over_later_severity() {
        // Rule 0 matches everything at Info; rule 1 is an exact Critical.
        let table = SeverityTable::new(vec![
            PatternRule::new(&b"/"[..], MatchMode::Prefix, Severity::Info),
            PatternRule::new(&b"/sbin/mkfs.ext4"[..], MatchMode::Exact, Severity::Critical),
        ]);
        assert_eq!(table.evaluate(b"/sbin/mkfs.ext4"), Severity::Info);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let table = SeverityTable::new(vec![
            PatternRule {
                enabled: false,
                ..PatternRule::new(&b"nmap"[..], MatchMode::Exact, Severity::Info)
            },
            PatternRule::new(&b"nmap"[..], MatchMode::Exact, Severity::Critical),
        ]);
        assert_eq!(table.evaluate(b"nmap"), Severity::Critical);
    }

    #[test]
    fn exact_requires_full_length_equality() {
        let table = SeverityTable::new(vec![PatternRule::new(
            &b"dd"[..],
            MatchMode::Exact,
            Severity::Warning,
        )]);
        assert_eq!(table.evaluate(b"dd"), Severity::Warning);
        assert_eq!(table.evaluate(b"ddrescue"), Severity::Info);
        assert_eq!(table.evaluate(b"d"), Severity::Info);
    }

    #[test]
    fn prefix_matches_from_the_start_only() {
        let table = SeverityTable::new(vec![PatternRule::new(
            &b"mkfs."[..],
            MatchMode::Prefix,
            Severity::Critical,
        )]);
        assert_eq!(table.evaluate(b"mkfs.ext4"), Severity::Critical);
        assert_eq!(table.evaluate(b"/sbin/mkfs.ext4"), Severity::Info);
    }

    #[test]
    fn no_match_is_the_info_baseline() {
        let table = SeverityTable::default();
        assert_eq!(table.evaluate(b"ls"), Severity::Info);
    }

    #[test]
    fn dangerous_takes_precedence_over_banned() {
        // The same pattern sits in both lists; dangerous must win even
        // though the banned list was built first.
        let banned = vec![CommandRule::with_correction(
            &b"rm -rf"[..],
            "wildcard deletion",
            "name the files",
        )];
        let dangerous = vec![CommandRule::new(&b"rm -rf /"[..], "recursive root deletion")];
        let table = CommandTable::new(dangerous, banned);
        match table.evaluate(b"sh -c rm -rf /") {
            Verdict::Dangerous { reason } => assert_eq!(reason, "recursive root deletion"),
            other => panic!("expected dangerous, got {other:?}"),
        }
    }

    #[test]
    fn first_banned_substring_match_wins() {
        let table = CommandTable::new(
            Vec::new(),
            vec![
                CommandRule::new(&b"eval "[..], "dynamic code execution"),
                CommandRule::new(&b"chmod 777"[..], "overly permissive"),
            ],
        );
        match table.evaluate(b"bash -c eval chmod 777 x") {
            Verdict::Banned { reason, .. } => assert_eq!(reason, "dynamic code execution"),
            other => panic!("expected banned, got {other:?}"),
        }
    }

    #[test]
    fn matching_is_case_sensitive_bytes() {
        let table = CommandTable::new(vec![CommandRule::new(&b"rm -rf /"[..], "r")], Vec::new());
        assert!(table.evaluate(b"RM -RF /").is_allow());
        assert!(!table.evaluate(b"rm -rf /").is_allow());
        // No Unicode normalization: a fullwidth slash is a different byte
        // sequence and must not match.
        assert!(table.evaluate("rm -rf ／".as_bytes()).is_allow());
    }

    #[test]
    fn loaded_exact_pattern_round_trips() {
        let table = SeverityTable::new(vec![PatternRule::new(
            &b"hping3"[..],
            MatchMode::Exact,
            Severity::Critical,
        )]);
        assert_eq!(
            table.first_match(b"hping3").map(|r| r.severity),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn empty_patterns_never_match() {
        let severity = SeverityTable::new(vec![PatternRule::new(
            Vec::new(),
            MatchMode::Prefix,
            Severity::Critical,
        )]);
        assert_eq!(severity.evaluate(b"anything"), Severity::Info);
        let commands = CommandTable::new(vec![CommandRule::new(Vec::new(), "r")], Vec::new());
        assert!(commands.evaluate(b"anything").is_allow());
    }
}
