//! Rule set construction: built-in defaults and YAML rule files.
//!
//! Rule files live in a configured directory, one or more `*.yaml`
//! documents with optional `severity` and `commands` sections:
//!
//! ```yaml
//! severity:
//!   - pattern: "mkfs."
//!     match: prefix
//!     severity: critical
//! commands:
//!   - pattern: "rm -rf /"
//!     verdict: dangerous
//!     reason: "Recursive root deletion - MALICIOUS"
//!   - pattern: "chmod 777"
//!     verdict: banned
//!     reason: "Overly permissive permissions - security risk"
//!     correction: "Use specific permissions like 755 or 644"
//! ```
//!
//! Files are merged in glob order; table order inside a file is the
//! order rules are written in. When a directory is configured its content
//! replaces the built-in defaults entirely.

use std::{fs, path::Path};

use serde::Deserialize;
use thiserror::Error;
use warden_core::{CommandRule, MatchMode, PatternRule, Severity};

use crate::database::{CommandTable, SeverityTable};

const RULE_EXTENSION: &str = "yaml";

#[derive(Error, Debug)]
pub enum RuleFileError {
    #[error("error listing rules: {0}")]
    RuleListing(#[from] glob::PatternError),
    #[error("error reading rule file: {name}")]
    RuleLoading {
        name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("error parsing rule file: {filename}")]
    RuleParsing {
        filename: String,
        #[source]
        error: serde_yaml::Error,
    },
}

/// Both tables, loaded and replaced together.
#[derive(Debug, Default, Clone)]
pub struct RuleSet {
    pub severity: SeverityTable,
    pub commands: CommandTable,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    severity: Vec<SeveritySpec>,
    #[serde(default)]
    commands: Vec<CommandSpec>,
}

#[derive(Debug, Deserialize)]
struct SeveritySpec {
    pattern: String,
    #[serde(rename = "match", default = "default_match")]
    match_mode: MatchMode,
    #[serde(default)]
    severity: Severity,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_match() -> MatchMode {
    MatchMode::Prefix
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum VerdictSpec {
    Dangerous,
    Banned,
}

#[derive(Debug, Deserialize)]
struct CommandSpec {
    pattern: String,
    verdict: VerdictSpec,
    reason: String,
    #[serde(default)]
    correction: Option<String>,
}

impl RuleSet {
    /// Load every rule file under `rules_path`.
    pub fn load_from_dir(rules_path: &Path) -> Result<RuleSet, RuleFileError> {
        let mut severity = Vec::new();
        let mut dangerous = Vec::new();
        let mut banned = Vec::new();

        let expr = format!("{}/**/*.{}", rules_path.display(), RULE_EXTENSION);
        for path in glob::glob(&expr)?.flatten() {
            log::debug!("loading rule file {}", path.display());
            let body = fs::read_to_string(&path).map_err(|error| RuleFileError::RuleLoading {
                name: path.display().to_string(),
                error,
            })?;
            let file: RuleFile =
                serde_yaml::from_str(&body).map_err(|error| RuleFileError::RuleParsing {
                    filename: path.display().to_string(),
                    error,
                })?;

            for spec in file.severity {
                severity.push(PatternRule {
                    pattern: spec.pattern.into_bytes(),
                    match_mode: spec.match_mode,
                    severity: spec.severity,
                    enabled: spec.enabled,
                });
            }
            for spec in file.commands {
                let rule = CommandRule {
                    pattern: spec.pattern.into_bytes(),
                    reason: spec.reason,
                    correction_hint: spec.correction,
                };
                match spec.verdict {
                    VerdictSpec::Dangerous => dangerous.push(rule),
                    VerdictSpec::Banned => banned.push(rule),
                }
            }
        }

        Ok(RuleSet {
            severity: SeverityTable::new(severity),
            commands: CommandTable::new(dangerous, banned),
        })
    }

    /// The compiled-in default tables, used when no rules directory is
    /// configured.
    pub fn builtin() -> RuleSet {
        RuleSet {
            severity: SeverityTable::new(builtin_severity_rules()),
            commands: CommandTable::new(builtin_dangerous_rules(), builtin_banned_rules()),
        }
    }
}

/// Severity defaults: program basenames and sensitive paths.
fn builtin_severity_rules() -> Vec<PatternRule> {
    use MatchMode::*;
    use Severity::*;
    vec![
        // Offensive tooling: deny at the probe, kill if it slips through.
        PatternRule::new(&b"hping3"[..], Exact, Critical),
        PatternRule::new(&b"mkfs."[..], Prefix, Critical),
        // Noisy-but-legitimate tools are observation only.
        PatternRule::new(&b"nmap"[..], Exact, Warning),
        PatternRule::new(&b"nc"[..], Exact, Warning),
        PatternRule::new(&b"dd"[..], Exact, Warning),
        // Credential material and privilege configuration.
        PatternRule::new(&b"/etc/shadow"[..], Exact, Critical),
        PatternRule::new(&b"/etc/sudoers"[..], Prefix, Critical),
        PatternRule::new(&b"/root/.ssh/"[..], Prefix, Critical),
        PatternRule::new(&b"/etc/"[..], Prefix, Warning),
    ]
}

/// Dangerous command defaults: malicious or destructive, kill on sight.
fn builtin_dangerous_rules() -> Vec<CommandRule> {
    [
        ("rm -rf /", "Recursive root deletion - MALICIOUS"),
        ("chmod 000 /", "Root permission destruction - MALICIOUS"),
        ("mv /etc", "System directory move - MALICIOUS"),
        ("dd if=/dev/zero of=/dev/sd", "Disk wipe attempt - MALICIOUS"),
        ("mkfs.", "Filesystem format - MALICIOUS"),
        (":(){:|:&};:", "Fork bomb - MALICIOUS"),
        ("curl -X POST", "Potential data exfiltration - MALICIOUS"),
        ("scp /home", "Copying user data remotely - MALICIOUS"),
        ("sudo chmod +s", "SUID bit manipulation - MALICIOUS"),
        ("chmod 4755 /bin", "System binary SUID - MALICIOUS"),
        ("nmap -sS", "Port scanning - MALICIOUS"),
        ("hping3", "Network flooding tool - MALICIOUS"),
    ]
    .into_iter()
    .map(|(pattern, reason)| CommandRule::new(pattern.as_bytes(), reason))
    .collect()
}

/// Banned command defaults: lazy, hallucinated or incorrect agent
/// behavior. Correctable, so every entry carries a hint.
fn builtin_banned_rules() -> Vec<CommandRule> {
    [
        (
            "claude_agent_sdk",
            "Hallucinated library - does not exist",
            "Use anthropic-sdk-python or anthropic official library",
        ),
        (
            "anthropic.agents",
            "Hallucinated API - no such module",
            "Use anthropic.Anthropic() client",
        ),
        (
            "openai_agents",
            "Hallucinated library - does not exist",
            "Use openai official library",
        ),
        (
            "# In a real implementation",
            "LAZY - placeholder code instead of real implementation",
            "Implement the actual functionality - no shortcuts",
        ),
        (
            "# TODO: implement this",
            "LAZY - leaving TODO instead of implementing",
            "Complete the implementation now",
        ),
        (
            "pass  # placeholder",
            "LAZY - empty placeholder function",
            "Implement the function body",
        ),
        (
            "return mock_data",
            "LAZY - returning mock data instead of real implementation",
            "Implement actual data retrieval/processing",
        ),
        (
            "simulate_",
            "LAZY - simulation instead of real code",
            "Implement the actual functionality",
        ),
        (
            "tar rcs",
            "Wrong tar syntax - should be 'tar czf' or 'tar xzf'",
            "Use: tar czf archive.tar.gz files/ (to create) or tar xzf archive.tar.gz (to extract)",
        ),
        (
            "git rebase -i",
            "Interactive rebase in non-TTY environment",
            "Use non-interactive git commands in automated environments",
        ),
        (
            "git commit --amend",
            "Rewriting git history - dangerous in shared branches",
            "Create a new commit instead of amending",
        ),
        (
            "curl | bash",
            "Piped execution - security risk",
            "Download, inspect, then execute scripts separately",
        ),
        (
            "wget -O- | sh",
            "Piped execution - security risk",
            "Download, inspect, then execute scripts separately",
        ),
        (
            "eval ",
            "Dynamic code execution - security risk",
            "Use explicit code paths instead of eval",
        ),
        (
            "rm -rf *",
            "Wildcard deletion - too broad",
            "Specify exact files or directories to remove",
        ),
        (
            "chmod 777",
            "Overly permissive permissions - security risk",
            "Use specific permissions like 755 or 644",
        ),
        (
            "chown -R root",
            "Recursive root ownership change - dangerous",
            "Change ownership of specific files only",
        ),
    ]
    .into_iter()
    .map(|(pattern, reason, correction)| {
        CommandRule::with_correction(pattern.as_bytes(), reason, correction)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::Verdict;

    #[test]
    fn builtin_tables_cover_the_canonical_cases() {
        let rules = RuleSet::builtin();
        match rules.commands.evaluate(b"bash /usr/bin/rm rm -rf /") {
            Verdict::Dangerous { reason } => assert!(reason.contains("Recursive root deletion")),
            other => panic!("expected dangerous, got {other:?}"),
        }
        match rules.commands.evaluate(b"pip install claude_agent_sdk") {
            Verdict::Banned { correction, .. } => {
                assert!(correction.expect("hint required").contains("anthropic"))
            }
            other => panic!("expected banned, got {other:?}"),
        }
        assert!(rules.commands.evaluate(b"bash /usr/bin/ls ls -la").is_allow());
    }

    #[test]
    fn rule_files_replace_the_defaults() {
        let dir = std::env::temp_dir().join(format!("warden-rules-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("10-custom.yaml"),
            r#"
severity:
  - pattern: "forbidden-tool"
    match: exact
    severity: critical
commands:
  - pattern: "drop database"
    verdict: dangerous
    reason: "database destruction"
  - pattern: "print('works')"
    verdict: banned
    reason: "placeholder output"
    correction: "write a real test"
"#,
        )
        .unwrap();

        let rules = RuleSet::load_from_dir(&dir).unwrap();
        assert_eq!(rules.severity.evaluate(b"forbidden-tool"), Severity::Critical);
        assert!(matches!(
            rules.commands.evaluate(b"psql -c drop database prod"),
            Verdict::Dangerous { .. }
        ));
        // Defaults are gone once a directory is loaded.
        assert!(rules.commands.evaluate(b"chmod 777 x").is_allow());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_yields_empty_tables() {
        let rules = RuleSet::load_from_dir(Path::new("/nonexistent/warden-rules")).unwrap();
        assert!(rules.severity.rules().is_empty());
        assert!(rules.commands.evaluate(b"rm -rf /").is_allow());
    }
}
