//! Audit sink: the append-only enforcement trail.
//!
//! Durability contract: an enforcement record (freeze/terminate) is never
//! discarded. On a write failure the entry goes into a pending queue, the
//! file is reopened, and the queue is flushed before anything newer is
//! written. A transient sink failure delays the trail, it does not lose
//! it. Raw telemetry ("allowed" records in verbose mode) has no such
//! guarantee and is shed first under pressure.
//!
//! Failing to open the sink at startup is fatal for the caller: an
//! enforcement engine without an audit trail must not run.

use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::Duration,
};

use thiserror::Error;
use warden_core::AuditEntry;

/// Write retries per entry before parking it in the pending queue.
const WRITE_ATTEMPTS: usize = 3;
/// Pause between retry attempts. Blocking the pipeline briefly is the
/// accepted cost of not losing enforcement records.
const RETRY_PAUSE: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("cannot open audit log {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Plaintext,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "plaintext" => Ok(OutputFormat::Plaintext),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "output format must be one of [plaintext, json], got {format:?}"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub path: PathBuf,
    /// Echo enforcement entries to stdout.
    pub console: bool,
    /// Also record allowed events (noisy; off by default).
    pub verbose: bool,
    pub output_format: OutputFormat,
}

impl Config {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Config {
            path: path.into(),
            console: true,
            verbose: false,
            output_format: OutputFormat::Plaintext,
        }
    }
}

pub struct AuditLogger {
    file: File,
    config: Config,
    /// Entries that could not be written yet, oldest first.
    pending: VecDeque<String>,
}

impl AuditLogger {
    pub fn open(config: Config) -> Result<Self, AuditError> {
        if let Some(parent) = config.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = open_append(&config.path).map_err(|source| AuditError::Open {
            path: config.path.clone(),
            source,
        })?;
        Ok(AuditLogger {
            file,
            config,
            pending: VecDeque::new(),
        })
    }

    /// Record an enforcement transition. Never loses the entry: on
    /// persistent write failure it stays queued for the next attempt.
    pub fn record(&mut self, entry: &AuditEntry) {
        if self.config.console {
            println!("{}", entry.render_line());
        }
        let line = self.render(entry);
        self.pending.push_back(line);
        self.flush_pending();
    }

    /// Record an allowed event. Only written in verbose mode, and shed
    /// outright while enforcement entries are backed up.
    pub fn record_allowed(&mut self, entry: &AuditEntry) {
        if !self.config.verbose {
            return;
        }
        if !self.pending.is_empty() {
            log::debug!("audit sink backed up, shedding allowed-event record");
            return;
        }
        let line = self.render(entry);
        self.pending.push_back(line);
        self.flush_pending();
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Flush queued entries in order. Called before every write so the
    /// trail stays append-ordered across sink outages.
    pub fn flush_pending(&mut self) {
        while let Some(line) = self.pending.pop_front() {
            if !self.write_line(&line) {
                self.pending.push_front(line);
                log::error!(
                    "audit sink unavailable, {} entries pending",
                    self.pending.len()
                );
                return;
            }
        }
        let _ = self.file.flush();
    }

    fn render(&self, entry: &AuditEntry) -> String {
        match self.config.output_format {
            OutputFormat::Plaintext => entry.render_line(),
            OutputFormat::Json => serde_json::to_string(entry)
                .unwrap_or_else(|_| entry.render_line()),
        }
    }

    fn write_line(&mut self, line: &str) -> bool {
        for attempt in 0..WRITE_ATTEMPTS {
            if attempt > 0 {
                thread::sleep(RETRY_PAUSE);
            }
            match writeln!(self.file, "{line}") {
                Ok(()) => return true,
                Err(err) => {
                    log::warn!("audit write failed (attempt {}): {err}", attempt + 1);
                    // The file may have been rotated or the directory
                    // recreated; try a fresh handle.
                    if let Ok(file) = open_append(&self.config.path) {
                        self.file = file;
                    }
                }
            }
        }
        false
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ActionTaken;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("warden-audit-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn entry(verdict: &'static str, action: ActionTaken) -> AuditEntry {
        AuditEntry::new(
            99,
            verdict,
            "Recursive root deletion - MALICIOUS",
            "bash /usr/bin/rm rm -rf /",
            action,
        )
    }

    #[test]
    fn enforcement_entries_hit_the_file() {
        let dir = temp_dir("basic");
        let mut config = Config::new(dir.join("audit.log"));
        config.console = false;
        let mut logger = AuditLogger::open(config).unwrap();

        logger.record(&entry("DANGEROUS", ActionTaken::Terminated));
        logger.record(&entry("BANNED", ActionTaken::Frozen));

        let content = std::fs::read_to_string(dir.join("audit.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("VERDICT=DANGEROUS"));
        assert!(lines[0].contains("PID=99"));
        assert!(lines[1].contains("VERDICT=BANNED"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn allowed_entries_need_verbose() {
        let dir = temp_dir("verbose");
        let mut config = Config::new(dir.join("audit.log"));
        config.console = false;
        let mut logger = AuditLogger::open(config).unwrap();
        logger.record_allowed(&entry("ALLOW", ActionTaken::None));
        assert_eq!(
            std::fs::read_to_string(dir.join("audit.log")).unwrap(),
            ""
        );

        let mut config = Config::new(dir.join("audit.log"));
        config.console = false;
        config.verbose = true;
        let mut logger = AuditLogger::open(config).unwrap();
        logger.record_allowed(&entry("ALLOW", ActionTaken::None));
        assert!(
            std::fs::read_to_string(dir.join("audit.log"))
                .unwrap()
                .contains("VERDICT=ALLOW")
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn json_output_is_one_document_per_line() {
        let dir = temp_dir("json");
        let mut config = Config::new(dir.join("audit.log"));
        config.console = false;
        config.output_format = OutputFormat::Json;
        let mut logger = AuditLogger::open(config).unwrap();
        logger.record(&entry("BANNED", ActionTaken::Frozen));

        let content = std::fs::read_to_string(dir.join("audit.log")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["pid"], 99);
        assert_eq!(parsed["verdict"], "BANNED");
        assert_eq!(parsed["action"], "frozen");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unopenable_sink_is_a_startup_error() {
        let config = Config::new("/dev/null/not-a-directory/audit.log");
        assert!(matches!(
            AuditLogger::open(config),
            Err(AuditError::Open { .. })
        ));
    }
}
