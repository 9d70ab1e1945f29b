//! Warden is a host-based behavior-enforcement engine for semi-trusted
//! automated agents (AI coding agents and similar), powered by a
//! kernel-resident probe.
//!
//! The probe reports execs, file access, process creation and selected
//! raw syscalls as binary records. The `wardend` daemon decodes them,
//! tracks process ancestry, judges every event against two rule
//! databases and enforces the verdict:
//!
//! - **Allow**: nothing happens (audited only in verbose mode).
//! - **Banned**: lazy, hallucinated or incorrect behavior. The process
//!   is frozen (SIGSTOP) pending external correction, with a hint in the
//!   log. Reversible.
//! - **Dangerous**: destructive or malicious behavior. The process is
//!   killed (SIGKILL). No second chances.
//!
//! Enforcement is two-tier by design. A minimal exact/prefix deny table
//! is pushed into the probe and consulted synchronously before a program
//! may execute at all; the richer, ancestry- and argument-aware judging
//! in this crate runs afterwards and acts via signals. A sufficiently
//! fast malicious exec can finish before the asynchronous judge reacts;
//! that time-of-check/time-of-use gap is an accepted limitation of the
//! post-hoc tier, which is why the synchronous veto tier exists.
//!
//! The whole pipeline (decode → track → evaluate → enforce → audit) runs
//! on a single ingestion task; see [`wardend::Engine`].

pub mod cli;
pub mod wardend;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above, hide timestamp
/// and module path.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}
