//! Domain model of the warden engine: typed events decoded from probe
//! records, the rule and verdict model, the bounded process ancestry
//! cache, process-wide statistics and audit entries.
//!
//! Everything here is owned by the single ingestion task; the only types
//! meant to cross task boundaries are [`stats::Statistics`] (atomic
//! counters behind an `Arc`) and immutable rule tables swapped wholesale.

pub mod ancestry;
pub mod audit;
pub mod event;
pub mod rules;
pub mod stats;
pub mod time;

pub use ancestry::{AncestryRecord, AncestryTracker};
pub use audit::{ActionTaken, AuditEntry};
pub use event::{ByteString, DecodeError, Event, EventKind, FileAccessKind, decode};
pub use rules::{CommandRule, MatchMode, PatternRule, Severity, Verdict, veto_entries};
pub use stats::{StatsSnapshot, Statistics};
pub use time::Timestamp;

pub use nix::unistd::Pid;
