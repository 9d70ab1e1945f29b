//! The ingestion loop: a single task running the whole pipeline.
//!
//! decode → ancestry update → evaluate → enforce → audit → statistics.
//!
//! No stage blocks on another process's progress; signal delivery is
//! fire-and-forget and the record queue drops at the source when full.
//! The loop polls with a bounded timeout so shutdown latency is capped at
//! one poll interval even when the probe goes quiet.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::bail;
use audit_logger::AuditLogger;
use enforcer::{Enforcer, ProcessControl};
use policy_engine::{Assessment, PolicyEngine, RuleSet};
use probe_common::source::{RawSample, RecordReceiver};
use tokio::sync::watch;
use warden_core::{
    ActionTaken, AncestryTracker, AuditEntry, ByteString, Event, Severity, StatsSnapshot,
    Statistics, Verdict, decode,
};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Minimum interval between queue-overflow log lines. Drops are counted
/// individually but logged in batches to avoid log storms.
const OVERFLOW_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Idle poll intervals between periodic statistics lines.
const STATS_EVERY_IDLE_TICKS: u32 = 100;

pub struct Engine<C: ProcessControl> {
    rx: RecordReceiver,
    tracker: AncestryTracker,
    policy: PolicyEngine,
    enforcer: Enforcer<C>,
    audit: AuditLogger,
    stats: Arc<Statistics>,
    poll_timeout: Duration,
    rx_shutdown: watch::Receiver<bool>,
    rx_rules: Option<watch::Receiver<RuleSet>>,
    dropped_synced: u64,
    last_overflow_log: Instant,
    idle_ticks: u32,
}

impl<C: ProcessControl> Engine<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: RecordReceiver,
        policy: PolicyEngine,
        enforcer: Enforcer<C>,
        audit: AuditLogger,
        stats: Arc<Statistics>,
        poll_timeout: Duration,
        rx_shutdown: watch::Receiver<bool>,
        rx_rules: Option<watch::Receiver<RuleSet>>,
    ) -> Self {
        Engine {
            rx,
            tracker: AncestryTracker::new(),
            policy,
            enforcer,
            audit,
            stats,
            poll_timeout,
            rx_shutdown,
            rx_rules,
            dropped_synced: 0,
            last_overflow_log: Instant::now(),
            idle_ticks: 0,
        }
    }

    /// Drain the record source until shutdown. Returns the final
    /// statistics snapshot on a clean exit; a closed source is fatal.
    pub async fn run(mut self) -> anyhow::Result<StatsSnapshot> {
        log::info!("engine started, poll timeout {:?}", self.poll_timeout);
        loop {
            self.reload_rules_if_changed();
            tokio::select! {
                _ = self.rx_shutdown.changed() => break,
                polled = tokio::time::timeout(self.poll_timeout, self.rx.recv()) => {
                    match polled {
                        // Poll timeout: an empty queue is a normal
                        // condition, not an error.
                        Err(_elapsed) => self.idle_tick(),
                        Ok(Some(sample)) => self.handle_sample(sample),
                        Ok(None) => {
                            self.sync_overflow(true);
                            bail!("record source closed, terminating ingestion");
                        }
                    }
                }
            }
        }

        self.sync_overflow(true);
        self.audit.flush_pending();
        let snapshot = self.stats.snapshot();
        log::info!("engine stopped: {snapshot}");
        Ok(snapshot)
    }

    /// Pick up a replaced rule generation, observed at most one poll
    /// interval after the reloader swapped it in.
    fn reload_rules_if_changed(&mut self) {
        if let Some(rx) = self.rx_rules.as_mut() {
            if rx.has_changed().unwrap_or(false) {
                let rules = rx.borrow_and_update().clone();
                log::info!("rule tables replaced");
                self.policy.load(rules);
            }
        }
    }

    fn handle_sample(&mut self, sample: RawSample) {
        self.stats.record_seen();

        let event = match decode(&sample) {
            Ok(event) => event,
            Err(err) => {
                // Malformed input is dropped, counted, and ingestion
                // continues; a hostile process must not wedge the loop.
                self.stats.add_dropped(1);
                log::debug!("dropping malformed record: {err}");
                return;
            }
        };

        if let Event::ProcessCreate {
            pid,
            ppid,
            timestamp,
            comm,
            parent_comm,
        } = &event
        {
            self.tracker
                .update(*pid, *ppid, *timestamp, comm.clone(), parent_comm.clone());
        }

        let ancestry = self.tracker.lookup(event.pid());
        match self.policy.assess(&event, ancestry) {
            Assessment::Verdict { verdict, command } => {
                self.stats.record_emitted();
                match &verdict {
                    Verdict::Allow => {
                        let entry = AuditEntry::new(
                            event.pid().as_raw(),
                            verdict.label(),
                            "",
                            command.to_lossy_string(),
                            ActionTaken::None,
                        );
                        self.audit.record_allowed(&entry);
                    }
                    Verdict::Banned { .. } => {
                        self.stats.record_banned();
                        self.enforce(&event, &verdict, &command);
                    }
                    Verdict::Dangerous { .. } => {
                        self.stats.record_dangerous();
                        self.enforce(&event, &verdict, &command);
                    }
                }
            }
            Assessment::Advisory { severity, message } => {
                self.stats.record_emitted();
                match severity {
                    Severity::Warning | Severity::Critical => log::warn!("{message}"),
                    Severity::Info => log::info!("{message}"),
                }
            }
            Assessment::Ignored => self.stats.record_filtered(),
        }

        self.sync_overflow(false);
    }

    fn enforce(&mut self, event: &Event, verdict: &Verdict, command: &ByteString) {
        let pid = event.pid();
        if let Some(entry) = self
            .enforcer
            .apply(pid, verdict, event.timestamp(), command)
        {
            if matches!(
                entry.action,
                ActionTaken::Terminated | ActionTaken::TargetGone | ActionTaken::WouldTerminate
            ) {
                // No more events are expected from this pid; its ancestry
                // slot is better spent on the living.
                self.tracker.remove(pid);
            }
            self.audit.record(&entry);
        }
    }

    fn idle_tick(&mut self) {
        self.sync_overflow(false);
        self.idle_ticks += 1;
        if self.idle_ticks >= STATS_EVERY_IDLE_TICKS {
            self.idle_ticks = 0;
            log::debug!("stats: {}", self.stats.snapshot());
        }
    }

    /// Fold source-side overflow drops into the statistics, logging at a
    /// bounded rate rather than once per drop.
    fn sync_overflow(&mut self, force_log: bool) {
        let dropped = self.rx.dropped();
        if dropped > self.dropped_synced {
            let delta = dropped - self.dropped_synced;
            self.stats.add_dropped(delta);
            self.dropped_synced = dropped;
            if force_log || self.last_overflow_log.elapsed() >= OVERFLOW_LOG_INTERVAL {
                self.last_overflow_log = Instant::now();
                log::warn!("record queue overflow: {delta} events dropped at source");
            }
        }
    }
}
