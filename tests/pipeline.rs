//! End-to-end pipeline tests: raw records in, signals and audit lines out.
//!
//! The engine runs against an in-memory record queue and a recording
//! process control, so nothing here touches real processes.

use std::{path::PathBuf, sync::Arc, time::Duration};

use audit_logger::{AuditLogger, Config as AuditConfig};
use enforcer::{
    Enforcer,
    test_util::{ControlCall, RecordingControl},
};
use policy_engine::{PolicyEngine, RuleSet};
use probe_common::record::{ChannelKind, EVENT_EXEC, ExecRecord, SyscallRecord};
use probe_common::source::{RawSample, RecordSender, record_queue};
use tokio::sync::watch;
use warden::wardend::Engine;
use warden_core::{Statistics, StatsSnapshot};

struct Harness {
    tx: RecordSender,
    control: RecordingControl,
    audit_file: PathBuf,
    shutdown: watch::Sender<bool>,
    engine: tokio::task::JoinHandle<anyhow::Result<StatsSnapshot>>,
    _dir: PathBuf,
}

fn harness(name: &str, queue_size: usize) -> Harness {
    let dir = std::env::temp_dir().join(format!("warden-pipeline-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let audit_file = dir.join("audit.log");

    let (tx, rx) = record_queue(queue_size);
    let control = RecordingControl::new();
    let mut audit_config = AuditConfig::new(&audit_file);
    audit_config.console = false;
    let audit = AuditLogger::open(audit_config).unwrap();
    let (shutdown, rx_shutdown) = watch::channel(false);

    let engine = Engine::new(
        rx,
        PolicyEngine::new(RuleSet::builtin()),
        Enforcer::new(control.clone(), true),
        audit,
        Arc::new(Statistics::new()),
        Duration::from_millis(10),
        rx_shutdown,
        None,
    );
    let engine = tokio::spawn(engine.run());

    Harness {
        tx,
        control,
        audit_file,
        shutdown,
        engine,
        _dir: dir,
    }
}

impl Harness {
    async fn finish(self) -> (StatsSnapshot, Vec<ControlCall>, String) {
        // Give the engine a few poll intervals to drain the queue.
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.shutdown.send(true).unwrap();
        let snapshot = self.engine.await.unwrap().unwrap();
        let audit = std::fs::read_to_string(&self.audit_file).unwrap_or_default();
        let _ = std::fs::remove_dir_all(&self._dir);
        (snapshot, self.control.calls(), audit)
    }
}

fn exec_sample(pid: u32, comm: &str, path: &str, args: &str, ts: u64) -> RawSample {
    RawSample {
        kind: ChannelKind::Exec,
        payload: ExecRecord::new(
            pid,
            1,
            1000,
            EVENT_EXEC,
            ts,
            comm.as_bytes(),
            path.as_bytes(),
            args.as_bytes(),
        )
        .encode(),
    }
}

#[tokio::test]
async fn dangerous_command_is_terminated_and_audited() {
    let h = harness("dangerous", 64);
    h.tx.send(exec_sample(900, "bash", "/usr/bin/rm", "rm -rf /", 1_000));

    let (snapshot, calls, audit) = h.finish().await;
    assert_eq!(snapshot.verdicts_dangerous, 1);
    assert_eq!(calls, vec![ControlCall::Terminate(900)]);
    assert!(audit.contains("VERDICT=DANGEROUS"));
    assert!(audit.contains("PID=900"));
    assert!(audit.contains("Recursive root deletion"));
    assert!(audit.contains("COMMAND=\"bash /usr/bin/rm rm -rf /\""));
}

#[tokio::test]
async fn banned_command_freezes_once() {
    let h = harness("banned", 64);
    // The same hallucinated-library install replayed twice: one freeze.
    let sample = exec_sample(901, "python3", "/usr/bin/pip", "pip install claude_agent_sdk", 1_000);
    h.tx.send(sample.clone());
    h.tx.send(sample);

    let (snapshot, calls, audit) = h.finish().await;
    assert_eq!(snapshot.verdicts_banned, 2);
    assert_eq!(calls, vec![ControlCall::Freeze(901)]);
    assert!(audit.contains("VERDICT=BANNED"));
    assert!(audit.contains("Hallucinated library"));
    // First transition plus the "continuing" record.
    assert_eq!(audit.lines().count(), 2);
}

#[tokio::test]
async fn terminated_is_absorbing_across_events() {
    let h = harness("absorbing", 64);
    h.tx.send(exec_sample(902, "bash", "/usr/bin/rm", "rm -rf /", 1_000));
    h.tx.send(exec_sample(902, "bash", "/usr/bin/rm", "rm -rf /", 2_000));
    h.tx.send(exec_sample(
        902,
        "python3",
        "/usr/bin/pip",
        "pip install claude_agent_sdk",
        3_000,
    ));

    let (_, calls, audit) = h.finish().await;
    assert_eq!(calls, vec![ControlCall::Terminate(902)]);
    assert_eq!(audit.lines().count(), 1);
}

#[tokio::test]
async fn harmless_command_is_untouched_and_unaudited() {
    let h = harness("allow", 64);
    h.tx.send(exec_sample(903, "bash", "/usr/bin/ls", "ls -la", 1_000));

    let (snapshot, calls, audit) = h.finish().await;
    assert_eq!(snapshot.events_emitted, 1);
    assert_eq!(snapshot.verdicts_banned, 0);
    assert_eq!(snapshot.verdicts_dangerous, 0);
    assert!(calls.is_empty());
    assert_eq!(audit, "");
}

#[tokio::test]
async fn overflow_and_garbage_are_counted_not_fatal() {
    let dir = std::env::temp_dir().join(format!("warden-pipeline-flood-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let audit_file = dir.join("audit.log");

    // Fill the queue before the engine starts draining: everything past
    // the capacity is dropped at the source. The first slot holds a
    // garbage payload whose decode must fail without panicking.
    let (tx, rx) = record_queue(2);
    tx.send(RawSample {
        kind: ChannelKind::Exec,
        payload: bytes::Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
    });
    for i in 0..50 {
        tx.send(exec_sample(1000 + i, "bash", "/usr/bin/ls", "ls", u64::from(i) * 1_000));
    }

    let control = RecordingControl::new();
    let mut audit_config = AuditConfig::new(&audit_file);
    audit_config.console = false;
    let audit = AuditLogger::open(audit_config).unwrap();
    let (shutdown, rx_shutdown) = watch::channel(false);
    let engine = Engine::new(
        rx,
        PolicyEngine::new(RuleSet::builtin()),
        Enforcer::new(control, true),
        audit,
        Arc::new(Statistics::new()),
        Duration::from_millis(10),
        rx_shutdown,
        None,
    );
    let engine = tokio::spawn(engine.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.send(true).unwrap();
    let snapshot = engine.await.unwrap().unwrap();
    let _ = std::fs::remove_dir_all(&dir);

    // 51 sends into a 2-slot queue: 2 delivered, 49 dropped at the
    // source, plus the delivered garbage record dropped at decode.
    assert_eq!(snapshot.events_seen, 2);
    assert_eq!(snapshot.events_dropped, 50);
}

#[tokio::test]
async fn syscall_telemetry_is_filtered_not_judged() {
    let h = harness("syscall", 64);
    h.tx.send(RawSample {
        kind: ChannelKind::Syscall,
        payload: SyscallRecord {
            syscall_nr: 41,
            pid: 904,
            timestamp_ns: 1_000,
            args: [2, 1, 6, 0, 0, 0],
        }
        .encode(),
    });

    let (snapshot, calls, audit) = h.finish().await;
    assert_eq!(snapshot.events_filtered, 1);
    assert_eq!(snapshot.events_emitted, 0);
    assert!(calls.is_empty());
    assert_eq!(audit, "");
}
