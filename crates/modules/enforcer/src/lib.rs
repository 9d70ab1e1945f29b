//! Enforcement controller: turns verdicts into process control actions.
//!
//! Per-pid state machine:
//!
//! | current    | verdict   | action            | next       |
//! |------------|-----------|-------------------|------------|
//! | Active     | Allow     | none              | Active     |
//! | Active     | Banned    | freeze (SIGSTOP)  | Frozen     |
//! | Active     | Dangerous | kill (SIGKILL)    | Terminated |
//! | Frozen     | Banned    | none (continuing) | Frozen     |
//! | Frozen     | Dangerous | kill (SIGKILL)    | Terminated |
//! | Terminated | any       | none              | Terminated |
//!
//! `Terminated` is absorbing. `Frozen` only returns to `Active` through an
//! explicit operator [`Enforcer::resume`]; there is no automatic thaw.
//!
//! Signal delivery is fire-and-forget: the controller never waits for the
//! target and never treats a delivery failure as fatal. A target that
//! exited before the signal landed is recorded as `Terminated`, since
//! the process is gone either way.

use std::collections::HashMap;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use warden_core::{ActionTaken, AuditEntry, ByteString, Timestamp, Verdict};

/// Enforcement status of one supervised process. Created lazily on the
/// first non-allow verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Active,
    Frozen { since: Timestamp },
    Terminated,
}

/// Seam to the OS signal layer, so the state machine is testable without
/// signaling real processes.
pub trait ProcessControl {
    fn freeze(&self, pid: Pid) -> Result<(), Errno>;
    fn terminate(&self, pid: Pid) -> Result<(), Errno>;
    fn resume(&self, pid: Pid) -> Result<(), Errno>;
}

/// Real signal delivery.
pub struct SignalControl;

impl ProcessControl for SignalControl {
    fn freeze(&self, pid: Pid) -> Result<(), Errno> {
        kill(pid, Signal::SIGSTOP)
    }

    fn terminate(&self, pid: Pid) -> Result<(), Errno> {
        kill(pid, Signal::SIGKILL)
    }

    fn resume(&self, pid: Pid) -> Result<(), Errno> {
        kill(pid, Signal::SIGCONT)
    }
}

pub struct Enforcer<C> {
    control: C,
    states: HashMap<Pid, ProcessState>,
    /// When false, decisions are audited but no signal is sent.
    enforce: bool,
}

impl<C: ProcessControl> Enforcer<C> {
    pub fn new(control: C, enforce: bool) -> Self {
        Enforcer {
            control,
            states: HashMap::new(),
            enforce,
        }
    }

    pub fn state(&self, pid: Pid) -> ProcessState {
        self.states.get(&pid).copied().unwrap_or(ProcessState::Active)
    }

    /// Apply a verdict to a process. Returns the audit entry for the
    /// transition, or `None` when there is nothing to record (allowed
    /// events, and events for already-terminated processes).
    pub fn apply(
        &mut self,
        pid: Pid,
        verdict: &Verdict,
        now: Timestamp,
        command: &ByteString,
    ) -> Option<AuditEntry> {
        let reason = match verdict {
            Verdict::Allow => return None,
            Verdict::Banned { reason, .. } | Verdict::Dangerous { reason } => reason.clone(),
        };

        let action = match (self.state(pid), verdict) {
            (ProcessState::Terminated, _) => {
                log::debug!("pid {pid} already terminated, ignoring {}", verdict.label());
                return None;
            }
            (ProcessState::Frozen { .. }, Verdict::Banned { .. }) => {
                log::info!("pid {pid} still frozen, continuing: {reason}");
                ActionTaken::StillFrozen
            }
            (_, Verdict::Banned { correction, .. }) => {
                if let Some(hint) = correction {
                    log::warn!("freezing pid {pid}: {reason} (correction: {hint})");
                } else {
                    log::warn!("freezing pid {pid}: {reason}");
                }
                self.freeze(pid, now)
            }
            (_, Verdict::Dangerous { .. }) => {
                log::warn!("terminating pid {pid}: {reason}");
                self.terminate(pid)
            }
            (_, Verdict::Allow) => unreachable!("allow returns early"),
        };

        Some(AuditEntry::new(
            pid.as_raw(),
            verdict.label(),
            reason,
            command.to_lossy_string(),
            action,
        ))
    }

    fn freeze(&mut self, pid: Pid, now: Timestamp) -> ActionTaken {
        if !self.enforce {
            self.states
                .insert(pid, ProcessState::Frozen { since: now });
            return ActionTaken::WouldFreeze;
        }
        match self.control.freeze(pid) {
            Ok(()) => {
                self.states
                    .insert(pid, ProcessState::Frozen { since: now });
                ActionTaken::Frozen
            }
            Err(Errno::ESRCH) => {
                log::info!("pid {pid} exited before freeze could land");
                self.states.insert(pid, ProcessState::Terminated);
                ActionTaken::TargetGone
            }
            Err(errno) => {
                // Delivery failed but the process is still there; record
                // the intent so repeated verdicts don't spam signals.
                log::error!("failed to freeze pid {pid}: {errno}");
                self.states
                    .insert(pid, ProcessState::Frozen { since: now });
                ActionTaken::Frozen
            }
        }
    }

    fn terminate(&mut self, pid: Pid) -> ActionTaken {
        if !self.enforce {
            self.states.insert(pid, ProcessState::Terminated);
            return ActionTaken::WouldTerminate;
        }
        let action = match self.control.terminate(pid) {
            Ok(()) => ActionTaken::Terminated,
            Err(Errno::ESRCH) => {
                log::info!("pid {pid} exited before kill could land");
                ActionTaken::TargetGone
            }
            Err(errno) => {
                log::error!("failed to terminate pid {pid}: {errno}");
                ActionTaken::Terminated
            }
        };
        self.states.insert(pid, ProcessState::Terminated);
        action
    }

    /// Operator-driven resume of a frozen process (the external
    /// correction path). Not reachable from any verdict.
    pub fn resume(&mut self, pid: Pid) -> Result<(), Errno> {
        match self.state(pid) {
            ProcessState::Frozen { .. } => {
                let result = self.control.resume(pid);
                match &result {
                    Ok(()) => log::info!("resumed pid {pid}"),
                    Err(errno) => log::warn!("failed to resume pid {pid}: {errno}"),
                }
                self.states.insert(pid, ProcessState::Active);
                result
            }
            state => {
                log::warn!("resume requested for pid {pid} in state {state:?}");
                Ok(())
            }
        }
    }

    /// Forget a process that is known to be gone.
    pub fn forget(&mut self, pid: Pid) {
        self.states.remove(&pid);
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    //! Recording process control for tests: no signal ever leaves the
    //! process, every call is captured.

    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ControlCall {
        Freeze(i32),
        Terminate(i32),
        Resume(i32),
    }

    #[derive(Clone, Default)]
    pub struct RecordingControl {
        calls: Arc<Mutex<Vec<ControlCall>>>,
        /// Errno returned by every call, if set.
        pub fail_with: Option<Errno>,
    }

    impl RecordingControl {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(errno: Errno) -> Self {
            RecordingControl {
                calls: Arc::default(),
                fail_with: Some(errno),
            }
        }

        pub fn calls(&self) -> Vec<ControlCall> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: ControlCall) -> Result<(), Errno> {
            self.calls.lock().unwrap().push(call);
            match self.fail_with {
                Some(errno) => Err(errno),
                None => Ok(()),
            }
        }
    }

    impl ProcessControl for RecordingControl {
        fn freeze(&self, pid: Pid) -> Result<(), Errno> {
            self.record(ControlCall::Freeze(pid.as_raw()))
        }

        fn terminate(&self, pid: Pid) -> Result<(), Errno> {
            self.record(ControlCall::Terminate(pid.as_raw()))
        }

        fn resume(&self, pid: Pid) -> Result<(), Errno> {
            self.record(ControlCall::Resume(pid.as_raw()))
        }
    }
}
