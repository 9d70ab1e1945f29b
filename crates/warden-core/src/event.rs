//! Typed events and the decoder turning raw probe records into them.

use std::fmt;

use nix::unistd::Pid;
use probe_common::record::{self, RawRecord, RecordError};
use probe_common::source::RawSample;
use strum::EnumDiscriminants;
use thiserror::Error;

use crate::time::Timestamp;

/// A bounded byte buffer captured from a kernel record.
///
/// Kernel-sourced strings are untrusted: not guaranteed NUL-terminated,
/// not guaranteed UTF-8. The constructor truncates at the first NUL (the
/// rest of the fixed field is padding); everything after that point is
/// kept as raw bytes. Conversion to `String` is lossy and only done for
/// display and audit output, never for matching.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteString(Vec<u8>);

impl ByteString {
    /// Capture a fixed-size record field, stopping at the first NUL.
    pub fn from_field(field: &[u8]) -> Self {
        let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
        ByteString(field[..end].to_vec())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ByteString(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_lossy_string(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<&str> for ByteString {
    fn from(s: &str) -> Self {
        ByteString(s.as_bytes().to_vec())
    }
}

impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

/// What kind of file access a [`Event::FileAccess`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccessKind {
    Open,
    Unlink,
    Rename,
    Write,
}

impl FileAccessKind {
    fn from_event_type(event_type: u32) -> Option<Self> {
        match event_type {
            record::EVENT_OPEN => Some(FileAccessKind::Open),
            record::EVENT_UNLINK => Some(FileAccessKind::Unlink),
            record::EVENT_RENAME => Some(FileAccessKind::Rename),
            record::EVENT_WRITE => Some(FileAccessKind::Write),
            _ => None,
        }
    }
}

impl fmt::Display for FileAccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileAccessKind::Open => "open",
            FileAccessKind::Unlink => "unlink",
            FileAccessKind::Rename => "rename",
            FileAccessKind::Write => "write",
        };
        write!(f, "{name}")
    }
}

/// A decoded probe event.
#[derive(Debug, Clone, EnumDiscriminants)]
#[strum_discriminants(derive(Hash))]
#[strum_discriminants(name(EventKind))]
pub enum Event {
    Exec {
        pid: Pid,
        ppid: Pid,
        uid: u32,
        gid: u32,
        timestamp: Timestamp,
        comm: ByteString,
        program_path: ByteString,
        argv0: ByteString,
    },
    FileAccess {
        pid: Pid,
        uid: u32,
        gid: u32,
        timestamp: Timestamp,
        target_path: ByteString,
        access: FileAccessKind,
    },
    ProcessCreate {
        pid: Pid,
        ppid: Pid,
        timestamp: Timestamp,
        comm: ByteString,
        parent_comm: ByteString,
    },
    Syscall {
        pid: Pid,
        timestamp: Timestamp,
        syscall_nr: u32,
        args: [u64; record::SYSCALL_ARGS],
    },
}

impl Event {
    pub fn pid(&self) -> Pid {
        match self {
            Event::Exec { pid, .. }
            | Event::FileAccess { pid, .. }
            | Event::ProcessCreate { pid, .. }
            | Event::Syscall { pid, .. } => *pid,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Event::Exec { timestamp, .. }
            | Event::FileAccess { timestamp, .. }
            | Event::ProcessCreate { timestamp, .. }
            | Event::Syscall { timestamp, .. } => *timestamp,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Exec {
                pid,
                comm,
                program_path,
                argv0,
                ..
            } => write!(f, "EXEC {comm} ({pid}) {program_path} {argv0}"),
            Event::FileAccess {
                pid,
                target_path,
                access,
                ..
            } => write!(f, "FILE {access} ({pid}) {target_path}"),
            Event::ProcessCreate {
                pid,
                ppid,
                comm,
                parent_comm,
                ..
            } => write!(f, "SPAWN {comm} ({pid}) from {parent_comm} ({ppid})"),
            Event::Syscall {
                pid, syscall_nr, ..
            } => write!(f, "SYSCALL {syscall_nr} ({pid})"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("unknown event type {0} on exec channel")]
    UnknownEventType(u32),
}

/// Decode one raw sample into a typed event.
///
/// Failures drop the sample: the caller counts it and moves on. No event
/// kind depends on any other having decoded first.
pub fn decode(sample: &RawSample) -> Result<Event, DecodeError> {
    let record = RawRecord::parse(sample.kind, &sample.payload)?;
    Ok(match record {
        RawRecord::Exec(r) => {
            let pid = Pid::from_raw(r.pid as i32);
            let timestamp = Timestamp::from(r.timestamp_ns);
            match r.event_type {
                record::EVENT_EXEC => Event::Exec {
                    pid,
                    ppid: Pid::from_raw(r.ppid as i32),
                    uid: r.uid,
                    // The probe reports the effective uid only; gid stays 0
                    // until the record format carries it.
                    gid: 0,
                    timestamp,
                    comm: ByteString::from_field(&r.comm),
                    program_path: ByteString::from_field(&r.filename),
                    argv0: ByteString::from_field(&r.args),
                },
                other => {
                    let access = FileAccessKind::from_event_type(other)
                        .ok_or(DecodeError::UnknownEventType(other))?;
                    Event::FileAccess {
                        pid,
                        uid: r.uid,
                        gid: 0,
                        timestamp,
                        target_path: ByteString::from_field(&r.filename),
                        access,
                    }
                }
            }
        }
        RawRecord::Process(r) => Event::ProcessCreate {
            pid: Pid::from_raw(r.pid as i32),
            ppid: Pid::from_raw(r.ppid as i32),
            timestamp: Timestamp::from(r.timestamp_ns),
            comm: ByteString::from_field(&r.comm),
            parent_comm: ByteString::from_field(&r.parent_comm),
        },
        RawRecord::Syscall(r) => Event::Syscall {
            pid: Pid::from_raw(r.pid as i32),
            timestamp: Timestamp::from(r.timestamp_ns),
            syscall_nr: r.syscall_nr,
            args: r.args,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_common::record::{ChannelKind, EVENT_EXEC, EVENT_UNLINK, ExecRecord};

    fn sample(kind: ChannelKind, payload: bytes::Bytes) -> RawSample {
        RawSample { kind, payload }
    }

    #[test]
    fn byte_string_stops_at_nul() {
        let field = *b"bash\0\0\0\0\0\0\0\0\0\0\0\0";
        let s = ByteString::from_field(&field);
        assert_eq!(s.as_bytes(), b"bash");
        assert_eq!(s.to_string(), "bash");
    }

    #[test]
    fn byte_string_keeps_invalid_utf8() {
        let s = ByteString::from_field(&[0xff, 0xfe, b'x', 0, 0]);
        assert_eq!(s.as_bytes(), &[0xff, 0xfe, b'x']);
        // Lossy rendering never panics.
        assert!(s.to_lossy_string().contains('x'));
    }

    #[test]
    fn decodes_exec_event() {
        let record = ExecRecord::new(
            100,
            1,
            1000,
            EVENT_EXEC,
            42,
            b"bash",
            b"/usr/bin/rm",
            b"rm -rf /tmp/scratch",
        );
        let event = decode(&sample(ChannelKind::Exec, record.encode())).unwrap();
        match event {
            Event::Exec {
                pid,
                uid,
                comm,
                program_path,
                argv0,
                ..
            } => {
                assert_eq!(pid.as_raw(), 100);
                assert_eq!(uid, 1000);
                assert_eq!(comm.as_bytes(), b"bash");
                assert_eq!(program_path.as_bytes(), b"/usr/bin/rm");
                assert_eq!(argv0.as_bytes(), b"rm -rf /tmp/scratch");
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn decodes_file_access_event() {
        let record = ExecRecord::new(7, 1, 0, EVENT_UNLINK, 1, b"rm", b"/etc/passwd", b"");
        let event = decode(&sample(ChannelKind::Exec, record.encode())).unwrap();
        match event {
            Event::FileAccess {
                target_path,
                access,
                ..
            } => {
                assert_eq!(target_path.as_bytes(), b"/etc/passwd");
                assert_eq!(access, FileAccessKind::Unlink);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let record = ExecRecord::new(7, 1, 0, 99, 1, b"x", b"y", b"");
        let err = decode(&sample(ChannelKind::Exec, record.encode())).unwrap_err();
        assert_eq!(err, DecodeError::UnknownEventType(99));
    }

    #[test]
    fn truncated_sample_is_rejected_not_panicked() {
        let record = ExecRecord::new(7, 1, 0, EVENT_EXEC, 1, b"x", b"y", b"");
        let wire = record.encode();
        let err = decode(&sample(ChannelKind::Exec, wire.slice(..50))).unwrap_err();
        assert!(matches!(err, DecodeError::Record(_)));
    }
}
