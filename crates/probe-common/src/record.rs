//! Wire layout of the records produced by the kernel probe.
//!
//! All records are packed little-endian structs with fixed-size string
//! fields. The probe guarantees nothing about their content: strings may
//! lack a NUL terminator, contain arbitrary bytes, or be entirely garbage.
//! Parsing only validates the physical size of the buffer; interpretation
//! of the fields happens in `warden-core`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the fixed `comm` fields (kernel TASK_COMM_LEN).
pub const COMM_LEN: usize = 16;
/// Size of the fixed path field on the exec/file channel.
pub const PATH_LEN: usize = 256;
/// Size of the fixed argument field on the exec/file channel.
pub const ARGS_LEN: usize = 512;
/// Number of raw syscall arguments forwarded per syscall record.
pub const SYSCALL_ARGS: usize = 6;

/// `event_type` values used on the exec/file channel.
pub const EVENT_EXEC: u32 = 1;
pub const EVENT_OPEN: u32 = 2;
pub const EVENT_UNLINK: u32 = 3;
pub const EVENT_RENAME: u32 = 4;
pub const EVENT_WRITE: u32 = 5;

pub const EXEC_RECORD_SIZE: usize = 4 * 4 + 8 + COMM_LEN + PATH_LEN + ARGS_LEN + 4 + 4;
pub const PROCESS_RECORD_SIZE: usize = 4 + 4 + 8 + COMM_LEN + COMM_LEN;
pub const SYSCALL_RECORD_SIZE: usize = 4 + 4 + 8 + SYSCALL_ARGS * 8;

/// One logical channel per event family. The wire tag doubles as the
/// frame kind on the record socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Execution and file access records (`ExecRecord`).
    Exec,
    /// Process creation records (`ProcessRecord`).
    Process,
    /// Pre-filtered raw syscall records (`SyscallRecord`).
    Syscall,
}

impl ChannelKind {
    pub fn from_wire(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(ChannelKind::Exec),
            2 => Some(ChannelKind::Process),
            3 => Some(ChannelKind::Syscall),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            ChannelKind::Exec => 1,
            ChannelKind::Process => 2,
            ChannelKind::Syscall => 3,
        }
    }

    /// Exact payload size of a record on this channel.
    pub fn record_size(self) -> usize {
        match self {
            ChannelKind::Exec => EXEC_RECORD_SIZE,
            ChannelKind::Process => PROCESS_RECORD_SIZE,
            ChannelKind::Syscall => SYSCALL_RECORD_SIZE,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("truncated {kind:?} record: expected {expected} bytes, got {got}")]
    Truncated {
        kind: ChannelKind,
        expected: usize,
        got: usize,
    },
    #[error("unknown channel tag {0}")]
    UnknownChannel(u32),
}

/// Record of the exec/file channel. Also used for file access events,
/// discriminated by `event_type`; for those `filename` holds the target
/// path and `args` is empty.
#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub pid: u32,
    pub ppid: u32,
    pub uid: u32,
    pub event_type: u32,
    pub timestamp_ns: u64,
    pub comm: [u8; COMM_LEN],
    pub filename: [u8; PATH_LEN],
    pub args: [u8; ARGS_LEN],
    pub flags: u32,
    pub mode: u32,
}

/// Record of the process creation channel.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: u32,
    pub ppid: u32,
    pub timestamp_ns: u64,
    pub comm: [u8; COMM_LEN],
    pub parent_comm: [u8; COMM_LEN],
}

/// Record of the syscall channel. The probe pre-filters to the monitored
/// syscall set and forwards the raw register values.
#[derive(Debug, Clone)]
pub struct SyscallRecord {
    pub syscall_nr: u32,
    pub pid: u32,
    pub timestamp_ns: u64,
    pub args: [u64; SYSCALL_ARGS],
}

#[derive(Debug, Clone)]
pub enum RawRecord {
    Exec(ExecRecord),
    Process(ProcessRecord),
    Syscall(SyscallRecord),
}

impl RawRecord {
    /// Parse a record of the given channel from a raw payload.
    ///
    /// The buffer must contain at least the full record; trailing bytes are
    /// ignored. Never panics on short or garbage input.
    pub fn parse(kind: ChannelKind, payload: &[u8]) -> Result<RawRecord, RecordError> {
        let expected = kind.record_size();
        if payload.len() < expected {
            return Err(RecordError::Truncated {
                kind,
                expected,
                got: payload.len(),
            });
        }
        let mut buf = payload;
        Ok(match kind {
            ChannelKind::Exec => {
                let mut record = ExecRecord {
                    pid: buf.get_u32_le(),
                    ppid: buf.get_u32_le(),
                    uid: buf.get_u32_le(),
                    event_type: buf.get_u32_le(),
                    timestamp_ns: buf.get_u64_le(),
                    comm: [0; COMM_LEN],
                    filename: [0; PATH_LEN],
                    args: [0; ARGS_LEN],
                    flags: 0,
                    mode: 0,
                };
                buf.copy_to_slice(&mut record.comm);
                buf.copy_to_slice(&mut record.filename);
                buf.copy_to_slice(&mut record.args);
                record.flags = buf.get_u32_le();
                record.mode = buf.get_u32_le();
                RawRecord::Exec(record)
            }
            ChannelKind::Process => {
                let mut record = ProcessRecord {
                    pid: buf.get_u32_le(),
                    ppid: buf.get_u32_le(),
                    timestamp_ns: buf.get_u64_le(),
                    comm: [0; COMM_LEN],
                    parent_comm: [0; COMM_LEN],
                };
                buf.copy_to_slice(&mut record.comm);
                buf.copy_to_slice(&mut record.parent_comm);
                RawRecord::Process(record)
            }
            ChannelKind::Syscall => {
                let mut record = SyscallRecord {
                    syscall_nr: buf.get_u32_le(),
                    pid: buf.get_u32_le(),
                    timestamp_ns: buf.get_u64_le(),
                    args: [0; SYSCALL_ARGS],
                };
                for arg in record.args.iter_mut() {
                    *arg = buf.get_u64_le();
                }
                RawRecord::Syscall(record)
            }
        })
    }
}

fn put_padded(buf: &mut BytesMut, data: &[u8], len: usize) {
    let n = data.len().min(len);
    buf.put_slice(&data[..n]);
    buf.put_bytes(0, len - n);
}

impl ExecRecord {
    /// Build a record with bounded string fields. Oversized input is
    /// silently truncated to the field size, like the probe does.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: u32,
        ppid: u32,
        uid: u32,
        event_type: u32,
        timestamp_ns: u64,
        comm: &[u8],
        filename: &[u8],
        args: &[u8],
    ) -> Self {
        let mut record = ExecRecord {
            pid,
            ppid,
            uid,
            event_type,
            timestamp_ns,
            comm: [0; COMM_LEN],
            filename: [0; PATH_LEN],
            args: [0; ARGS_LEN],
            flags: 0,
            mode: 0,
        };
        copy_bounded(&mut record.comm, comm);
        copy_bounded(&mut record.filename, filename);
        copy_bounded(&mut record.args, args);
        record
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(EXEC_RECORD_SIZE);
        buf.put_u32_le(self.pid);
        buf.put_u32_le(self.ppid);
        buf.put_u32_le(self.uid);
        buf.put_u32_le(self.event_type);
        buf.put_u64_le(self.timestamp_ns);
        put_padded(&mut buf, &self.comm, COMM_LEN);
        put_padded(&mut buf, &self.filename, PATH_LEN);
        put_padded(&mut buf, &self.args, ARGS_LEN);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.mode);
        buf.freeze()
    }
}

impl ProcessRecord {
    pub fn new(pid: u32, ppid: u32, timestamp_ns: u64, comm: &[u8], parent_comm: &[u8]) -> Self {
        let mut record = ProcessRecord {
            pid,
            ppid,
            timestamp_ns,
            comm: [0; COMM_LEN],
            parent_comm: [0; COMM_LEN],
        };
        copy_bounded(&mut record.comm, comm);
        copy_bounded(&mut record.parent_comm, parent_comm);
        record
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PROCESS_RECORD_SIZE);
        buf.put_u32_le(self.pid);
        buf.put_u32_le(self.ppid);
        buf.put_u64_le(self.timestamp_ns);
        put_padded(&mut buf, &self.comm, COMM_LEN);
        put_padded(&mut buf, &self.parent_comm, COMM_LEN);
        buf.freeze()
    }
}

impl SyscallRecord {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SYSCALL_RECORD_SIZE);
        buf.put_u32_le(self.syscall_nr);
        buf.put_u32_le(self.pid);
        buf.put_u64_le(self.timestamp_ns);
        for arg in self.args {
            buf.put_u64_le(arg);
        }
        buf.freeze()
    }
}

fn copy_bounded(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
}
