//! Outbound probe configuration.
//!
//! The probe keeps a small fixed-capacity veto table that its synchronous
//! pre-exec hook consults before allowing a program to run. Userspace owns
//! the table content and pushes full replacements; the probe never sees a
//! partially updated table. Two scalar flags (enforcement, verbose logging)
//! ride the same channel.

use std::{io, io::Write, os::unix::net::UnixStream, path::Path};

use thiserror::Error;

/// Capacity of the probe-side veto table.
pub const MAX_VETO_ENTRIES: usize = 32;
/// Fixed pattern size of a veto entry.
pub const VETO_PATTERN_LEN: usize = 64;
/// Wire size of one entry: pattern + exact_match + enabled + reserved.
pub const VETO_ENTRY_SIZE: usize = VETO_PATTERN_LEN + 1 + 1 + 2;

const OP_VETO_TABLE: u8 = 1;
const OP_ENFORCEMENT: u8 = 2;
const OP_VERBOSE: u8 = 3;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("veto table of {got} entries exceeds probe capacity {max}")]
    TableTooLarge { got: usize, max: usize },
    #[error("veto pattern of {got} bytes exceeds field size {max}")]
    PatternTooLong { got: usize, max: usize },
    #[error("probe control channel: {0}")]
    Io(#[from] io::Error),
}

/// One entry of the probe's pre-exec veto table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VetoEntry {
    pattern: [u8; VETO_PATTERN_LEN],
    pattern_len: usize,
    pub exact_match: bool,
    pub enabled: bool,
}

impl VetoEntry {
    pub fn new(pattern: &[u8], exact_match: bool) -> Result<Self, ControlError> {
        if pattern.len() > VETO_PATTERN_LEN {
            return Err(ControlError::PatternTooLong {
                got: pattern.len(),
                max: VETO_PATTERN_LEN,
            });
        }
        let mut entry = VetoEntry {
            pattern: [0; VETO_PATTERN_LEN],
            pattern_len: pattern.len(),
            exact_match,
            enabled: true,
        };
        entry.pattern[..pattern.len()].copy_from_slice(pattern);
        Ok(entry)
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern[..self.pattern_len]
    }

    pub fn to_wire(&self) -> [u8; VETO_ENTRY_SIZE] {
        let mut out = [0u8; VETO_ENTRY_SIZE];
        out[..VETO_PATTERN_LEN].copy_from_slice(&self.pattern);
        out[VETO_PATTERN_LEN] = self.exact_match as u8;
        out[VETO_PATTERN_LEN + 1] = self.enabled as u8;
        out
    }
}

/// Configuration channel into the probe.
///
/// `push_veto_table` is the only latency-sensitive write: the probe's
/// pre-exec hook reads the table synchronously. Implementations must push
/// the whole table in one message.
pub trait ProbeControl: Send {
    fn push_veto_table(&mut self, entries: &[VetoEntry]) -> Result<(), ControlError>;
    fn set_enforcement(&mut self, enabled: bool) -> Result<(), ControlError>;
    fn set_verbose(&mut self, enabled: bool) -> Result<(), ControlError>;
}

/// Probe control over the loader's Unix control socket.
///
/// Messages are tiny and synchronous on purpose: a veto update must be
/// visible to the probe before the caller reports success.
pub struct UnixProbeControl {
    stream: UnixStream,
}

impl UnixProbeControl {
    pub fn connect(path: &Path) -> Result<Self, ControlError> {
        let stream = UnixStream::connect(path)?;
        Ok(UnixProbeControl { stream })
    }

    fn send(&mut self, opcode: u8, payload: &[u8]) -> Result<(), ControlError> {
        let mut message = Vec::with_capacity(5 + payload.len());
        message.push(opcode);
        message.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        message.extend_from_slice(payload);
        self.stream.write_all(&message)?;
        self.stream.flush()?;
        Ok(())
    }
}

impl ProbeControl for UnixProbeControl {
    fn push_veto_table(&mut self, entries: &[VetoEntry]) -> Result<(), ControlError> {
        if entries.len() > MAX_VETO_ENTRIES {
            return Err(ControlError::TableTooLarge {
                got: entries.len(),
                max: MAX_VETO_ENTRIES,
            });
        }
        let mut payload = Vec::with_capacity(4 + entries.len() * VETO_ENTRY_SIZE);
        payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for entry in entries {
            payload.extend_from_slice(&entry.to_wire());
        }
        self.send(OP_VETO_TABLE, &payload)
    }

    fn set_enforcement(&mut self, enabled: bool) -> Result<(), ControlError> {
        self.send(OP_ENFORCEMENT, &[enabled as u8])
    }

    fn set_verbose(&mut self, enabled: bool) -> Result<(), ControlError> {
        self.send(OP_VERBOSE, &[enabled as u8])
    }
}

/// In-memory probe control, used when no probe loader is attached and by
/// tests. Records every push so the last table is inspectable.
#[derive(Debug, Default)]
pub struct MemoryControl {
    pub tables: Vec<Vec<VetoEntry>>,
    pub enforcement: Option<bool>,
    pub verbose: Option<bool>,
}

impl ProbeControl for MemoryControl {
    fn push_veto_table(&mut self, entries: &[VetoEntry]) -> Result<(), ControlError> {
        if entries.len() > MAX_VETO_ENTRIES {
            return Err(ControlError::TableTooLarge {
                got: entries.len(),
                max: MAX_VETO_ENTRIES,
            });
        }
        self.tables.push(entries.to_vec());
        Ok(())
    }

    fn set_enforcement(&mut self, enabled: bool) -> Result<(), ControlError> {
        self.enforcement = Some(enabled);
        Ok(())
    }

    fn set_verbose(&mut self, enabled: bool) -> Result<(), ControlError> {
        self.verbose = Some(enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_wire_layout() {
        let entry = VetoEntry::new(b"/usr/bin/nmap", true).unwrap();
        let wire = entry.to_wire();
        assert_eq!(&wire[..13], b"/usr/bin/nmap");
        assert_eq!(wire[13], 0);
        assert_eq!(wire[VETO_PATTERN_LEN], 1);
        assert_eq!(wire[VETO_PATTERN_LEN + 1], 1);
        assert_eq!(wire.len(), VETO_ENTRY_SIZE);
    }

    #[test]
    fn oversized_pattern_is_rejected() {
        let long = vec![b'a'; VETO_PATTERN_LEN + 1];
        assert!(matches!(
            VetoEntry::new(&long, false),
            Err(ControlError::PatternTooLong { got: 65, max: 64 })
        ));
    }

    #[test]
    fn table_capacity_is_enforced() {
        let mut control = MemoryControl::default();
        let entry = VetoEntry::new(b"mkfs", false).unwrap();
        let table = vec![entry; MAX_VETO_ENTRIES + 1];
        assert!(matches!(
            control.push_veto_table(&table),
            Err(ControlError::TableTooLarge { got: 33, max: 32 })
        ));
        assert!(control.push_veto_table(&table[..MAX_VETO_ENTRIES]).is_ok());
        assert_eq!(control.tables.len(), 1);
    }
}
