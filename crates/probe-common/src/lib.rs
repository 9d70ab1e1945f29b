//! Userspace side of the kernel probe boundary.
//!
//! The probe itself lives in the kernel and is loaded by a separate
//! component. This crate only speaks its wire protocol:
//!
//! - [`record`]: the fixed-layout binary records the probe emits on its
//!   event channels, with bounds-checked parsing. Record contents are
//!   untrusted: string fields are raw byte buffers with no termination or
//!   encoding guarantee.
//! - [`source`]: the inbound transport. Records arrive framed over a Unix
//!   socket and are handed to the engine through a bounded queue which
//!   drops (and counts) on overflow, never blocking the producer.
//! - [`control`]: the outbound transport. Userspace pushes the pre-exec
//!   veto table and a couple of configuration scalars into the probe.

pub mod control;
pub mod record;
pub mod source;

pub use control::{ControlError, MemoryControl, ProbeControl, UnixProbeControl, VetoEntry};
pub use record::{ChannelKind, RawRecord, RecordError};
pub use source::{RawSample, RecordReceiver, RecordSender, RecordSource, SourceError, record_queue};

pub use nix::unistd::Pid;
