//! Inbound record transport.
//!
//! The probe loader streams records over a Unix socket as length-prefixed
//! frames: `kind: u32 le, len: u32 le, payload: len bytes`. Frames are
//! pushed into a bounded queue; when the queue is full the frame is
//! dropped and counted. The producer is never blocked, so a slow engine
//! shows up as a growing drop counter, not as probe back-pressure.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use thiserror::Error;
use tokio::{
    io::AsyncReadExt,
    net::{UnixListener, UnixStream},
    sync::mpsc,
    task::JoinHandle,
};

use crate::record::ChannelKind;

/// Frames above this size are protocol violations and close the connection.
pub const MAX_FRAME_LEN: usize = 4096;

/// Default capacity of the record queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// One undecoded record as read from the wire.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub kind: ChannelKind,
    pub payload: Bytes,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot bind record socket {path}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Producer half of the record queue.
///
/// `send` must not block: it is called from transport tasks that must keep
/// draining their socket regardless of engine speed.
#[derive(Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<RawSample>,
    dropped: Arc<AtomicU64>,
}

impl RecordSender {
    pub fn send(&self, sample: RawSample) {
        if self.tx.try_send(sample).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Consumer half of the record queue.
pub struct RecordReceiver {
    rx: mpsc::Receiver<RawSample>,
    dropped: Arc<AtomicU64>,
}

impl RecordReceiver {
    pub async fn recv(&mut self) -> Option<RawSample> {
        self.rx.recv().await
    }

    /// Total samples dropped at the source since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a bounded record queue.
pub fn record_queue(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        RecordSender {
            tx,
            dropped: dropped.clone(),
        },
        RecordReceiver { rx, dropped },
    )
}

/// Unix socket record source. Accepts connections from the probe loader
/// and feeds every well-formed frame into the record queue.
pub struct RecordSource {
    listener: UnixListener,
    sender: RecordSender,
}

impl RecordSource {
    /// Bind the record socket. A stale socket file from a previous run is
    /// removed first. Failure here is fatal for the caller: without a
    /// record source there is nothing to supervise.
    pub fn bind(path: &Path, sender: RecordSender) -> Result<Self, SourceError> {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        let listener = UnixListener::bind(path).map_err(|source| SourceError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(RecordSource { listener, sender })
    }

    /// Run the accept loop until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, _)) => {
                        let sender = self.sender.clone();
                        tokio::spawn(async move {
                            if let Err(err) = read_frames(stream, sender).await {
                                log::debug!("record connection closed: {err}");
                            }
                        });
                    }
                    Err(err) => {
                        log::warn!("record socket accept failed: {err}");
                    }
                }
            }
        })
    }
}

async fn read_frames(mut stream: UnixStream, sender: RecordSender) -> io::Result<()> {
    loop {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await?;
        let tag = u32::from_le_bytes(header[..4].try_into().unwrap());
        let len = u32::from_le_bytes(header[4..].try_into().unwrap()) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit"),
            ));
        }
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;
        // An unknown channel tag is a protocol mismatch with the loader,
        // not a malformed event. Drop the frame but keep the connection.
        match ChannelKind::from_wire(tag) {
            Some(kind) => sender.send(RawSample {
                kind,
                payload: payload.into(),
            }),
            None => log::warn!("dropping frame with unknown channel tag {tag}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EVENT_EXEC, ExecRecord};
    use tokio::io::AsyncWriteExt;

    fn frame(kind: ChannelKind, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&kind.to_wire().to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("warden-test-{}-{}.sock", name, std::process::id()))
    }

    #[tokio::test]
    async fn frames_reach_the_queue() {
        let path = socket_path("frames");
        let (tx, mut rx) = record_queue(16);
        let source = RecordSource::bind(&path, tx).unwrap();
        let handle = source.spawn();

        let record = ExecRecord::new(9, 1, 0, EVENT_EXEC, 1, b"sh", b"/bin/ls", b"ls -la");
        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream
            .write_all(&frame(ChannelKind::Exec, &record.encode()))
            .await
            .unwrap();

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.kind, ChannelKind::Exec);
        assert_eq!(sample.payload.len(), record.encode().len());
        assert_eq!(rx.dropped(), 0);

        handle.abort();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (tx, rx) = record_queue(2);
        for _ in 0..10 {
            tx.send(RawSample {
                kind: ChannelKind::Syscall,
                payload: Bytes::from_static(&[0u8; 64]),
            });
        }
        assert_eq!(rx.dropped(), 8);
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let path = socket_path("oversized");
        let (tx, mut rx) = record_queue(4);
        let source = RecordSource::bind(&path, tx).unwrap();
        let handle = source.spawn();

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let mut bad = Vec::new();
        bad.extend_from_slice(&1u32.to_le_bytes());
        bad.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes());
        stream.write_all(&bad).await.unwrap();

        // The server must drop the connection without delivering anything.
        let polled = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await;
        assert!(polled.is_err());

        handle.abort();
        let _ = std::fs::remove_file(&path);
    }
}
