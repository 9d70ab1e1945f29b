//! Bounded process ancestry cache.
//!
//! Keeps a three-generation identity record per observed process, used as
//! context when judging its behavior. This is a reputation cache, not an
//! audit trail: when full, insertion evicts the least-recently-*looked-up*
//! entry, so processes the engine keeps consulting stay resident while
//! one-shot children age out.
//!
//! Implemented as an arena of nodes plus a pid index and an intrusive
//! recency list; no allocation happens on lookup and eviction is O(1).
//! Owned exclusively by the ingestion task, so there is no locking.

use std::collections::HashMap;

use nix::unistd::Pid;

use crate::event::ByteString;
use crate::time::Timestamp;

pub const DEFAULT_CAPACITY: usize = 8192;

const NIL: usize = usize::MAX;

/// Three generations of process identity. Ancestry is best effort:
/// unknown ancestors are pid 0 with an empty comm, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestryRecord {
    pub pid: Pid,
    pub parent_pid: Pid,
    pub grandparent_pid: Pid,
    pub start_time: Timestamp,
    pub comm: ByteString,
    pub parent_comm: ByteString,
    pub grandparent_comm: ByteString,
}

struct Node {
    record: AncestryRecord,
    prev: usize,
    next: usize,
}

pub struct AncestryTracker {
    capacity: usize,
    index: HashMap<Pid, usize>,
    arena: Vec<Node>,
    free: Vec<usize>,
    /// Most recently used node.
    head: usize,
    /// Least recently used node, evicted first.
    tail: usize,
}

impl AncestryTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ancestry tracker needs capacity > 0");
        AncestryTracker {
            capacity,
            index: HashMap::with_capacity(capacity),
            arena: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Insert or overwrite the record for `pid` from a process creation
    /// event. Grandparent identity is taken from the parent's record when
    /// we have one; a missing parent is normal (the parent predates the
    /// engine, or its record was evicted).
    pub fn update(
        &mut self,
        pid: Pid,
        ppid: Pid,
        start_time: Timestamp,
        comm: ByteString,
        parent_comm: ByteString,
    ) {
        let (grandparent_pid, grandparent_comm) = match self.index.get(&ppid) {
            Some(&slot) => {
                let parent = &self.arena[slot].record;
                (parent.parent_pid, parent.parent_comm.clone())
            }
            None => (Pid::from_raw(0), ByteString::default()),
        };
        let record = AncestryRecord {
            pid,
            parent_pid: ppid,
            grandparent_pid,
            start_time,
            comm,
            parent_comm,
            grandparent_comm,
        };

        if let Some(&slot) = self.index.get(&pid) {
            self.arena[slot].record = record;
            self.touch(slot);
            return;
        }

        if self.index.len() == self.capacity {
            self.evict_tail();
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.arena[slot] = Node {
                    record,
                    prev: NIL,
                    next: NIL,
                };
                slot
            }
            None => {
                self.arena.push(Node {
                    record,
                    prev: NIL,
                    next: NIL,
                });
                self.arena.len() - 1
            }
        };
        self.index.insert(pid, slot);
        self.push_front(slot);
    }

    /// Look up the ancestry of `pid`, refreshing its recency. Never
    /// allocates a new entry.
    pub fn lookup(&mut self, pid: Pid) -> Option<&AncestryRecord> {
        let slot = *self.index.get(&pid)?;
        self.touch(slot);
        Some(&self.arena[slot].record)
    }

    /// Read-only lookup without touching recency.
    pub fn peek(&self, pid: Pid) -> Option<&AncestryRecord> {
        self.index.get(&pid).map(|&slot| &self.arena[slot].record)
    }

    /// Drop the record for a process known to be gone.
    pub fn remove(&mut self, pid: Pid) -> Option<AncestryRecord> {
        let slot = self.index.remove(&pid)?;
        self.unlink(slot);
        self.free.push(slot);
        Some(self.arena[slot].record.clone())
    }

    fn evict_tail(&mut self) {
        debug_assert!(self.tail != NIL);
        let slot = self.tail;
        let pid = self.arena[slot].record.pid;
        self.index.remove(&pid);
        self.unlink(slot);
        self.free.push(slot);
        log::trace!("ancestry cache full, evicted pid {pid}");
    }

    fn touch(&mut self, slot: usize) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn push_front(&mut self, slot: usize) {
        self.arena[slot].prev = NIL;
        self.arena[slot].next = self.head;
        if self.head != NIL {
            self.arena[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.arena[slot].prev, self.arena[slot].next);
        if prev != NIL {
            self.arena[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.arena[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.arena[slot].prev = NIL;
        self.arena[slot].next = NIL;
    }
}

impl Default for AncestryTracker {
    fn default() -> Self {
        Self::new()
    }
}
