//! Lock event timelines (spec §4.5).

use std::collections::HashSet;

use crate::dispatch::LockType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEventKind {
    WaitShared,
    WaitExclusive,
    Obtain,
    Release,
    Mark,
}

/// A point on a lock's timeline (spec §3 row `LockEvent`).
#[derive(Debug, Clone, Copy)]
pub struct LockEvent {
    pub time: i64,
    pub thread: u64,
    pub kind: LockEventKind,
}

/// A lock's announced identity and full timeline (spec §3 row `LockMap`).
#[derive(Debug, Clone)]
pub struct LockMap {
    pub lock_id: u64,
    pub lock_type: LockType,
    pub srcloc: u32,
    pub threads: HashSet<u64>,
    pub timeline: Vec<LockEvent>,
}

impl LockMap {
    pub fn new(lock_id: u64, lock_type: LockType, srcloc: u32) -> Self {
        Self {
            lock_id,
            lock_type,
            srcloc,
            threads: HashSet::new(),
            timeline: Vec::new(),
        }
    }

    /// Insert an event keeping the timeline sorted by (time,
    /// insertion-order); a late event (time before the current tail) is
    /// placed via binary search rather than appended (spec §4.5, §3
    /// invariant: "sorted by (time, event-insertion-order)").
    pub fn insert(&mut self, time: i64, thread: u64, kind: LockEventKind) {
        self.threads.insert(thread);
        let event = LockEvent { time, thread, kind };

        let pos = match self.timeline.last() {
            Some(tail) if tail.time <= time => self.timeline.len(),
            _ => self.timeline.partition_point(|e| e.time <= time),
        };
        self.timeline.insert(pos, event);
    }
}
