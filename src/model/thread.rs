//! Per-thread zone reconstruction (spec §4.4).
//!
//! Grounded on the teacher's sequence-gap state machine in
//! examples/dawsh2-AlphaPulse/backend/protocol_v2/src/relay/core.rs
//! (`RelayState::update_consumer_sequence`): a small mutable struct that
//! checks an invariant on each incoming event and returns an error (here, a
//! fatal [`crate::error::TraceError::Protocol`]) the moment it's violated,
//! rather than discovering corruption later.

use crate::error::{TraceError, TraceResult};
use crate::model::slab::{Slab, SlabRef};

/// Sentinel end time for a zone that hasn't closed yet (spec §3: "end =
/// sentinel while open").
pub const OPEN_SENTINEL: i64 = i64::MAX;

/// A single zone interval on a thread (spec §3 row `ZoneEvent`).
#[derive(Debug, Clone)]
pub struct ZoneEvent {
    pub start: i64,
    pub end: i64,
    pub srcloc: u32,
    /// Slab-allocated text, if `ZoneText` attached any (spec §3: "optional
    /// text", slab-owned).
    pub text: Option<SlabRef>,
    pub children: Vec<u32>,
}

impl ZoneEvent {
    fn open(start: i64, srcloc: u32) -> Self {
        Self { start, end: OPEN_SENTINEL, srcloc, text: None, children: Vec::new() }
    }

    pub fn is_open(&self) -> bool {
        self.end == OPEN_SENTINEL
    }
}

/// A client thread and its reconstructed zone tree.
#[derive(Debug, Clone)]
pub struct Thread {
    pub thread_id: u64,
    pub name: Option<Box<str>>,
    /// Top-level zone indices, in start-time order (spec §3 invariant:
    /// "monotonically non-decreasing in zone start time").
    pub root_timeline: Vec<u32>,
    /// Indices of zones currently open, innermost last (spec §4.4:
    /// "explicit open-zones stack per thread").
    stack: Vec<u32>,
}

impl Thread {
    pub fn new(thread_id: u64) -> Self {
        Self { thread_id, name: None, root_timeline: Vec::new(), stack: Vec::new() }
    }

    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn open_depth(&self) -> usize {
        self.stack.len()
    }

    /// `ZoneBegin`: allocate a zone, push it onto the open-zones stack, and
    /// link it as a child of whatever's currently open (or a new root).
    /// Returns the new zone's index.
    pub fn begin(&mut self, zones: &mut Vec<ZoneEvent>, srcloc: u32, time: i64) -> TraceResult<u32> {
        if let Some(&top) = self.stack.last() {
            if time < zones[top as usize].start {
                return Err(TraceError::Protocol(format!(
                    "zone begin at {time} precedes parent start {}",
                    zones[top as usize].start
                )));
            }
        } else if let Some(&last_root) = self.root_timeline.last() {
            if time < zones[last_root as usize].start {
                return Err(TraceError::Protocol(format!(
                    "top-level zone begin at {time} precedes previous root start (out-of-order top-level start is a protocol violation when no open zone can adopt it)"
                )));
            }
        }

        let idx = zones.len() as u32;
        zones.push(ZoneEvent::open(time, srcloc));

        if let Some(&top) = self.stack.last() {
            zones[top as usize].children.push(idx);
        } else {
            self.root_timeline.push(idx);
        }
        self.stack.push(idx);
        Ok(idx)
    }

    /// `ZoneEnd`: pop the open-zones stack and close the popped zone.
    /// Fatal if the stack is empty or `time` precedes the zone's start
    /// (spec §4.4).
    pub fn end(&mut self, zones: &mut [ZoneEvent], time: i64) -> TraceResult<u32> {
        let idx = self
            .stack
            .pop()
            .ok_or_else(|| TraceError::Protocol("ZoneEnd with no open zone on thread".into()))?;

        let zone = &mut zones[idx as usize];
        if time < zone.start {
            return Err(TraceError::Protocol(format!(
                "ZoneEnd at {time} precedes ZoneBegin at {}",
                zone.start
            )));
        }
        zone.end = time;
        Ok(idx)
    }

    /// `ZoneText`: attach text to the currently-open (innermost) zone,
    /// copying the payload into the trace's slab (spec §3: zone text is
    /// slab-owned).
    pub fn attach_text(&self, zones: &mut [ZoneEvent], slab: &mut Slab, text: &[u8]) -> TraceResult<()> {
        let idx = *self
            .stack
            .last()
            .ok_or_else(|| TraceError::Protocol("ZoneText with no open zone on thread".into()))?;
        zones[idx as usize].text = Some(slab.store(text));
        Ok(())
    }

    /// End time of `zone`, per spec §6.3: start-of-next-sibling if closed,
    /// else the trace's `last_time` if still open at query time (spec §8
    /// boundary case: "abrupt disconnect mid-zone").
    pub fn zone_end_or(zone: &ZoneEvent, last_time: i64) -> i64 {
        if zone.is_open() {
            last_time
        } else {
            zone.end
        }
    }
}
