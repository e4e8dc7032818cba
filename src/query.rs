//! Read-only query API exposed to a separately implemented visualization
//! layer (spec §6.3). Callers hold the read lock on [`crate::model::Trace`]
//! for the duration of a UI frame's reads; this module only adds the
//! handful of derived accessors the raw model doesn't already provide as
//! plain fields.

use crate::interner::SourceLocation;
use crate::model::slab::SlabRef;
use crate::model::{thread::ZoneEvent, Trace};

/// A read view over a locked [`Trace`], matching the bullet list in spec
/// §6.3 one method per bullet.
pub struct Query<'a> {
    trace: &'a Trace,
}

impl<'a> Query<'a> {
    pub fn new(trace: &'a Trace) -> Self {
        Self { trace }
    }

    pub fn frames(&self) -> impl Iterator<Item = i64> + 'a {
        self.trace.frames.iter()
    }

    pub fn messages(&self) -> impl Iterator<Item = &'a crate::model::MessageData> {
        self.trace.messages.iter()
    }

    pub fn plots(&self) -> impl Iterator<Item = &'a crate::model::plot::Plot> {
        self.trace.plots.iter()
    }

    pub fn gpu_contexts(&self) -> impl Iterator<Item = &'a crate::model::GpuCtx> {
        self.trace.gpu_contexts.iter()
    }

    pub fn threads(&self) -> impl Iterator<Item = &'a crate::model::Thread> {
        self.trace.threads.iter()
    }

    /// `get_string(ptr)`: sentinel `"???"` if not yet resolved (spec §8
    /// property 4).
    pub fn get_string(&self, ptr: u64) -> &'a str {
        self.trace.strings.get(ptr)
    }

    pub fn get_source_location(&self, id: u32) -> Option<&'a SourceLocation> {
        self.trace.source_locations.get(id)
    }

    /// Resolve slab-backed zone/message text (spec §3: both are slab-owned).
    pub fn get_text(&self, r: SlabRef) -> std::borrow::Cow<'a, str> {
        self.trace.slab.get_str(r)
    }

    /// `get_zone_end(&zone)`: the zone's own end if closed, else the
    /// trace's `last_time` (spec §8 "Abrupt disconnect mid-zone").
    pub fn get_zone_end(&self, zone: &ZoneEvent) -> i64 {
        crate::model::thread::Thread::zone_end_or(zone, self.trace.last_time)
    }

    pub fn get_frame_range(&self, t0: i64, t1: i64) -> (i32, i32) {
        self.trace.frames.range(t0, t1)
    }

    pub fn zones_cnt(&self) -> u64 {
        self.trace.zones_cnt
    }

    pub fn last_time(&self) -> i64 {
        self.trace.last_time
    }

    pub fn has_data(&self) -> bool {
        self.trace.has_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Event;

    #[test]
    fn query_reflects_ingested_state() {
        let mut trace = Trace::new();
        trace.ingest(Event::ThreadContext { thread: 1 }).unwrap();
        trace.ingest(Event::ZoneBegin { srcloc: 9, time: 10 }).unwrap();
        trace.ingest(Event::ZoneEnd { time: 20 }).unwrap();
        trace.ingest(Event::FrameMark { time: 20 }).unwrap();

        let q = Query::new(&trace);
        assert_eq!(q.zones_cnt(), 1);
        assert_eq!(q.last_time(), 20);
        assert_eq!(q.frames().collect::<Vec<_>>(), vec![20]);
        assert_eq!(q.get_string(0xDEAD), "???");

        let thread = q.threads().next().unwrap();
        let zone = &trace.zones[thread.root_timeline[0] as usize];
        assert_eq!(q.get_zone_end(zone), 20);
    }

    #[test]
    fn open_zone_end_falls_back_to_last_time() {
        let mut trace = Trace::new();
        trace.ingest(Event::ThreadContext { thread: 1 }).unwrap();
        trace.ingest(Event::ZoneBegin { srcloc: 1, time: 10 }).unwrap();
        trace.ingest(Event::FrameMark { time: 500 }).unwrap();

        let q = Query::new(&trace);
        let thread = q.threads().next().unwrap();
        let zone = &trace.zones[thread.root_timeline[0] as usize];
        assert_eq!(q.get_zone_end(zone), 500);
    }
}
