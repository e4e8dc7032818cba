//! GPU context timeline reconstruction (spec §4.4: "GPU zones ... keyed by
//! GPU context and use a ring buffer of pending queries").

use std::collections::HashMap;

use crate::model::thread::OPEN_SENTINEL;

/// A single GPU zone: CPU-side submission time plus independently-filled
/// GPU begin/end timestamps (spec §3 row `GpuEvent`).
#[derive(Debug, Clone)]
pub struct GpuEvent {
    pub cpu_time_begin: i64,
    pub gpu_time_begin: i64,
    pub gpu_time_end: i64,
    pub srcloc: u32,
    pub thread: u64,
}

impl GpuEvent {
    fn new(cpu_time_begin: i64, srcloc: u32, thread: u64) -> Self {
        Self {
            cpu_time_begin,
            gpu_time_begin: OPEN_SENTINEL,
            gpu_time_end: OPEN_SENTINEL,
            srcloc,
            thread,
        }
    }
}

/// A logical GPU submission queue with its own clock, requiring periodic
/// calibration against the CPU clock (spec §3 row `GpuCtx`).
#[derive(Debug, Clone)]
pub struct GpuCtx {
    pub context_id: u8,
    pub timer_period: f32,
    pub calibration_offset: i64,
    pub timeline: Vec<u32>,
    /// query_id -> index into the trace's `gpu_events`, for zones whose
    /// `GpuTime` replies haven't both arrived yet.
    pending: HashMap<u16, u32>,
}

impl GpuCtx {
    pub fn new(context_id: u8, timer_period: f32) -> Self {
        Self {
            context_id,
            timer_period,
            calibration_offset: 0,
            timeline: Vec::new(),
            pending: HashMap::new(),
        }
    }

    /// `GpuZoneBegin`: allocate an event and remember its query id so the
    /// matching `GpuTime` replies can find it.
    pub fn begin(&mut self, events: &mut Vec<GpuEvent>, srcloc: u32, cpu_time: i64, thread: u64, query_id: u16) -> u32 {
        let idx = events.len() as u32;
        events.push(GpuEvent::new(cpu_time, srcloc, thread));
        self.timeline.push(idx);
        self.pending.insert(query_id, idx);
        idx
    }

    /// `GpuTime`: fill `gpu_time_begin` on the first reply for a query id,
    /// `gpu_time_end` on the second, then the query id is retired.
    pub fn fill_time(&mut self, events: &mut [GpuEvent], query_id: u16, gpu_time: i64) {
        let Some(&idx) = self.pending.get(&query_id) else { return };
        let event = &mut events[idx as usize];
        if event.gpu_time_begin == OPEN_SENTINEL {
            event.gpu_time_begin = gpu_time;
        } else {
            event.gpu_time_end = gpu_time;
            self.pending.remove(&query_id);
        }
    }

    /// `GpuResync`: recalibrate the offset between the CPU and GPU clocks.
    pub fn resync(&mut self, calibration_offset: i64) {
        self.calibration_offset = calibration_offset;
    }

    /// Append an already-built event (used when reloading a trace file,
    /// where begin/end times are already known and there is no pending
    /// query to track).
    pub fn push_event(&mut self, events: &mut Vec<GpuEvent>, event: GpuEvent) -> u32 {
        let idx = events.len() as u32;
        events.push(event);
        self.timeline.push(idx);
        idx
    }
}
