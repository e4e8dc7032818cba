//! The in-memory trace model (spec §3) and the ingest path that turns
//! decoded [`crate::dispatch::Event`]s into mutations of it (spec §4.4,
//! §4.5).

pub mod frame;
pub mod gpu;
pub mod lock;
pub mod message;
pub mod plot;
pub mod slab;
pub mod thread;

use std::collections::HashMap;

use crate::dispatch::Event;
use crate::error::{TraceError, TraceResult};
use crate::interner::{PendingQuery, QueryKind, SourceLocationRegistry, StringInterner};

pub use frame::FrameMarks;
pub use gpu::{GpuCtx, GpuEvent};
pub use lock::{LockEventKind, LockMap};
pub use message::MessageData;
pub use plot::PlotSet;
pub use slab::Slab;
pub use thread::{Thread, ZoneEvent};

/// The full reconstructed trace. Shared between the ingestion thread and
/// the query thread behind a single coarse reader/writer lock (spec §5);
/// this type itself is not thread-safe — callers wrap it in
/// `parking_lot::RwLock` (see [`crate::controller::Controller`]).
#[derive(Debug, Default)]
pub struct Trace {
    pub threads: Vec<Thread>,
    thread_index: HashMap<u64, usize>,
    pub zones: Vec<ZoneEvent>,

    pub gpu_contexts: Vec<GpuCtx>,
    gpu_index: HashMap<u8, usize>,
    pub gpu_events: Vec<GpuEvent>,

    pub locks: Vec<LockMap>,
    lock_index: HashMap<u64, usize>,

    pub plots: PlotSet,
    pub messages: Vec<MessageData>,
    pub frames: FrameMarks,

    pub strings: StringInterner,
    pub source_locations: SourceLocationRegistry,
    pub slab: Slab,

    pub zones_cnt: u64,
    pub last_time: i64,

    /// Set once the handshake completes and at least one event has been
    /// ingested (spec §8: "has_data = true once handshake completes" for
    /// the empty-stream case — handshake completion is signalled by the
    /// caller via [`Trace::mark_connected`]).
    pub has_data: bool,

    /// `ThreadContext` sets this for subsequent thread-scoped records,
    /// avoiding a repeated thread field on every zone/GPU event (spec §4.4
    /// describes per-thread reconstruction; this is the wire-level
    /// mechanism by which a record's thread is known — see DESIGN.md).
    current_thread: u64,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handshake completed: the trace has data even with zero events
    /// (spec §8 boundary: "Empty stream after handshake ... has_data =
    /// true once handshake completes").
    pub fn mark_connected(&mut self) {
        self.has_data = true;
    }

    fn touch_time(&mut self, t: i64) {
        if t > self.last_time {
            self.last_time = t;
        }
    }

    /// Index of the thread record for `thread_id`, creating one on first
    /// sight. Returns an index rather than `&mut Thread` so callers can
    /// still borrow `self.zones` (or another field) at the same time —
    /// borrowing through a method call would tie both borrows to `self`.
    fn ensure_thread(&mut self, thread_id: u64) -> usize {
        if let Some(&idx) = self.thread_index.get(&thread_id) {
            return idx;
        }
        let idx = self.threads.len();
        self.threads.push(Thread::new(thread_id));
        self.thread_index.insert(thread_id, idx);
        idx
    }

    fn thread_mut(&mut self, thread_id: u64) -> &mut Thread {
        let idx = self.ensure_thread(thread_id);
        &mut self.threads[idx]
    }

    fn ensure_gpu_ctx(&mut self, context_id: u8) -> usize {
        if let Some(&idx) = self.gpu_index.get(&context_id) {
            return idx;
        }
        let idx = self.gpu_contexts.len();
        self.gpu_contexts.push(GpuCtx::new(context_id, 1.0));
        self.gpu_index.insert(context_id, idx);
        idx
    }

    fn gpu_ctx_mut(&mut self, context_id: u8) -> &mut GpuCtx {
        let idx = self.ensure_gpu_ctx(context_id);
        &mut self.gpu_contexts[idx]
    }

    fn lock_mut(&mut self, lock_id: u64) -> TraceResult<&mut LockMap> {
        self.lock_index
            .get(&lock_id)
            .copied()
            .map(move |idx| &mut self.locks[idx])
            .ok_or_else(|| TraceError::Protocol(format!("lock event for unannounced lock {lock_id}")))
    }

    /// Apply one decoded event to the model. Returns any server->client
    /// queries the event's pointer references provoked (spec §4.3); these
    /// must be forwarded to the wire by the caller (the controller).
    pub fn ingest(&mut self, event: Event) -> TraceResult<Vec<PendingQuery>> {
        let mut queries = Vec::new();

        match event {
            Event::ThreadContext { thread } => {
                self.current_thread = thread;
                self.thread_mut(thread);
            }

            Event::ZoneBegin { srcloc, time } | Event::ZoneBeginAllocSrcLoc { srcloc_ptr: srcloc, time } => {
                self.touch_time(time);
                let (srcloc_id, q) = self.source_locations.shrink(srcloc);
                queries.extend(q);
                let idx = self.ensure_thread(self.current_thread);
                self.threads[idx].begin(&mut self.zones, srcloc_id, time)?;
                self.zones_cnt += 1;
            }

            Event::ZoneEnd { time } => {
                self.touch_time(time);
                let idx = self.ensure_thread(self.current_thread);
                self.threads[idx].end(&mut self.zones, time)?;
            }

            Event::ZoneText { text } => {
                let idx = self.ensure_thread(self.current_thread);
                self.threads[idx].attach_text(&mut self.zones, &mut self.slab, &text)?;
            }

            Event::GpuNewContext { context, timer_period } => {
                let ctx = self.gpu_ctx_mut(context);
                ctx.timer_period = timer_period;
            }

            Event::GpuZoneBegin { context, srcloc, cpu_time, query_id } => {
                self.touch_time(cpu_time);
                let (srcloc_id, q) = self.source_locations.shrink(srcloc);
                queries.extend(q);
                let thread_id = self.current_thread;
                let idx = self.ensure_gpu_ctx(context);
                self.gpu_contexts[idx].begin(&mut self.gpu_events, srcloc_id, cpu_time, thread_id, query_id);
            }

            Event::GpuTime { context, gpu_time, query_id } => {
                self.touch_time(gpu_time);
                let idx = self.ensure_gpu_ctx(context);
                self.gpu_contexts[idx].fill_time(&mut self.gpu_events, query_id, gpu_time);
            }

            Event::GpuResync { context, calibration_offset } => {
                self.gpu_ctx_mut(context).resync(calibration_offset);
            }

            Event::LockAnnounce { lock_id, srcloc, time, lock_type } => {
                self.touch_time(time);
                let (srcloc_id, q) = self.source_locations.shrink(srcloc);
                queries.extend(q);
                if !self.lock_index.contains_key(&lock_id) {
                    let idx = self.locks.len();
                    self.locks.push(LockMap::new(lock_id, lock_type, srcloc_id));
                    self.lock_index.insert(lock_id, idx);
                }
            }

            Event::LockWait { lock_id, thread, time, shared } => {
                self.touch_time(time);
                let kind = if shared { LockEventKind::WaitShared } else { LockEventKind::WaitExclusive };
                self.lock_mut(lock_id)?.insert(time, thread, kind);
            }

            Event::LockObtain { lock_id, thread, time, shared: _ } => {
                self.touch_time(time);
                self.lock_mut(lock_id)?.insert(time, thread, LockEventKind::Obtain);
            }

            Event::LockRelease { lock_id, thread, time, shared: _ } => {
                self.touch_time(time);
                self.lock_mut(lock_id)?.insert(time, thread, LockEventKind::Release);
            }

            Event::LockMark { lock_id, thread, time } => {
                self.touch_time(time);
                self.lock_mut(lock_id)?.insert(time, thread, LockEventKind::Mark);
            }

            Event::PlotData { name_ptr, time, value } => {
                self.touch_time(time);
                if let Some(q) = self.strings.ensure_queried(name_ptr, QueryKind::String) {
                    queries.push(q);
                }
                self.plots.push_sample(name_ptr, time, value);
            }

            Event::Message { thread, time, text_ptr, literal } => {
                self.touch_time(time);
                let text = if literal.is_empty() {
                    if let Some(q) = self.strings.ensure_queried(text_ptr, QueryKind::String) {
                        queries.push(q);
                    }
                    self.slab.store_str(self.strings.get(text_ptr))
                } else {
                    self.slab.store(&literal)
                };
                self.thread_mut(thread);
                self.messages.push(MessageData { time, thread, text });
            }

            Event::FrameMark { time } => {
                self.touch_time(time);
                self.frames.push(time);
            }

            Event::StringData { ptr, bytes } => {
                let is_plot_name_pending = !self.strings.is_resolved(ptr);
                self.strings.resolve(ptr, bytes.clone());
                if is_plot_name_pending {
                    self.plots.resolve_name(ptr, self.strings.get(ptr).into());
                }
            }

            Event::ThreadName { thread, bytes } => {
                let name = String::from_utf8_lossy(&bytes).into_owned().into_boxed_str();
                self.thread_mut(thread).name = Some(name);
            }

            Event::SourceLocation { ptr, line, color, function, file } => {
                self.source_locations.resolve(ptr, function, file, line, color);
            }
        }

        Ok(queries)
    }

    pub fn thread_by_id(&self, thread_id: u64) -> Option<&Thread> {
        self.thread_index.get(&thread_id).map(|&idx| &self.threads[idx])
    }

    pub fn lock_by_id(&self, lock_id: u64) -> Option<&LockMap> {
        self.lock_index.get(&lock_id).map(|&idx| &self.locks[idx])
    }

    /// Rebuild the id lookup tables from `threads`/`gpu_contexts`/`locks`.
    /// Used after a bulk load (trace-file read) populates those vectors
    /// directly, bypassing the incremental `thread_mut`/`gpu_ctx_mut`/
    /// `lock_mut` helpers that normally keep the tables in sync.
    pub(crate) fn rebuild_indices(&mut self) {
        self.thread_index = self.threads.iter().enumerate().map(|(i, t)| (t.thread_id, i)).collect();
        self.gpu_index = self.gpu_contexts.iter().enumerate().map(|(i, c)| (c.context_id, i)).collect();
        self.lock_index = self.locks.iter().enumerate().map(|(i, l)| (l.lock_id, i)).collect();
    }
}

#[allow(unused_imports)]
pub use crate::dispatch::EventType;
