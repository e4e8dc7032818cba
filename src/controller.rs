//! Connection lifecycle controller (spec §4.6, §5).
//!
//! Grounded on the teacher's shutdown/signal pattern in
//! examples/dawsh2-AlphaPulse/backend/services/relay_server/src/main.rs:
//! independent atomics for cross-thread flags, a dedicated blocking thread
//! for socket I/O, `parking_lot::RwLock` for the shared model, and
//! `crossbeam_channel` to hand outgoing query frames from event handlers to
//! the socket writer so small writes get coalesced (spec §4.6 "the socket
//! abstraction coalesces small writes").

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::parse_events;
use crate::error::TraceResult;
use crate::interner::PendingQuery;
use crate::model::Trace;
use crate::wire::{Handshake, PollOutcome, StreamDecoder};

/// Connection lifecycle states (spec §4.6).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected = 0,
    Connecting = 1,
    Handshaking = 2,
    Running = 3,
    Closing = 4,
    Terminated = 5,
}

impl ControllerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ControllerState::Disconnected,
            1 => ControllerState::Connecting,
            2 => ControllerState::Handshaking,
            3 => ControllerState::Running,
            4 => ControllerState::Closing,
            _ => ControllerState::Terminated,
        }
    }
}

/// Fixed-length ring of Mbps samples for UI consumption (spec §4.6: "a
/// ring of 64 samples"), behind its own lock (spec §5: "a separate
/// `m_mbpsData.lock` protects only the Mbps ring").
#[derive(Debug)]
struct BandwidthRing {
    samples: Vec<f64>,
    cap: usize,
    compression_ratio: f64,
}

impl BandwidthRing {
    fn new(cap: usize) -> Self {
        Self { samples: Vec::with_capacity(cap), cap, compression_ratio: 1.0 }
    }

    fn push(&mut self, mbps: f64) {
        if self.samples.len() == self.cap {
            self.samples.remove(0);
        }
        self.samples.push(mbps);
    }
}

/// Owns the shared trace and the atomics that coordinate the ingestion
/// thread with a query thread (spec §5).
pub struct Controller {
    trace: Arc<RwLock<Trace>>,
    state: AtomicU8,
    shutdown: AtomicBool,
    connected: AtomicBool,
    has_data: AtomicBool,
    handshake: Mutex<Option<Handshake>>,
    bandwidth: Mutex<BandwidthRing>,
    query_tx: Sender<PendingQuery>,
    query_rx: Receiver<PendingQuery>,
}

impl Controller {
    pub fn new(cfg: &Config) -> Arc<Self> {
        let (query_tx, query_rx) = unbounded();
        Arc::new(Self {
            trace: Arc::new(RwLock::new(Trace::new())),
            state: AtomicU8::new(ControllerState::Disconnected as u8),
            shutdown: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            has_data: AtomicBool::new(false),
            handshake: Mutex::new(None),
            bandwidth: Mutex::new(BandwidthRing::new(cfg.bandwidth_ring_len)),
            query_tx,
            query_rx,
        })
    }

    pub fn trace(&self) -> &RwLock<Trace> {
        &self.trace
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: ControllerState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// `m_hasData`: published with release/acquire so a reader observing
    /// `true` also observes the event that set it (spec §5).
    pub fn has_data(&self) -> bool {
        self.has_data.load(Ordering::Acquire)
    }

    pub fn handshake(&self) -> Option<Handshake> {
        self.handshake.lock().clone()
    }

    pub fn mbps_ring(&self) -> Vec<f64> {
        self.bandwidth.lock().samples.clone()
    }

    pub fn compression_ratio(&self) -> f64 {
        self.bandwidth.lock().compression_ratio
    }

    /// Request shutdown: the next bounded socket poll in the ingestion
    /// loop observes this and exits (spec §5 "Cancellation").
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn should_exit(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Run the ingestion loop to completion on the calling thread. `stream`
    /// is an already-connected socket (spec §4.6: "Connecting -> Handshaking
    /// on successful TCP connect"). Returns once the peer closes the
    /// connection, a fatal protocol error occurs, or `shutdown()` is
    /// called.
    pub fn run(self: &Arc<Self>, mut stream: TcpStream, cfg: &Config) -> TraceResult<()> {
        self.set_state(ControllerState::Handshaking);
        let handshake = Handshake::read(&mut stream)?;
        info!(capture = %handshake.capture_name, lz4 = handshake.lz4_enabled, "handshake complete");
        *self.handshake.lock() = Some(handshake.clone());

        self.set_state(ControllerState::Running);
        self.connected.store(true, Ordering::Release);
        self.trace.write().mark_connected();
        self.has_data.store(true, Ordering::Release);

        let result = self.ingest_loop(&mut stream, &handshake, cfg);

        self.connected.store(false, Ordering::Release);
        self.set_state(if result.is_ok() { ControllerState::Closing } else { ControllerState::Terminated });
        if result.is_err() {
            warn!("ingestion terminated on fatal error; model remains queryable");
        }
        self.set_state(ControllerState::Terminated);
        result
    }

    fn ingest_loop(&self, stream: &mut TcpStream, handshake: &Handshake, cfg: &Config) -> TraceResult<()> {
        stream.set_read_timeout(Some(Duration::from_millis(cfg.socket_poll_timeout_ms)))?;
        let mut decoder = StreamDecoder::new(handshake.lz4_enabled, cfg.lz4_work_buffer_size);

        let sample_period = Duration::from_millis(cfg.bandwidth_sample_period_ms);
        let mut last_sample = Instant::now();
        let (mut last_in, mut last_out) = decoder.stats();

        loop {
            if self.should_exit() {
                debug!("shutdown observed, exiting ingestion loop");
                break;
            }

            match decoder.poll(stream)? {
                PollOutcome::Closed => break,
                PollOutcome::Timeout => {}
                PollOutcome::Progressed => {
                    let (events, consumed) = parse_events(decoder.available())?;
                    decoder.consume(consumed);

                    let mut trace = self.trace.write();
                    for event in events {
                        for query in trace.ingest(event)? {
                            let _ = self.query_tx.send(query);
                        }
                    }
                    drop(trace);

                    self.flush_queries(stream)?;
                }
            }

            if last_sample.elapsed() >= sample_period {
                let (total_in, total_out) = decoder.stats();
                let delta_in = (total_in - last_in) as f64;
                let delta_out = (total_out - last_out) as f64;
                let secs = last_sample.elapsed().as_secs_f64().max(1e-6);
                let mbps = (delta_in * 8.0) / secs / 1_000_000.0;

                let mut bw = self.bandwidth.lock();
                bw.push(mbps);
                if delta_in > 0.0 {
                    bw.compression_ratio = delta_out / delta_in;
                }

                last_in = total_in;
                last_out = total_out;
                last_sample = Instant::now();
            }
        }
        Ok(())
    }

    /// Drain any queries event handlers produced and write them as a batch
    /// (spec §4.6: queries are "written through the socket as they are
    /// produced"; batching here coalesces everything queued since the last
    /// poll into one write).
    fn flush_queries(&self, stream: &mut TcpStream) -> TraceResult<()> {
        let mut batch = Vec::new();
        while let Ok(query) = self.query_rx.try_recv() {
            batch.push(query.kind as u8);
            batch.extend_from_slice(&query.ptr.to_le_bytes());
        }
        if !batch.is_empty() {
            stream.write_all(&batch)?;
        }
        Ok(())
    }
}
