//! Wire codec: framed read of a TCP byte stream with optional per-frame LZ4
//! decompression into a fixed-size work buffer (spec §4.1).
//!
//! Grounded on the teacher's header-parsing split between "fast" (no
//! checksum) and "full" validation paths in
//! examples/dawsh2-AlphaPulse/backend/protocol_v2/src/relay/core.rs —
//! here the analogous split is "LZ4 framed" vs "raw passthrough", chosen
//! once at handshake time and fixed for the connection's lifetime.

pub mod lz4;

use crate::error::{TraceError, TraceResult};
use std::io::{ErrorKind, Read};
use std::time::Duration;

/// The five handshake fields sent once by the client after connecting
/// (spec §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub timer_delay: i64,
    pub timer_resolution: i64,
    pub timer_mul: f64,
    pub capture_name: String,
    pub lz4_enabled: bool,
}

impl Handshake {
    /// Read the handshake from a blocking reader. Not subject to the bounded
    /// poll timeout: the handshake is a one-shot synchronous exchange before
    /// the framed data phase begins.
    pub fn read(r: &mut impl Read) -> TraceResult<Self> {
        let timer_delay = read_i64(r)?;
        let timer_resolution = read_i64(r)?;
        let timer_mul = read_f64(r)?;
        let name_len = read_u16(r)?;
        let mut name_buf = vec![0u8; name_len as usize];
        r.read_exact(&mut name_buf)?;
        let capture_name = String::from_utf8_lossy(&name_buf).into_owned();
        let mut flag = [0u8; 1];
        r.read_exact(&mut flag)?;
        Ok(Self {
            timer_delay,
            timer_resolution,
            timer_mul,
            capture_name,
            lz4_enabled: flag[0] != 0,
        })
    }
}

fn read_u16(r: &mut impl Read) -> TraceResult<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> TraceResult<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> TraceResult<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// Outcome of one bounded poll of the underlying socket (spec §4.1: "a
/// three-way result: ok | timeout-retry | closed").
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Bytes were appended to the decoder's buffer; more may be available
    /// for dispatch via [`StreamDecoder::available`].
    Progressed,
    /// The poll timed out with no data; callers should re-check the
    /// shutdown flag and retry.
    Timeout,
    /// The peer closed the connection (read returned 0 bytes).
    Closed,
}

/// Decodes a framed, optionally LZ4-compressed byte stream into a
/// contiguous buffer the event dispatcher can cursor through.
///
/// When LZ4 is disabled the decoder is a thin passthrough: bytes read from
/// the socket are handed to the dispatcher unmodified, matching the
/// uncompressed path in spec §4.1/§4.2.
pub struct StreamDecoder {
    lz4_enabled: bool,
    /// Bytes read from the socket not yet consumed as full frames (LZ4
    /// path) or not yet dispatched (raw path).
    raw: Vec<u8>,
    /// Decompressed bytes ready for the dispatcher (LZ4 path only).
    decoded: Vec<u8>,
    /// Fixed-size work buffer frames decompress into (spec: "sized >=
    /// max-target-frame").
    work_buf: Vec<u8>,
    /// Previous frame's decompressed bytes, used as the LZ4 dictionary for
    /// the next frame (stream dictionary continuity, spec §4.1).
    dict: Vec<u8>,
    chunk: Vec<u8>,
    /// Total bytes read off the socket (compressed, if LZ4 is on).
    total_in: u64,
    /// Total bytes handed to the dispatcher (always uncompressed).
    total_out: u64,
}

impl StreamDecoder {
    pub fn new(lz4_enabled: bool, work_buffer_size: usize) -> Self {
        Self {
            lz4_enabled,
            raw: Vec::new(),
            decoded: Vec::new(),
            work_buf: vec![0u8; work_buffer_size],
            dict: Vec::new(),
            chunk: vec![0u8; 64 * 1024],
            total_in: 0,
            total_out: 0,
        }
    }

    /// Perform one bounded read. `reader` must already have its read timeout
    /// set to the configured poll timeout (spec: "bounded poll timeout so
    /// that shutdown requests are observed promptly").
    pub fn poll(&mut self, reader: &mut impl Read) -> TraceResult<PollOutcome> {
        match reader.read(&mut self.chunk) {
            Ok(0) => Ok(PollOutcome::Closed),
            Ok(n) => {
                self.total_in += n as u64;
                self.raw.extend_from_slice(&self.chunk[..n]);
                if self.lz4_enabled {
                    let before = self.decoded.len();
                    self.drain_lz4_frames()?;
                    self.total_out += (self.decoded.len() - before) as u64;
                } else {
                    self.total_out += n as u64;
                    self.decoded.append(&mut self.raw);
                }
                Ok(PollOutcome::Progressed)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(PollOutcome::Timeout)
            }
            Err(e) => Err(TraceError::Io(e)),
        }
    }

    fn drain_lz4_frames(&mut self) -> TraceResult<()> {
        loop {
            if self.raw.len() < 2 {
                return Ok(());
            }
            let lz4_size = u16::from_le_bytes([self.raw[0], self.raw[1]]) as usize;
            if self.raw.len() < 2 + lz4_size {
                return Ok(());
            }
            let compressed = &self.raw[2..2 + lz4_size];
            let n = lz4_flex::block::decompress_into_with_dict(
                compressed,
                &mut self.work_buf,
                &self.dict,
            )
            .map_err(|e| TraceError::Lz4Decode(e.to_string()))?;
            self.decoded.extend_from_slice(&self.work_buf[..n]);
            self.dict = self.work_buf[..n].to_vec();
            self.raw.drain(..2 + lz4_size);
        }
    }

    /// Bytes available for the dispatcher to read (not yet consumed).
    pub fn available(&self) -> &[u8] {
        &self.decoded
    }

    /// Mark `n` bytes as dispatched, freeing them from the buffer.
    pub fn consume(&mut self, n: usize) {
        self.decoded.drain(..n);
    }

    /// Cumulative (bytes read off the socket, bytes handed to the
    /// dispatcher), for bandwidth and compression-ratio telemetry (spec
    /// §4.6).
    pub fn stats(&self) -> (u64, u64) {
        (self.total_in, self.total_out)
    }
}

/// Block until the socket either produces data or the poll timeout
/// (`timeout`) elapses, or `should_exit` becomes true (spec §5
/// "Cancellation": "every blocking read accepts a should_exit predicate").
pub fn poll_with_cancellation(
    decoder: &mut StreamDecoder,
    reader: &mut impl Read,
    should_exit: &dyn Fn() -> bool,
    _timeout: Duration,
) -> TraceResult<PollOutcome> {
    if should_exit() {
        return Ok(PollOutcome::Closed);
    }
    decoder.poll(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn handshake_round_trip_bytes() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100i64.to_le_bytes());
        buf.extend_from_slice(&1i64.to_le_bytes());
        buf.extend_from_slice(&3.5f64.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(b"abc");
        buf.push(1u8);

        let mut cur = Cursor::new(buf);
        let hs = Handshake::read(&mut cur).unwrap();
        assert_eq!(hs.timer_delay, 100);
        assert_eq!(hs.timer_resolution, 1);
        assert_eq!(hs.timer_mul, 3.5);
        assert_eq!(hs.capture_name, "abc");
        assert!(hs.lz4_enabled);
    }

    #[test]
    fn raw_passthrough_when_lz4_disabled() {
        let mut decoder = StreamDecoder::new(false, 4096);
        let mut cur = Cursor::new(vec![1, 2, 3, 4]);
        let outcome = decoder.poll(&mut cur).unwrap();
        assert_eq!(outcome, PollOutcome::Progressed);
        assert_eq!(decoder.available(), &[1, 2, 3, 4]);
        decoder.consume(2);
        assert_eq!(decoder.available(), &[3, 4]);
    }

    #[test]
    fn lz4_frame_decodes_with_dictionary_continuity() {
        let payload_a = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let payload_b = b"the quick brown fox jumps over the lazy cat".repeat(4);

        let compressed_a = lz4_flex::block::compress(&payload_a);
        let compressed_b = lz4_flex::block::compress_with_dict(&payload_b, &payload_a);

        let mut wire = Vec::new();
        wire.extend_from_slice(&(compressed_a.len() as u16).to_le_bytes());
        wire.extend_from_slice(&compressed_a);
        wire.extend_from_slice(&(compressed_b.len() as u16).to_le_bytes());
        wire.extend_from_slice(&compressed_b);

        let mut decoder = StreamDecoder::new(true, 4096);
        let mut cur = Cursor::new(wire);
        assert_eq!(decoder.poll(&mut cur).unwrap(), PollOutcome::Progressed);

        let got = decoder.available().to_vec();
        decoder.consume(got.len());
        assert_eq!(got, {
            let mut expected = payload_a.clone();
            expected.extend_from_slice(&payload_b);
            expected
        });
    }

    #[test]
    fn closed_on_eof() {
        let mut decoder = StreamDecoder::new(false, 4096);
        let mut cur = Cursor::new(Vec::<u8>::new());
        assert_eq!(decoder.poll(&mut cur).unwrap(), PollOutcome::Closed);
    }
}
