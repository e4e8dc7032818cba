//! Versioned binary trace-file codec (spec §4.7, §6.2).
//!
//! Grounded on the wire codec's own primitive readers
//! (examples/dawsh2-AlphaPulse/backend/protocol_v2/src/tlv/parser.rs style:
//! small `read_*`/`write_*` helpers over a cursor) applied to a fixed
//! section order instead of a tagged stream, since a trace file has no
//! dispatch ambiguity to resolve — the section order *is* the schema.

use std::io::{Read, Write};

use crate::error::{TraceError, TraceResult};
use crate::model::gpu::{GpuCtx, GpuEvent};
use crate::model::lock::{LockEvent, LockEventKind, LockMap};
use crate::model::slab::Slab;
use crate::model::thread::{Thread, ZoneEvent};
use crate::model::{MessageData, Trace};
use crate::wire::Handshake;
use crate::dispatch::LockType;

/// 5-byte file signature. Not the wire protocol's handshake bytes — this
/// identifies the on-disk format documented here.
pub const MAGIC: [u8; 5] = *b"TRACY";

pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const VERSION_PATCH: u8 = 0;

pub fn write_trace<W: Write>(w: &mut W, handshake: &Handshake, trace: &Trace) -> TraceResult<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&[VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH])?;

    write_meta(w, handshake)?;
    write_strings(w, trace)?;
    write_thread_names(w, trace)?;
    write_source_locations(w, trace)?;
    write_frames(w, trace)?;
    write_locks(w, trace)?;
    write_plots(w, trace)?;
    write_messages(w, trace)?;
    write_gpu_contexts(w, trace)?;
    write_threads(w, trace)?;
    Ok(())
}

pub fn read_trace<R: Read>(r: &mut R) -> TraceResult<(Handshake, Trace)> {
    let mut magic = [0u8; 5];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(TraceError::NotTracyDump);
    }
    let mut version = [0u8; 3];
    r.read_exact(&mut version)?;
    if version[0] != VERSION_MAJOR {
        return Err(TraceError::UnsupportedVersion { version: version[0] });
    }

    let handshake = read_meta(r)?;
    let mut trace = Trace::new();
    read_strings(r, &mut trace)?;
    let thread_names = read_thread_names(r)?;
    read_source_locations(r, &mut trace)?;
    read_frames(r, &mut trace)?;
    read_locks(r, &mut trace)?;
    read_plots(r, &mut trace)?;
    read_messages(r, &mut trace)?;
    read_gpu_contexts(r, &mut trace)?;
    read_threads(r, &mut trace, &thread_names)?;
    trace.rebuild_indices();
    Ok((handshake, trace))
}

// --- primitives -------------------------------------------------------

fn write_u8<W: Write>(w: &mut W, v: u8) -> TraceResult<()> {
    w.write_all(&[v]).map_err(Into::into)
}
fn write_u32<W: Write>(w: &mut W, v: u32) -> TraceResult<()> {
    w.write_all(&v.to_le_bytes()).map_err(Into::into)
}
fn write_u64<W: Write>(w: &mut W, v: u64) -> TraceResult<()> {
    w.write_all(&v.to_le_bytes()).map_err(Into::into)
}
fn write_i64<W: Write>(w: &mut W, v: i64) -> TraceResult<()> {
    w.write_all(&v.to_le_bytes()).map_err(Into::into)
}
fn write_f32<W: Write>(w: &mut W, v: f32) -> TraceResult<()> {
    w.write_all(&v.to_le_bytes()).map_err(Into::into)
}
fn write_f64<W: Write>(w: &mut W, v: f64) -> TraceResult<()> {
    w.write_all(&v.to_le_bytes()).map_err(Into::into)
}
fn write_bytes<W: Write>(w: &mut W, b: &[u8]) -> TraceResult<()> {
    write_u32(w, b.len() as u32)?;
    w.write_all(b).map_err(Into::into)
}
fn write_str<W: Write>(w: &mut W, s: &str) -> TraceResult<()> {
    write_bytes(w, s.as_bytes())
}

fn read_u8<R: Read>(r: &mut R) -> TraceResult<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}
fn read_u32<R: Read>(r: &mut R) -> TraceResult<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}
fn read_u64<R: Read>(r: &mut R) -> TraceResult<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}
fn read_i64<R: Read>(r: &mut R) -> TraceResult<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(i64::from_le_bytes(b))
}
fn read_f32<R: Read>(r: &mut R) -> TraceResult<f32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(f32::from_le_bytes(b))
}
fn read_f64<R: Read>(r: &mut R) -> TraceResult<f64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(f64::from_le_bytes(b))
}
fn read_bytes<R: Read>(r: &mut R) -> TraceResult<Vec<u8>> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
fn read_string<R: Read>(r: &mut R) -> TraceResult<Box<str>> {
    let bytes = read_bytes(r)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned().into_boxed_str())
}

// --- sections -----------------------------------------------------------

fn write_meta<W: Write>(w: &mut W, hs: &Handshake) -> TraceResult<()> {
    write_i64(w, hs.timer_delay)?;
    write_i64(w, hs.timer_resolution)?;
    write_f64(w, hs.timer_mul)?;
    write_str(w, &hs.capture_name)
}

fn read_meta<R: Read>(r: &mut R) -> TraceResult<Handshake> {
    Ok(Handshake {
        timer_delay: read_i64(r)?,
        timer_resolution: read_i64(r)?,
        timer_mul: read_f64(r)?,
        capture_name: String::from(read_string(r)?),
        lz4_enabled: false,
    })
}

fn write_strings<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    // `StringInterner` is HashMap-backed, so each process iterates it in a
    // different order; sort by key so a second write of the same trace is
    // byte-for-byte identical (spec §8 property 5).
    let mut entries: Vec<_> = trace.strings.iter().collect();
    entries.sort_by_key(|&(ptr, _)| ptr);

    write_u32(w, entries.len() as u32)?;
    for (ptr, s) in entries {
        write_u64(w, ptr)?;
        write_str(w, s)?;
    }
    Ok(())
}

fn read_strings<R: Read>(r: &mut R, trace: &mut Trace) -> TraceResult<()> {
    let n = read_u32(r)?;
    for _ in 0..n {
        let ptr = read_u64(r)?;
        let s = read_bytes(r)?;
        trace.strings.resolve(ptr, s);
    }
    Ok(())
}

fn write_thread_names<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    let named: Vec<_> = trace.threads.iter().filter(|t| t.name.is_some()).collect();
    write_u32(w, named.len() as u32)?;
    for t in named {
        write_u64(w, t.thread_id)?;
        write_str(w, t.name.as_deref().unwrap())?;
    }
    Ok(())
}

fn read_thread_names<R: Read>(r: &mut R) -> TraceResult<std::collections::HashMap<u64, Box<str>>> {
    let n = read_u32(r)?;
    let mut map = std::collections::HashMap::new();
    for _ in 0..n {
        let thread_id = read_u64(r)?;
        let name = read_string(r)?;
        map.insert(thread_id, name);
    }
    Ok(map)
}

fn write_source_locations<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    write_u32(w, trace.source_locations.len() as u32)?;
    for (ptr, loc) in trace.source_locations.iter() {
        write_u64(w, ptr)?;
        write_str(w, &loc.function)?;
        write_str(w, &loc.file)?;
        write_u32(w, loc.line)?;
        write_u32(w, loc.color)?;
        write_u8(w, loc.resolved as u8)?;
    }
    Ok(())
}

fn read_source_locations<R: Read>(r: &mut R, trace: &mut Trace) -> TraceResult<()> {
    let n = read_u32(r)?;
    for _ in 0..n {
        let ptr = read_u64(r)?;
        let function = read_bytes(r)?;
        let file = read_bytes(r)?;
        let line = read_u32(r)?;
        let color = read_u32(r)?;
        let resolved = read_u8(r)? != 0;
        if resolved {
            trace.source_locations.resolve(ptr, function, file, line, color);
        } else {
            trace.source_locations.shrink(ptr);
        }
    }
    Ok(())
}

fn write_frames<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    write_u32(w, trace.frames.len() as u32)?;
    for t in trace.frames.iter() {
        write_i64(w, t)?;
    }
    Ok(())
}

fn read_frames<R: Read>(r: &mut R, trace: &mut Trace) -> TraceResult<()> {
    let n = read_u32(r)?;
    for _ in 0..n {
        trace.frames.push(read_i64(r)?);
    }
    Ok(())
}

fn write_locks<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    write_u32(w, trace.locks.len() as u32)?;
    for lock in &trace.locks {
        write_u64(w, lock.lock_id)?;
        write_u8(w, lock.lock_type as u8)?;
        write_u32(w, lock.srcloc)?;
        // `lock.threads` is a HashSet, so its iteration order varies between
        // process runs; sort so re-writing a loaded trace is byte-for-byte
        // identical (spec §8 property 5).
        let mut threads: Vec<_> = lock.threads.iter().copied().collect();
        threads.sort_unstable();
        write_u32(w, threads.len() as u32)?;
        for t in threads {
            write_u64(w, t)?;
        }
        write_u32(w, lock.timeline.len() as u32)?;
        for ev in &lock.timeline {
            write_i64(w, ev.time)?;
            write_u64(w, ev.thread)?;
            write_u8(w, lock_event_kind_to_byte(ev.kind))?;
        }
    }
    Ok(())
}

fn read_locks<R: Read>(r: &mut R, trace: &mut Trace) -> TraceResult<()> {
    let n = read_u32(r)?;
    for _ in 0..n {
        let lock_id = read_u64(r)?;
        let lock_type = if read_u8(r)? == 0 { LockType::Exclusive } else { LockType::Shared };
        let srcloc = read_u32(r)?;
        let mut lock = LockMap::new(lock_id, lock_type, srcloc);

        let thread_count = read_u32(r)?;
        for _ in 0..thread_count {
            lock.threads.insert(read_u64(r)?);
        }

        let event_count = read_u32(r)?;
        for _ in 0..event_count {
            let time = read_i64(r)?;
            let thread = read_u64(r)?;
            let kind = lock_event_kind_from_byte(read_u8(r)?)?;
            lock.timeline.push(LockEvent { time, thread, kind });
        }
        trace.locks.push(lock);
    }
    Ok(())
}

fn lock_event_kind_to_byte(kind: LockEventKind) -> u8 {
    match kind {
        LockEventKind::WaitShared => 0,
        LockEventKind::WaitExclusive => 1,
        LockEventKind::Obtain => 2,
        LockEventKind::Release => 3,
        LockEventKind::Mark => 4,
    }
}

fn lock_event_kind_from_byte(b: u8) -> TraceResult<LockEventKind> {
    Ok(match b {
        0 => LockEventKind::WaitShared,
        1 => LockEventKind::WaitExclusive,
        2 => LockEventKind::Obtain,
        3 => LockEventKind::Release,
        4 => LockEventKind::Mark,
        other => return Err(TraceError::Protocol(format!("bad lock event kind {other}"))),
    })
}

fn write_plots<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    let plots: Vec<_> = trace.plots.iter().collect();
    write_u32(w, plots.len() as u32)?;
    for plot in plots {
        write_str(w, &plot.name)?;
        write_u32(w, plot.samples.len() as u32)?;
        for s in &plot.samples {
            write_i64(w, s.time)?;
            write_f64(w, s.value)?;
        }
    }
    Ok(())
}

fn read_plots<R: Read>(r: &mut R, trace: &mut Trace) -> TraceResult<()> {
    let n = read_u32(r)?;
    for _ in 0..n {
        let name = read_string(r)?;
        let key = name_hash(&name);
        trace.plots.resolve_name(key, name);
        let sample_count = read_u32(r)?;
        for _ in 0..sample_count {
            let time = read_i64(r)?;
            let value = read_f64(r)?;
            trace.plots.push_sample(key, time, value);
        }
    }
    Ok(())
}

/// Plots are keyed by client pointer in the live model, but a reloaded
/// trace has no pointers to key by — only the resolved name. A stable hash
/// of the name stands in as the key so [`crate::model::plot::PlotSet`]'s
/// pointer-keyed API can be reused unchanged for both paths.
fn name_hash(name: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

fn write_messages<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    write_u32(w, trace.messages.len() as u32)?;
    for m in &trace.messages {
        write_i64(w, m.time)?;
        write_u64(w, m.thread)?;
        write_str(w, &trace.slab.get_str(m.text))?;
    }
    Ok(())
}

fn read_messages<R: Read>(r: &mut R, trace: &mut Trace) -> TraceResult<()> {
    let n = read_u32(r)?;
    for _ in 0..n {
        let time = read_i64(r)?;
        let thread = read_u64(r)?;
        let text = trace.slab.store_str(&read_string(r)?);
        trace.messages.push(MessageData { time, thread, text });
    }
    Ok(())
}

fn write_gpu_contexts<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    write_u32(w, trace.gpu_contexts.len() as u32)?;
    for ctx in &trace.gpu_contexts {
        write_u8(w, ctx.context_id)?;
        write_f32(w, ctx.timer_period)?;
        write_i64(w, ctx.calibration_offset)?;
        write_u32(w, ctx.timeline.len() as u32)?;
        for &idx in &ctx.timeline {
            let ev = &trace.gpu_events[idx as usize];
            write_i64(w, ev.cpu_time_begin)?;
            write_i64(w, ev.gpu_time_begin)?;
            write_i64(w, ev.gpu_time_end)?;
            write_u32(w, ev.srcloc)?;
            write_u64(w, ev.thread)?;
        }
    }
    Ok(())
}

fn read_gpu_contexts<R: Read>(r: &mut R, trace: &mut Trace) -> TraceResult<()> {
    let n = read_u32(r)?;
    for _ in 0..n {
        let context_id = read_u8(r)?;
        let timer_period = read_f32(r)?;
        let calibration_offset = read_i64(r)?;
        let mut ctx = GpuCtx::new(context_id, timer_period);
        ctx.resync(calibration_offset);

        let event_count = read_u32(r)?;
        for _ in 0..event_count {
            let cpu_time_begin = read_i64(r)?;
            let gpu_time_begin = read_i64(r)?;
            let gpu_time_end = read_i64(r)?;
            let srcloc = read_u32(r)?;
            let thread = read_u64(r)?;
            ctx.push_event(
                &mut trace.gpu_events,
                GpuEvent { cpu_time_begin, gpu_time_begin, gpu_time_end, srcloc, thread },
            );
        }
        trace.gpu_contexts.push(ctx);
    }
    Ok(())
}

fn write_threads<W: Write>(w: &mut W, trace: &Trace) -> TraceResult<()> {
    write_u32(w, trace.threads.len() as u32)?;
    for thread in &trace.threads {
        write_u64(w, thread.thread_id)?;
        write_u32(w, thread.root_timeline.len() as u32)?;
        for &idx in &thread.root_timeline {
            write_zone(w, trace, idx)?;
        }
    }
    Ok(())
}

fn write_zone<W: Write>(w: &mut W, trace: &Trace, idx: u32) -> TraceResult<()> {
    let zone = &trace.zones[idx as usize];
    write_i64(w, zone.start)?;
    write_i64(w, zone.end)?;
    write_u32(w, zone.srcloc)?;
    write_u8(w, zone.text.is_some() as u8)?;
    if let Some(text) = zone.text {
        write_str(w, &trace.slab.get_str(text))?;
    }
    write_u32(w, zone.children.len() as u32)?;
    for &child in &zone.children {
        write_zone(w, trace, child)?;
    }
    Ok(())
}

fn read_threads<R: Read>(
    r: &mut R,
    trace: &mut Trace,
    names: &std::collections::HashMap<u64, Box<str>>,
) -> TraceResult<()> {
    let n = read_u32(r)?;
    for _ in 0..n {
        let thread_id = read_u64(r)?;
        let mut thread = Thread::new(thread_id);
        thread.name = names.get(&thread_id).cloned();

        let root_count = read_u32(r)?;
        for _ in 0..root_count {
            let idx = read_zone(r, &mut trace.zones, &mut trace.slab)?;
            thread.root_timeline.push(idx);
        }
        trace.threads.push(thread);
    }
    Ok(())
}

fn read_zone<R: Read>(r: &mut R, zones: &mut Vec<ZoneEvent>, slab: &mut Slab) -> TraceResult<u32> {
    let start = read_i64(r)?;
    let end = read_i64(r)?;
    let srcloc = read_u32(r)?;
    let has_text = read_u8(r)? != 0;
    let text = if has_text { Some(slab.store_str(&read_string(r)?)) } else { None };
    let child_count = read_u32(r)?;

    let idx = zones.len() as u32;
    zones.push(ZoneEvent { start, end, srcloc, text, children: Vec::new() });

    let mut children = Vec::with_capacity(child_count as usize);
    for _ in 0..child_count {
        children.push(read_zone(r, zones, slab)?);
    }
    zones[idx as usize].children = children;

    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Event;

    fn sample_handshake() -> Handshake {
        Handshake {
            timer_delay: 1,
            timer_resolution: 2,
            timer_mul: 1.5,
            capture_name: "demo".into(),
            lz4_enabled: false,
        }
    }

    fn sample_trace() -> Trace {
        let mut trace = Trace::new();
        trace.ingest(Event::ThreadContext { thread: 7 }).unwrap();
        trace.ingest(Event::ZoneBegin { srcloc: 1, time: 100 }).unwrap();
        trace.ingest(Event::ZoneText { text: b"inner work".to_vec() }).unwrap();
        trace.ingest(Event::ZoneBegin { srcloc: 2, time: 150 }).unwrap();
        trace.ingest(Event::ZoneEnd { time: 200 }).unwrap();
        trace.ingest(Event::ZoneEnd { time: 300 }).unwrap();

        // Two interned strings and a literal message exercise the slab and
        // the string table's (HashMap-backed, so order-unstable) iteration.
        trace.ingest(Event::StringData { ptr: 0xAAA, bytes: b"first".to_vec() }).unwrap();
        trace.ingest(Event::StringData { ptr: 0xBBB, bytes: b"second".to_vec() }).unwrap();
        trace
            .ingest(Event::Message { thread: 7, time: 250, text_ptr: 0xAAA, literal: Vec::new() })
            .unwrap();
        trace
            .ingest(Event::Message { thread: 7, time: 260, text_ptr: 0, literal: b"literal note".to_vec() })
            .unwrap();

        // Lock 5 is touched by two threads, so `lock.threads` (a HashSet,
        // also order-unstable) must be sorted before writing.
        trace
            .ingest(Event::LockAnnounce { lock_id: 5, srcloc: 3, time: 0, lock_type: LockType::Exclusive })
            .unwrap();
        trace.ingest(Event::LockWait { lock_id: 5, thread: 1, time: 100, shared: false }).unwrap();
        trace.ingest(Event::LockObtain { lock_id: 5, thread: 1, time: 120, shared: false }).unwrap();
        trace.ingest(Event::LockWait { lock_id: 5, thread: 2, time: 130, shared: false }).unwrap();
        trace.ingest(Event::LockRelease { lock_id: 5, thread: 1, time: 200, shared: false }).unwrap();
        trace.ingest(Event::LockObtain { lock_id: 5, thread: 2, time: 210, shared: false }).unwrap();
        trace.ingest(Event::LockRelease { lock_id: 5, thread: 2, time: 220, shared: false }).unwrap();
        trace
    }

    #[test]
    fn s5_round_trip_preserves_zones_and_locks() {
        let handshake = sample_handshake();
        let trace = sample_trace();

        let mut buf = Vec::new();
        write_trace(&mut buf, &handshake, &trace).unwrap();
        let (read_handshake, read_back) = read_trace(&mut std::io::Cursor::new(&buf)).unwrap();

        assert_eq!(read_handshake.capture_name, "demo");
        assert_eq!(read_handshake.timer_delay, 1);

        let thread = read_back.thread_by_id(7).unwrap();
        let root = &read_back.zones[thread.root_timeline[0] as usize];
        assert_eq!((root.start, root.end), (100, 300));
        assert_eq!(read_back.slab.get_str(root.text.unwrap()), "inner work");
        let child = &read_back.zones[root.children[0] as usize];
        assert_eq!((child.start, child.end), (150, 200));

        let lock = read_back.lock_by_id(5).unwrap();
        assert_eq!(lock.timeline.len(), 6);
        assert_eq!(lock.threads, std::collections::HashSet::from([1, 2]));

        assert_eq!(read_back.messages.len(), 2);
        assert_eq!(read_back.slab.get_str(read_back.messages[0].text), "first");
        assert_eq!(read_back.slab.get_str(read_back.messages[1].text), "literal note");

        let mut buf2 = Vec::new();
        write_trace(&mut buf2, &read_handshake, &read_back).unwrap();
        assert_eq!(buf, buf2, "second write must byte-for-byte match the first");
    }

    #[test]
    fn s6_unsupported_major_version_is_rejected() {
        let handshake = sample_handshake();
        let trace = Trace::new();
        let mut buf = Vec::new();
        write_trace(&mut buf, &handshake, &trace).unwrap();
        buf[5] = VERSION_MAJOR + 1;

        let err = read_trace(&mut std::io::Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, TraceError::UnsupportedVersion { version } if version == VERSION_MAJOR + 1));
    }

    #[test]
    fn bad_magic_is_not_a_trace_dump() {
        let buf = vec![0u8; 16];
        let err = read_trace(&mut std::io::Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, TraceError::NotTracyDump));
    }
}
