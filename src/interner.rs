//! String interner and source-location registry (spec §4.3).
//!
//! Grounded on the teacher's consumer/sequence bookkeeping style in
//! examples/dawsh2-AlphaPulse/backend/protocol_v2/src/relay/consumer_registry.rs
//! (a small `HashMap`-backed registry with an explicit per-key state enum) —
//! here the per-key state is "resolved / pending" instead of "normal /
//! recovering", but the shape (registry owns a map, exposes
//! register/update/status operations) is the same.

use std::collections::{HashMap, HashSet};

/// The three query kinds the controller can send to the client, plus the
/// out-of-band terminate signal (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryKind {
    String = 0,
    ThreadName = 1,
    SourceLocation = 2,
    Terminate = 3,
}

/// A server->client query frame awaiting transmission (spec §4.3: "schedules
/// a server->client query frame").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingQuery {
    pub kind: QueryKind,
    pub ptr: u64,
}

/// Maps client pointer-identity keys to server-interned string content.
/// Keys are the client's in-process address of a static string (zone text,
/// plot names, thread names, message text); strings are immortal for the
/// life of the trace (spec §3: "Interned string ... immortal").
#[derive(Debug, Default)]
pub struct StringInterner {
    resolved: HashMap<u64, Box<str>>,
    pending: HashSet<u64>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a string by its pointer key, returning the sentinel if it
    /// hasn't resolved yet (spec §6.3, §8 property 4).
    pub fn get(&self, ptr: u64) -> &str {
        self.resolved
            .get(&ptr)
            .map(|s| s.as_ref())
            .unwrap_or(crate::UNRESOLVED_STRING)
    }

    pub fn is_resolved(&self, ptr: u64) -> bool {
        self.resolved.contains_key(&ptr)
    }

    /// Ensure `ptr` will eventually resolve: if already known, no-op; if a
    /// query is already in flight, no-op (spec §4.3 step 2: "hit -> drop");
    /// otherwise mark pending and return a query to enqueue (spec §8
    /// property 6: "pointer keys are queried at most once per unique
    /// value").
    pub fn ensure_queried(&mut self, ptr: u64, kind: QueryKind) -> Option<PendingQuery> {
        if self.resolved.contains_key(&ptr) || self.pending.contains(&ptr) {
            return None;
        }
        self.pending.insert(ptr);
        Some(PendingQuery { kind, ptr })
    }

    /// Record the client's reply for `ptr` (spec §4.3: "handler moves the
    /// ptr from pending -> interned").
    pub fn resolve(&mut self, ptr: u64, bytes: Vec<u8>) {
        self.resolved
            .insert(ptr, String::from_utf8_lossy(&bytes).into_owned().into_boxed_str());
        self.pending.remove(&ptr);
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.resolved.iter().map(|(&ptr, s)| (ptr, s.as_ref()))
    }
}

/// A source location, resolved or still pending its reply (spec §3 row
/// `SourceLocation`; function/file names stored directly rather than via a
/// second pointer-indirection through the string pool, since the wire
/// reply delivers them inline with no independent address of their own —
/// see DESIGN.md).
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub function: Box<str>,
    pub file: Box<str>,
    pub line: u32,
    pub color: u32,
    pub resolved: bool,
}

impl SourceLocation {
    fn pending() -> Self {
        Self {
            function: crate::UNRESOLVED_STRING.into(),
            file: crate::UNRESOLVED_STRING.into(),
            line: 0,
            color: 0,
            resolved: false,
        }
    }
}

/// Shrinks full 64-bit client pointers into dense 32-bit ids, the
/// precondition for file serialization (spec §4.3 "Source-location
/// shrinking").
#[derive(Debug, Default)]
pub struct SourceLocationRegistry {
    ptr_to_id: HashMap<u64, u32>,
    id_to_ptr: Vec<u64>,
    records: Vec<SourceLocation>,
    pending: HashSet<u64>,
}

impl SourceLocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `ptr` to its dense id, allocating one and queuing a query on
    /// first sight.
    pub fn shrink(&mut self, ptr: u64) -> (u32, Option<PendingQuery>) {
        if let Some(&id) = self.ptr_to_id.get(&ptr) {
            return (id, None);
        }
        let id = self.records.len() as u32;
        self.ptr_to_id.insert(ptr, id);
        self.id_to_ptr.push(ptr);
        self.records.push(SourceLocation::pending());

        let query = if self.pending.insert(ptr) {
            Some(PendingQuery { kind: QueryKind::SourceLocation, ptr })
        } else {
            None
        };
        (id, query)
    }

    /// Record the client's `SourceLocation` reply, patching in any zone
    /// begins that referenced `ptr` before this arrived (spec §4.4
    /// `ZoneBeginAllocSrcLoc`).
    pub fn resolve(&mut self, ptr: u64, function: Vec<u8>, file: Vec<u8>, line: u32, color: u32) -> u32 {
        let (id, _) = self.shrink(ptr);
        self.pending.remove(&ptr);
        self.records[id as usize] = SourceLocation {
            function: String::from_utf8_lossy(&function).into_owned().into_boxed_str(),
            file: String::from_utf8_lossy(&file).into_owned().into_boxed_str(),
            line,
            color,
            resolved: true,
        };
        id
    }

    pub fn get(&self, id: u32) -> Option<&SourceLocation> {
        self.records.get(id as usize)
    }

    pub fn ptr_of(&self, id: u32) -> Option<u64> {
        self.id_to_ptr.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &SourceLocation)> {
        self.id_to_ptr.iter().copied().zip(self.records.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_string_returns_sentinel() {
        let interner = StringInterner::new();
        assert_eq!(interner.get(0xAA), "???");
    }

    #[test]
    fn query_issued_once_per_ptr() {
        let mut interner = StringInterner::new();
        let first = interner.ensure_queried(0xAA, QueryKind::String);
        assert!(first.is_some());
        let second = interner.ensure_queried(0xAA, QueryKind::String);
        assert!(second.is_none(), "duplicate query must be dropped");
    }

    #[test]
    fn resolve_updates_pending_state() {
        let mut interner = StringInterner::new();
        interner.ensure_queried(0xAA, QueryKind::String);
        interner.resolve(0xAA, b"fps".to_vec());
        assert_eq!(interner.get(0xAA), "fps");
        // A fresh query after resolution is a no-op too (already known).
        assert!(interner.ensure_queried(0xAA, QueryKind::String).is_none());
    }

    #[test]
    fn source_location_shrinks_to_dense_ids() {
        let mut reg = SourceLocationRegistry::new();
        let (id_a, q_a) = reg.shrink(0xAA);
        let (id_a_again, q_a_again) = reg.shrink(0xAA);
        let (id_b, _) = reg.shrink(0xBB);

        assert_eq!(id_a, 0);
        assert_eq!(id_a_again, 0);
        assert!(q_a.is_some());
        assert!(q_a_again.is_none());
        assert_eq!(id_b, 1);
        assert!(!reg.get(id_a).unwrap().resolved);
    }

    #[test]
    fn source_location_resolve_patches_record() {
        let mut reg = SourceLocationRegistry::new();
        let (id, _) = reg.shrink(0xAA);
        reg.resolve(0xAA, b"foo".to_vec(), b"f.c".to_vec(), 42, 0);
        let loc = reg.get(id).unwrap();
        assert_eq!(&*loc.function, "foo");
        assert_eq!(&*loc.file, "f.c");
        assert_eq!(loc.line, 42);
        assert!(loc.resolved);
    }
}
