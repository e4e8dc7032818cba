//! Global message log (spec §4.5: "time-ordered globally; each carries
//! thread id and a (possibly literal) text").

use crate::model::slab::SlabRef;

#[derive(Debug, Clone)]
pub struct MessageData {
    pub time: i64,
    pub thread: u64,
    /// Slab-allocated text, literal or interned (spec §3: message text is
    /// slab-owned).
    pub text: SlabRef,
}
