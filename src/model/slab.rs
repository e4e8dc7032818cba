//! Bump allocator for event payloads (spec §3, §5: "all event-payload
//! memory comes from a slab with 64 MiB blocks; the slab is append-only
//! during capture and freed en masse at trace teardown").
//!
//! The rest of the model stores entities in plain `Vec`s rather than raw
//! slab pointers — Rust's `Vec` already gives the append-only, index-stable
//! (via `u32` handles, never references) allocation the spec calls for,
//! without the pointer-stability tricks the original's literal bump
//! allocator needs in a language without move-safe growable vectors. This
//! `Slab` exists for the one place the model still wants a single
//! contiguous byte arena: large text payloads (zone text, message text)
//! that would otherwise fragment the heap with many small `Vec<u8>`
//! allocations.

const BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// An append-only byte arena. Returns offsets, not pointers, so the arena
/// itself can be swapped in and out of the write lock independently of
/// anything that references it by index.
#[derive(Debug, Default)]
pub struct Slab {
    blocks: Vec<Vec<u8>>,
}

/// A stable reference into a [`Slab`]: (block index, offset, length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabRef {
    block: u32,
    offset: u32,
    len: u32,
}

impl Slab {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Copy `bytes` into the arena, allocating a new block if the current
    /// one doesn't have room.
    pub fn store(&mut self, bytes: &[u8]) -> SlabRef {
        assert!(bytes.len() <= BLOCK_SIZE, "payload larger than one slab block");

        if self.blocks.last().is_none_or(|b| b.len() + bytes.len() > BLOCK_SIZE) {
            self.blocks.push(Vec::with_capacity(BLOCK_SIZE));
        }
        let block = self.blocks.last_mut().unwrap();
        let offset = block.len();
        block.extend_from_slice(bytes);

        SlabRef {
            block: (self.blocks.len() - 1) as u32,
            offset: offset as u32,
            len: bytes.len() as u32,
        }
    }

    pub fn get(&self, r: SlabRef) -> &[u8] {
        let block = &self.blocks[r.block as usize];
        &block[r.offset as usize..r.offset as usize + r.len as usize]
    }

    /// Copy `text` into the arena and hand back a reference, the text-payload
    /// counterpart to [`Slab::store`] for the common case of UTF-8 content.
    pub fn store_str(&mut self, text: &str) -> SlabRef {
        self.store(text.as_bytes())
    }

    /// Lossily decode the bytes at `r` as UTF-8 (zone/message text arrives
    /// as raw client bytes with no encoding guarantee).
    pub fn get_str(&self, r: SlabRef) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.get(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves_across_blocks() {
        let mut slab = Slab::new();
        let a = slab.store(b"hello");
        let b = slab.store(b"world");
        assert_eq!(slab.get(a), b"hello");
        assert_eq!(slab.get(b), b"world");
    }
}
