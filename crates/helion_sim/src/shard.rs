//! # Shard
//!
//! A thread-local group of chunks advanced together. The shard owns its
//! chunks and one effect buffer; `exec` steps every chunk against the
//! tick's world view, and the main thread drains the buffer afterwards.
//! Chunk order inside a shard is insertion order and never changes, so a
//! shard's output is a pure function of its input state.

use helion_core::coord::Coord;
use helion_core::Word;
use helion_db::io::Io;
use helion_db::items::{ImId, Item};

use crate::chunk::Chunk;
use crate::effects::Effects;
use crate::world::WorldView;

/// One shard: owned chunks plus the effect buffer.
#[derive(Debug, Default)]
pub struct Shard {
    chunks: Vec<Chunk>,
    fx: Effects,
}

impl Shard {
    /// Empty shard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Owned chunk count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Takes ownership of a chunk. Insertion order is step order.
    pub fn register(&mut self, chunk: Chunk) {
        tracing::debug!(coord = ?chunk.coord(), "chunk registered");
        self.chunks.push(chunk);
    }

    /// The chunk at `coord`.
    #[must_use]
    pub fn chunk(&self, coord: Coord) -> Option<&Chunk> {
        self.chunks.iter().find(|chunk| chunk.coord() == coord)
    }

    /// Mutable chunk at `coord`.
    pub fn chunk_mut(&mut self, coord: Coord) -> Option<&mut Chunk> {
        self.chunks.iter_mut().find(|chunk| chunk.coord() == coord)
    }

    /// Chunks in step order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// The effect buffer and read model.
    pub fn effects_mut(&mut self) -> &mut Effects {
        &mut self.fx
    }

    /// Read-only effects view.
    #[must_use]
    pub fn effects(&self) -> &Effects {
        &self.fx
    }

    /// Routes an IO into a chunk, effects landing in this shard's
    /// buffer.
    pub fn chunk_io(
        &mut self,
        coord: Coord,
        view: &WorldView,
        io: Io,
        src: ImId,
        dst: ImId,
        args: &[Word],
    ) -> bool {
        let Self { chunks, fx } = self;
        let Some(chunk) = chunks.iter_mut().find(|chunk| chunk.coord() == coord) else {
            return false;
        };
        chunk.api(view, fx).io(io, src, dst, args)
    }

    /// Creates an entity with caller-supplied words in a chunk.
    pub fn chunk_create_from(
        &mut self,
        coord: Coord,
        view: &WorldView,
        item: Item,
        data: &[Word],
    ) -> bool {
        let Self { chunks, fx } = self;
        let Some(chunk) = chunks.iter_mut().find(|chunk| chunk.coord() == coord) else {
            return false;
        };
        chunk.api(view, fx).create_from(item, data)
    }

    /// The exec phase: steps every owned chunk, in order.
    pub fn exec(&mut self, view: &WorldView) {
        let Self { chunks, fx } = self;
        for chunk in chunks.iter_mut() {
            chunk.api(view, fx).step();
        }
    }
}
