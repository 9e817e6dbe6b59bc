//! # Proxy
//!
//! The read-only face of the world for external collaborators (CLI, UI).
//! A proxy never mutates; it summarises chunks, drains nothing, and
//! copies what it reports so callers cannot hold references into the
//! simulation.

use helion_core::coord::Coord;
use helion_core::{UserId, Word, WorldTs};
use helion_db::items::Item;

use crate::chunk::Workers;
use crate::items::{self, Flow};
use crate::log::LogLine;
use crate::world::World;

/// A chunk summary, copied out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Star position.
    pub coord: Coord,
    /// Owning user.
    pub owner: UserId,
    /// Name atom.
    pub name: Word,
    /// Live entities across every arena.
    pub items: usize,
    /// Worker accounting of the last tick.
    pub workers: Workers,
    /// Energy drawn last tick.
    pub energy_consumed: u64,
    /// Landed pills.
    pub pills: usize,
}

/// Read-only world view for collaborators.
pub struct Proxy<'a> {
    world: &'a World,
}

impl<'a> Proxy<'a> {
    /// Wraps a world.
    #[must_use]
    pub fn new(world: &'a World) -> Self {
        Self { world }
    }

    /// Current world time.
    #[must_use]
    pub fn time(&self) -> WorldTs {
        self.world.time()
    }

    /// World seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.world.seed()
    }

    /// Number of inhabited stars.
    #[must_use]
    pub fn chunks_len(&self) -> usize {
        self.world.chunks_len()
    }

    /// In-flight lane packets.
    #[must_use]
    pub fn lanes_len(&self) -> usize {
        self.world.lanes().len()
    }

    /// Summaries for every inhabited star, coordinate order.
    #[must_use]
    pub fn chunks(&self) -> Vec<ChunkSummary> {
        self.world
            .chunks()
            .filter_map(|coord| {
                self.world.chunk(coord, |chunk| ChunkSummary {
                    coord,
                    owner: chunk.owner(),
                    name: chunk.name(),
                    items: chunk.list().len(),
                    workers: chunk.workers(),
                    energy_consumed: chunk.energy.consumed,
                    pills: chunk.pills_len(),
                })
            })
            .collect()
    }

    /// Production summaries for every busy machine at a star, ordered by
    /// crafting rank then id.
    #[must_use]
    pub fn chunk_flows(&self, coord: Coord) -> Vec<Flow> {
        let db = std::sync::Arc::clone(self.world.db());
        let mut flows = self
            .world
            .chunk(coord, |chunk| {
                chunk
                    .list()
                    .into_iter()
                    .filter_map(|id| chunk.state(id).and_then(|state| items::flow(state, &db)))
                    .collect::<Vec<Flow>>()
            })
            .unwrap_or_default();
        flows.sort_by_key(|flow| (flow.rank, flow.id));
        flows
    }

    /// Copy of a chunk's log, oldest first.
    #[must_use]
    pub fn chunk_log(&self, coord: Coord) -> Vec<LogLine> {
        self.world
            .chunk(coord, |chunk| chunk.logs().iter().collect())
            .unwrap_or_default()
    }

    /// Copy of a user's forwarded log, oldest first.
    #[must_use]
    pub fn user_log(&self, user: UserId) -> Vec<LogLine> {
        self.world
            .user_log(user)
            .map(|log| log.iter().collect())
            .unwrap_or_default()
    }

    /// Count of `item` at a star; -1 when uninhabited. Read-only twin of
    /// the probe model.
    #[must_use]
    pub fn count(&self, coord: Coord, item: Item) -> i64 {
        self.world.chunk(coord, |chunk| chunk.count(item)).unwrap_or(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helion_core::USER_ADMIN;

    #[test]
    fn test_summaries() {
        let mut world = World::new(11, 1).unwrap();
        let star = world.sector(Coord::center()).stars[0].coord;
        world.chunk_alloc(star, USER_ADMIN);
        world.chunk_create(star, Item::Printer);
        world.chunk_create(star, Item::Worker);
        world.step();

        let proxy = Proxy::new(&world);
        assert_eq!(proxy.time(), 1);
        let chunks = proxy.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].coord, star);
        assert_eq!(chunks[0].items, 1);
        assert_eq!(chunks[0].workers.count, 1);
        assert_eq!(proxy.count(star, Item::Printer), 1);
        assert_eq!(proxy.count(Coord::new(1, 1), Item::Printer), -1);
    }

    #[test]
    fn test_flows_track_busy_machines() {
        use helion_db::io::Io;
        use helion_db::items::ImId;
        use helion_core::Word;

        let mut world = World::new(12, 1).unwrap();
        let star = world.sector(Coord::center()).stars[0].coord;
        world.chunk_alloc(star, USER_ADMIN);
        world.chunk_create(star, Item::Storage);
        world.step();

        assert!(Proxy::new(&world).chunk_flows(star).is_empty());

        world.chunk_io(
            star,
            Io::Item,
            ImId::NIL,
            ImId::new(Item::Storage, 1),
            &[Word::from(Item::ElemA as u8)],
        );
        let flows = Proxy::new(&world).chunk_flows(star);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].target, Item::ElemA);
    }
}
