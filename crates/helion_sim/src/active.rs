//! # Item Arenas
//!
//! Dense per-kind storage for every active entity of a chunk, with a
//! parallel ports cell per slot, a free-slot bitmap and a deferred
//! creation counter. Slot indices are stable for the lifetime of an
//! entity; sequence numbers are slot index + 1 and are reused only after
//! deletion, lowest slot first.
//!
//! Creation during iteration is the tricky part: an entity may create
//! another entity of its own kind mid-step, so plain `create` only bumps
//! a counter and the chunk drains it after every arena has stepped.

use helion_core::bits::FreeSet;
use helion_core::save::{Magic, SaveError, SaveReader, SaveResult, SaveWriter};
use helion_db::items::{ImId, Item};
use helion_db::specs::STAR_ITEM_CAP;

use crate::items::{self, ActiveState};
use crate::world::WorldView;

/// One entity's two-slot port cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ports {
    /// Requested input kind.
    pub input: Item,
    /// Produced output kind; nil once a worker picked it up.
    pub output: Item,
    /// Input slot state.
    pub state: PortsState,
}

/// Input slot lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PortsState {
    /// Nothing requested.
    #[default]
    Nil = 0,
    /// Waiting for a worker to deliver.
    Requested = 1,
    /// Delivered; waiting for the owner to consume.
    Received = 2,
}

impl PortsState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::Requested,
            2 => Self::Received,
            _ => Self::Nil,
        }
    }
}

/// Dense storage for one active kind within one chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct Arena {
    item: Item,
    cap: u16,
    count: u16,
    create: u16,
    slots: Vec<ActiveState>,
    ports: Vec<Ports>,
    free: FreeSet,
}

impl Arena {
    /// Zero-length, zero-capacity arena for `item`.
    #[must_use]
    pub fn new(item: Item) -> Self {
        debug_assert!(item.is_active());
        Self {
            item,
            cap: 0,
            count: 0,
            create: 0,
            slots: Vec::new(),
            ports: Vec::new(),
            free: FreeSet::new(),
        }
    }

    /// The kind stored here.
    #[inline]
    #[must_use]
    pub const fn item(&self) -> Item {
        self.item
    }

    /// High-water slot count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Live entity count.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count as usize
    }

    /// Deferred creations not yet drained.
    #[inline]
    #[must_use]
    pub const fn pending(&self) -> u16 {
        self.create
    }

    /// True when slot `ix` holds a live entity.
    #[inline]
    #[must_use]
    pub fn live(&self, ix: usize) -> bool {
        ix < self.slots.len() && !self.free.test(ix)
    }

    /// Id of slot `ix`.
    #[inline]
    #[must_use]
    pub fn id_at(&self, ix: usize) -> ImId {
        ImId::new(self.item, ix as u8 + 1)
    }

    fn index(&self, id: ImId) -> Option<usize> {
        if id.item() != self.item || id.seq() == 0 {
            return None;
        }
        let ix = usize::from(id.seq()) - 1;
        self.live(ix).then_some(ix)
    }

    /// State of `id`; `None` for out-of-range or deleted ids.
    #[must_use]
    pub fn get(&self, id: ImId) -> Option<&ActiveState> {
        Some(&self.slots[self.index(id)?])
    }

    /// Mutable state of `id`.
    pub fn get_mut(&mut self, id: ImId) -> Option<&mut ActiveState> {
        let ix = self.index(id)?;
        Some(&mut self.slots[ix])
    }

    /// Ports cell of `id`.
    #[must_use]
    pub fn ports(&self, id: ImId) -> Option<Ports> {
        Some(self.ports[self.index(id)?])
    }

    /// Mutable ports cell of `id`.
    pub fn ports_mut(&mut self, id: ImId) -> Option<&mut Ports> {
        let ix = self.index(id)?;
        Some(&mut self.ports[ix])
    }

    /// Highest live id, for pack-style operations.
    #[must_use]
    pub fn last(&self) -> ImId {
        for ix in (0..self.slots.len()).rev() {
            if self.live(ix) {
                return self.id_at(ix);
            }
        }
        ImId::NIL
    }

    /// Live ids, slot order.
    pub fn ids(&self) -> impl Iterator<Item = ImId> + '_ {
        (0..self.slots.len()).filter(|&ix| self.live(ix)).map(|ix| self.id_at(ix))
    }

    /// Whether a creation could still be honoured.
    #[must_use]
    pub fn can_create(&self) -> bool {
        self.count as usize + usize::from(self.create) < usize::from(STAR_ITEM_CAP)
    }

    /// Schedules a deferred creation; drained by the chunk after the
    /// step sweep.
    pub fn create(&mut self) {
        self.create += 1;
    }

    /// Allocates a slot immediately (lane arrivals, `make`). Returns the
    /// new id with a freshly initialised state already in place.
    pub fn alloc(&mut self) -> Option<ImId> {
        if let Some(ix) = self.free.take_first() {
            let id = self.id_at(ix);
            self.slots[ix] = items::spawn(self.item, id)?;
            self.ports[ix] = Ports::default();
            self.count += 1;
            return Some(id);
        }

        if self.slots.len() >= usize::from(STAR_ITEM_CAP) {
            return None;
        }

        let ix = self.slots.len();
        let id = self.id_at(ix);
        self.slots.push(items::spawn(self.item, id)?);
        self.ports.push(Ports::default());
        if self.slots.len() > usize::from(self.cap) {
            self.cap = if self.cap == 0 { 1 } else { self.cap * 2 };
            self.free.grow(usize::from(self.cap));
        }
        self.count += 1;
        Some(id)
    }

    /// Overwrites a freshly allocated slot with a made state.
    pub fn put(&mut self, id: ImId, state: ActiveState) {
        if let Some(ix) = self.index(id) {
            self.slots[ix] = state;
        }
    }

    /// Marks `id` deleted. The slot bytes stay until reuse.
    pub fn delete(&mut self, id: ImId) -> bool {
        let Some(ix) = self.index(id) else { return false };
        self.free.set(ix);
        self.count -= 1;
        true
    }

    /// Drains the deferred-creation counter. Returns the ids actually
    /// created; the shortfall is the caller's to log.
    pub fn drain_create(&mut self) -> (Vec<ImId>, u16) {
        let mut created = Vec::new();
        let mut missed = 0;
        while self.create > 0 {
            self.create -= 1;
            match self.alloc() {
                Some(id) => created.push(id),
                None => missed += 1,
            }
        }
        (created, missed)
    }

    /// Bulk-copies a live state; asserts the destination is big enough
    /// in spirit by returning the clone.
    #[must_use]
    pub fn copy(&self, id: ImId) -> Option<ActiveState> {
        self.get(id).cloned()
    }

    // -------------------------------------------------------------------------
    // save
    // -------------------------------------------------------------------------

    /// Serialises the arena. Must not run mid-step: deferred creations
    /// would be lost.
    pub fn save(&self, writer: &mut SaveWriter) {
        assert_eq!(self.create, 0, "saving mid-step");

        writer.write_magic(Magic::Active);
        writer.write_u16(self.slots.len() as u16);
        writer.write_u16(self.count);
        writer.write_u16(self.cap);
        for state in &self.slots {
            items::save_state(writer, state);
        }
        for ports in &self.ports {
            writer.write_u8(ports.input as u8);
            writer.write_u8(ports.output as u8);
            writer.write_u8(ports.state as u8);
            writer.write_u8(0);
        }
        writer.write_vec64(&self.free.words());
        writer.write_magic(Magic::Active);
    }

    /// Deserialises an arena and re-resolves host caches (tape pointers,
    /// brain mods) for every live slot.
    pub fn load(reader: &mut SaveReader<'_>, item: Item, view: &WorldView) -> SaveResult<Self> {
        reader.expect_magic(Magic::Active)?;
        let len = usize::from(reader.read_u16()?);
        let count = reader.read_u16()?;
        let cap = reader.read_u16()?;
        if usize::from(count) > len || len > usize::from(STAR_ITEM_CAP) {
            return Err(SaveError::Magic { want: 0, got: u64::from(count), at: reader.pos() });
        }

        let mut arena = Self::new(item);
        arena.cap = cap;
        arena.count = count;
        for _ in 0..len {
            arena.slots.push(items::load_state(reader, item)?);
        }
        for _ in 0..len {
            let input = Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil);
            let output = Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil);
            let state = PortsState::from_u8(reader.read_u8()?);
            reader.read_u8()?;
            arena.ports.push(Ports { input, output, state });
        }
        arena.free = FreeSet::from_words(&reader.read_vec64()?, usize::from(cap).max(64));
        reader.expect_magic(Magic::Active)?;

        for ix in 0..arena.slots.len() {
            if arena.live(ix) {
                items::load_fixup(&mut arena.slots[ix], view);
            }
        }
        Ok(arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_recycles_lowest() {
        let mut arena = Arena::new(Item::Memory);
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        let c = arena.alloc().unwrap();
        assert_eq!((a.seq(), b.seq(), c.seq()), (1, 2, 3));
        assert_eq!(arena.count(), 3);

        assert!(arena.delete(b));
        assert!(arena.delete(a));
        assert_eq!(arena.count(), 1);
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_none());
        assert!(arena.get(c).is_some());

        // Lowest free slot first.
        assert_eq!(arena.alloc().unwrap(), a);
        assert_eq!(arena.alloc().unwrap(), b);
        assert_eq!(arena.last(), c);
    }

    #[test]
    fn test_deferred_create() {
        let mut arena = Arena::new(Item::Memory);
        arena.create();
        arena.create();
        assert_eq!(arena.count(), 0);
        assert_eq!(arena.pending(), 2);

        let (created, missed) = arena.drain_create();
        assert_eq!(created.len(), 2);
        assert_eq!(missed, 0);
        assert_eq!(arena.count(), 2);
        assert_eq!(arena.pending(), 0);
    }

    #[test]
    fn test_cap_limit() {
        let mut arena = Arena::new(Item::Memory);
        for _ in 0..STAR_ITEM_CAP {
            assert!(arena.alloc().is_some());
        }
        assert!(arena.alloc().is_none());
        assert!(!arena.can_create());
        assert_eq!(arena.count(), usize::from(STAR_ITEM_CAP));
    }

    #[test]
    fn test_invariants() {
        let mut arena = Arena::new(Item::Memory);
        for _ in 0..70 {
            arena.alloc();
        }
        for ix in (0..70).step_by(3) {
            arena.delete(arena.id_at(ix));
        }

        // count = len - |free|, and get agrees with the free set.
        let free: usize = (0..arena.len()).filter(|&ix| !arena.live(ix)).count();
        assert_eq!(arena.count(), arena.len() - free);
        for ix in 0..arena.len() {
            assert_eq!(arena.get(arena.id_at(ix)).is_some(), arena.live(ix));
        }
    }
}
