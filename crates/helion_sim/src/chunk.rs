//! # Chunk
//!
//! The per-star simulation container: item arenas, the worker-mediated
//! ports layer, the energy ledger, logs, pill pad, transmit listeners and
//! the lane arrival queue. `ChunkApi` wraps a chunk together with the
//! per-tick world view and the shard effect buffer; everything that can
//! touch the outside goes through it.
//!
//! A chunk never touches another chunk's memory. Cross-star effects
//! leave through the effect buffer and come back as lane arrivals.

use helion_core::coord::Coord;
use helion_core::ring::Ring;
use helion_core::save::{Magic, SaveReader, SaveResult, SaveWriter};
use helion_core::{UserId, Word, WorldTs};
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item, ITEM_ACTIVE_COUNT};
use helion_db::stars::Star;

use crate::active::{Arena, Ports, PortsState};
use crate::cargo::{Cargo, Pill, Pills};
use crate::effects::{Effects, LaunchFx};
use crate::energy::Energy;
use crate::items::{self, transmit::packet_unpack, ActiveState};
use crate::log::{Log, LogLine, CHUNK_LOG_CAP};
use crate::world::WorldView;

/// Worker accounting for one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Workers {
    /// Workers in the chunk.
    pub count: u8,
    /// Requests queued at the start of the tick.
    pub queue: u16,
    /// Workers that found nothing to do.
    pub idle: u8,
    /// Requests attempted and unmatched.
    pub fail: u8,
    /// Cancelled operations swept this tick.
    pub clean: u8,
}

/// Packs a completed transfer for the ops list.
#[inline]
#[must_use]
pub const fn workers_op(src: ImId, dst: ImId) -> u32 {
    ((src.to_u16() as u32) << 16) | dst.to_u16() as u32
}

/// Unpacks an ops list entry.
#[inline]
#[must_use]
pub const fn workers_op_split(op: u32) -> (ImId, ImId) {
    (ImId::from_u16((op >> 16) as u16), ImId::from_u16(op as u16))
}

/// A transmit listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Listener {
    /// Receiving entity.
    pub id: ImId,
    /// Star listened to.
    pub src: Coord,
    /// Channel listened on.
    pub chan: u8,
}

/// A lane packet landed here, processed at the next step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arrival {
    /// Packet kind.
    pub item: Item,
    /// Launch star.
    pub src: Coord,
    /// Copied payload.
    pub data: Vec<Word>,
}

/// A launch requested mid-step, flushed to the bus at pipeline step 5.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingLaunch {
    item: Item,
    speed: u32,
    dst: Coord,
    data: Vec<Word>,
}

/// Per-star container.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    owner: UserId,
    name: Word,
    star: Star,
    updated: WorldTs,

    arenas: Vec<Arena>,
    requested: Ring<u16>,
    cleanup: Ring<u16>,
    workers: Workers,
    ops: Vec<u32>,

    /// The power ledger; machines draw from it directly.
    pub energy: Energy,
    log: Log,
    listeners: Vec<Listener>,
    pills: Pills,
    arrivals: Vec<Arrival>,
    launches: Vec<PendingLaunch>,
}

impl Chunk {
    /// Fresh chunk around `star`.
    #[must_use]
    pub fn new(star: Star, owner: UserId, name: Word) -> Self {
        let arenas = (0..ITEM_ACTIVE_COUNT)
            .map(|ix| Arena::new(Item::from_active_index(ix).expect("active index")))
            .collect();
        Self {
            owner,
            name,
            star,
            updated: 0,
            arenas,
            requested: Ring::with_capacity(16),
            cleanup: Ring::with_capacity(8),
            workers: Workers::default(),
            ops: Vec::new(),
            energy: Energy::new(),
            log: Log::new(CHUNK_LOG_CAP),
            listeners: Vec::new(),
            pills: Pills::new(),
            arrivals: Vec::new(),
            launches: Vec::new(),
        }
    }

    /// Owning user.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> UserId {
        self.owner
    }

    /// Name atom.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> Word {
        self.name
    }

    /// Renames the chunk.
    pub fn rename(&mut self, name: Word) {
        self.name = name;
    }

    /// The star, with its remaining abundances.
    #[inline]
    #[must_use]
    pub const fn star(&self) -> &Star {
        &self.star
    }

    /// Star position; the chunk's identity in the world.
    #[inline]
    #[must_use]
    pub const fn coord(&self) -> Coord {
        self.star.coord
    }

    /// World time of the last step.
    #[inline]
    #[must_use]
    pub const fn updated(&self) -> WorldTs {
        self.updated
    }

    /// Worker accounting of the last tick.
    #[inline]
    #[must_use]
    pub const fn workers(&self) -> Workers {
        self.workers
    }

    /// Completed transfers of the last tick.
    #[inline]
    #[must_use]
    pub fn ops(&self) -> &[u32] {
        &self.ops
    }

    /// The log ring.
    #[inline]
    #[must_use]
    pub const fn logs(&self) -> &Log {
        &self.log
    }

    /// Harvests one unit of a natural element from the star.
    pub fn harvest(&mut self, item: Item) -> bool {
        self.star.extract(item)
    }

    fn arena(&self, item: Item) -> Option<&Arena> {
        Some(&self.arenas[item.active_index()?])
    }

    fn arena_mut(&mut self, item: Item) -> Option<&mut Arena> {
        let ix = item.active_index()?;
        Some(&mut self.arenas[ix])
    }

    /// State of `id`; `None` for missing or deleted entities.
    #[must_use]
    pub fn state(&self, id: ImId) -> Option<&ActiveState> {
        self.arena(id.item())?.get(id)
    }

    /// Mutable state of `id`.
    pub fn state_mut(&mut self, id: ImId) -> Option<&mut ActiveState> {
        self.arena_mut(id.item())?.get_mut(id)
    }

    /// Clone of a live state, for inspection.
    #[must_use]
    pub fn copy(&self, id: ImId) -> Option<ActiveState> {
        self.arena(id.item())?.copy(id)
    }

    /// Live-count of `item` in this chunk.
    #[must_use]
    pub fn count(&self, item: Item) -> i64 {
        match item {
            Item::Worker => i64::from(self.workers.count),
            Item::Solar => i64::from(self.energy.solar),
            Item::Battery => i64::from(self.energy.battery),
            Item::Pill => self.pills.len() as i64,
            _ => self.arena(item).map_or(0, |arena| arena.count() as i64),
        }
    }

    /// Highest live id of `item`.
    #[must_use]
    pub fn last(&self, item: Item) -> ImId {
        self.arena(item).map_or(ImId::NIL, Arena::last)
    }

    /// Every live id, arena order then slot order.
    #[must_use]
    pub fn list(&self) -> Vec<ImId> {
        self.arenas.iter().flat_map(Arena::ids).collect()
    }

    /// Schedules creation of `item`. Active kinds defer to the end of
    /// the tick; logistics kinds count immediately.
    pub fn create(&mut self, item: Item) -> bool {
        match item {
            Item::Worker => {
                if self.workers.count == u8::MAX {
                    return false;
                }
                self.workers.count += 1;
                true
            }
            Item::Solar => {
                self.energy.solar += 1;
                true
            }
            Item::Battery => {
                self.energy.battery += 1;
                true
            }
            Item::Pill => self.pills.arrive(Pill::default()),
            _ => match self.arena_mut(item) {
                Some(arena) if arena.can_create() => {
                    arena.create();
                    true
                }
                _ => false,
            },
        }
    }

    /// Deletes a live entity and sweeps its port state.
    pub fn delete(&mut self, id: ImId) -> bool {
        let Some(arena) = self.arena_mut(id.item()) else { return false };
        if !arena.delete(id) {
            return false;
        }
        self.ports_reset(id);
        true
    }

    // -------------------------------------------------------------------------
    // ports
    // -------------------------------------------------------------------------

    /// Ports cell of `id`.
    #[must_use]
    pub fn ports(&self, id: ImId) -> Option<Ports> {
        self.arena(id.item())?.ports(id)
    }

    fn ports_mut(&mut self, id: ImId) -> Option<&mut Ports> {
        self.arena_mut(id.item())?.ports_mut(id)
    }

    /// Offers an item on the output slot; false while the slot is full.
    pub fn ports_produce(&mut self, id: ImId, item: Item) -> bool {
        let Some(ports) = self.ports_mut(id) else { return false };
        if !ports.output.is_nil() {
            return false;
        }
        ports.output = item;
        true
    }

    /// True once the output slot was cleared by a transfer.
    #[must_use]
    pub fn ports_consumed(&self, id: ImId) -> bool {
        self.ports(id).is_some_and(|ports| ports.output.is_nil())
    }

    /// Takes a delivered item off the input slot; nil while empty.
    pub fn ports_consume(&mut self, id: ImId) -> Item {
        let Some(ports) = self.ports_mut(id) else { return Item::Nil };
        if ports.state != PortsState::Received {
            return Item::Nil;
        }
        let item = ports.input;
        ports.input = Item::Nil;
        ports.state = PortsState::Nil;
        item
    }

    /// Requests an item on the input slot; idempotent while requested.
    pub fn ports_request(&mut self, id: ImId, item: Item) {
        let queue = {
            let Some(ports) = self.ports_mut(id) else { return };
            match ports.state {
                PortsState::Nil => {
                    ports.input = item;
                    ports.state = PortsState::Requested;
                    true
                }
                PortsState::Requested => {
                    ports.input = item;
                    false
                }
                PortsState::Received => false,
            }
        };
        if queue {
            self.requested.push(id.to_u16());
        }
    }

    /// Clears both slots and schedules the cleanup sweep for any op in
    /// flight against `id`.
    pub fn ports_reset(&mut self, id: ImId) {
        let Some(ports) = self.ports_mut(id) else { return };
        *ports = Ports::default();
        self.cleanup.push(id.to_u16());
    }

    /// Deterministic producer scan: kind order, then slot order.
    fn find_producer(&self, item: Item) -> ImId {
        for arena in &self.arenas {
            for ix in 0..arena.len() {
                if !arena.live(ix) {
                    continue;
                }
                let id = arena.id_at(ix);
                if arena.ports(id).is_some_and(|ports| ports.output == item) {
                    return id;
                }
            }
        }
        ImId::NIL
    }

    /// The matchmaker: one delivered item per worker per tick.
    fn step_ports(&mut self) {
        self.workers.queue = self.requested.len() as u16;
        self.workers.idle = 0;
        self.workers.fail = 0;
        self.workers.clean = 0;
        self.ops.clear();

        // Cancelled operations sweep first and cost no workers.
        while self.cleanup.pop().is_some() {
            self.workers.clean = self.workers.clean.saturating_add(1);
        }

        let mut budget = self.workers.count;
        let mut retry = Vec::new();
        while budget > 0 {
            let Some(raw) = self.requested.pop() else { break };
            let dst = ImId::from_u16(raw);

            // Reset or deleted since it queued: drop silently.
            let Some(ports) = self.ports(dst) else { continue };
            if ports.state != PortsState::Requested {
                continue;
            }

            let src = self.find_producer(ports.input);
            if src.is_nil() {
                self.workers.fail = self.workers.fail.saturating_add(1);
                retry.push(raw);
                budget -= 1;
                continue;
            }

            // The transfer: out -> in, atomically from the items' view.
            let item = {
                let ports = self.ports_mut(src).expect("live producer");
                std::mem::replace(&mut ports.output, Item::Nil)
            };
            {
                let ports = self.ports_mut(dst).expect("live receiver");
                ports.input = item;
                ports.state = PortsState::Received;
            }
            self.ops.push(workers_op(src, dst));
            budget -= 1;
        }

        self.workers.idle = budget;
        for raw in retry {
            self.requested.push(raw);
        }
    }

    // -------------------------------------------------------------------------
    // lanes
    // -------------------------------------------------------------------------

    /// Registers a transmit listener.
    pub fn lanes_listen(&mut self, id: ImId, src: Coord, chan: u8) {
        let listener = Listener { id, src, chan };
        if !self.listeners.contains(&listener) {
            self.listeners.push(listener);
        }
    }

    /// Removes a transmit listener.
    pub fn lanes_unlisten(&mut self, id: ImId, src: Coord, chan: u8) {
        self.listeners.retain(|l| *l != Listener { id, src, chan });
    }

    /// Queues a landed lane packet for the next step.
    pub fn lanes_arrive(&mut self, item: Item, src: Coord, data: &[Word]) {
        self.arrivals.push(Arrival { item, src, data: data.to_vec() });
    }

    /// Docks a pill matching the filters.
    pub fn pills_dock(&mut self, src: Coord, item: Item) -> Option<Pill> {
        self.pills.dock(src, item)
    }

    /// Returns a pill to the pad.
    pub fn pills_undock(&mut self, pill: Pill) -> bool {
        self.pills.undock(pill)
    }

    /// Landed pill count.
    #[must_use]
    pub fn pills_len(&self) -> usize {
        self.pills.len()
    }

    /// Builds the step/IO context for this chunk.
    pub fn api<'a>(&'a mut self, view: &'a WorldView, fx: &'a mut Effects) -> ChunkApi<'a> {
        ChunkApi { chunk: self, view, fx }
    }

    // -------------------------------------------------------------------------
    // save
    // -------------------------------------------------------------------------

    /// Serialises the chunk.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_magic(Magic::Chunk);
        writer.write_u8(self.owner);
        writer.write_word(self.name);
        self.star.save(writer);
        writer.write_u32(self.updated);

        for arena in &self.arenas {
            arena.save(writer);
        }

        writer.write_ring(&self.requested, |w, v| w.write_u16(*v));
        writer.write_ring(&self.cleanup, |w, v| w.write_u16(*v));

        writer.write_magic(Magic::Workers);
        writer.write_u8(self.workers.count);
        writer.write_u16(self.workers.queue);
        writer.write_u8(self.workers.idle);
        writer.write_u8(self.workers.fail);
        writer.write_u8(self.workers.clean);
        writer.write_u16(self.ops.len() as u16);
        for &op in &self.ops {
            writer.write_u32(op);
        }
        writer.write_magic(Magic::Workers);

        self.energy.save(writer);
        self.log.save(writer);

        writer.write_magic(Magic::Listen);
        writer.write_u16(self.listeners.len() as u16);
        for listener in &self.listeners {
            writer.write_u16(listener.id.to_u16());
            writer.write_u64(listener.src.to_u64());
            writer.write_u8(listener.chan);
        }
        writer.write_magic(Magic::Listen);

        self.pills.save(writer);

        writer.write_u16(self.arrivals.len() as u16);
        for arrival in &self.arrivals {
            writer.write_u8(arrival.item as u8);
            writer.write_u64(arrival.src.to_u64());
            writer.write_u8(arrival.data.len() as u8);
            for &word in &arrival.data {
                writer.write_word(word);
            }
        }

        writer.write_u16(self.launches.len() as u16);
        for launch in &self.launches {
            writer.write_u8(launch.item as u8);
            writer.write_u32(launch.speed);
            writer.write_u64(launch.dst.to_u64());
            writer.write_u8(launch.data.len() as u8);
            for &word in &launch.data {
                writer.write_word(word);
            }
        }

        writer.write_magic(Magic::Chunk);
    }

    /// Emits an incremental frame for a read-only observer: header
    /// state plus the log lines the observer has not acknowledged.
    /// `ack` is the observer's last-seen log cursor pair.
    pub fn save_delta(&self, writer: &mut SaveWriter, ack: (u16, u16)) {
        writer.write_magic(Magic::Delta);
        writer.write_u8(self.owner);
        writer.write_word(self.name);
        writer.write_u32(self.updated);

        writer.write_u8(self.workers.count);
        writer.write_u16(self.workers.queue);
        writer.write_u8(self.workers.idle);
        writer.write_u8(self.workers.fail);
        writer.write_u8(self.workers.clean);

        writer.write_u64(self.energy.current());
        writer.write_u64(self.energy.consumed);
        writer.write_u64(self.energy.produced);

        // Log lines past the acknowledged head; the cursor pair lets the
        // observer resume even across ring wraps.
        let (head, tail) = self.log_cursors();
        let unseen = usize::from(head.wrapping_sub(ack.0)).min(self.log.len());
        let lines: Vec<LogLine> = self.log.iter().collect();
        let fresh = &lines[lines.len() - unseen..];
        writer.write_u16(fresh.len() as u16);
        for line in fresh {
            writer.write_u64(line.star.to_u64());
            writer.write_u32(line.time);
            writer.write_u16(line.id.to_u16());
            writer.write_word(line.key);
            writer.write_word(line.value);
        }
        writer.write_u16(head);
        writer.write_u16(tail);

        writer.write_magic(Magic::Delta);
    }

    /// Applies an incremental frame to this mirror, returning the new
    /// acknowledgement cursor pair.
    pub fn load_delta(&mut self, reader: &mut SaveReader<'_>) -> SaveResult<(u16, u16)> {
        reader.expect_magic(Magic::Delta)?;
        self.owner = reader.read_u8()?;
        self.name = reader.read_word()?;
        self.updated = reader.read_u32()?;

        self.workers.count = reader.read_u8()?;
        self.workers.queue = reader.read_u16()?;
        self.workers.idle = reader.read_u8()?;
        self.workers.fail = reader.read_u8()?;
        self.workers.clean = reader.read_u8()?;

        let _current = reader.read_u64()?;
        self.energy.consumed = reader.read_u64()?;
        self.energy.produced = reader.read_u64()?;

        let fresh = usize::from(reader.read_u16()?);
        for _ in 0..fresh {
            let line = LogLine {
                star: Coord::from_u64(reader.read_u64()?),
                time: reader.read_u32()?,
                id: ImId::from_u16(reader.read_u16()?),
                key: reader.read_word()?,
                value: reader.read_word()?,
            };
            self.log.push(line);
        }
        let ack = (reader.read_u16()?, reader.read_u16()?);

        reader.expect_magic(Magic::Delta)?;
        Ok(ack)
    }

    fn log_cursors(&self) -> (u16, u16) {
        self.log.cursors()
    }

    /// Deserialises a chunk, re-resolving every host cache.
    pub fn load(reader: &mut SaveReader<'_>, view: &WorldView) -> SaveResult<Self> {
        reader.expect_magic(Magic::Chunk)?;
        let owner = reader.read_u8()?;
        let name = reader.read_word()?;
        let star = Star::load(reader)?;
        let updated = reader.read_u32()?;

        let mut chunk = Self::new(star, owner, name);
        chunk.updated = updated;

        for ix in 0..ITEM_ACTIVE_COUNT {
            let item = Item::from_active_index(ix).expect("active index");
            chunk.arenas[ix] = Arena::load(reader, item, view)?;
        }

        chunk.requested = reader.read_ring(SaveReader::read_u16)?;
        chunk.cleanup = reader.read_ring(SaveReader::read_u16)?;

        reader.expect_magic(Magic::Workers)?;
        chunk.workers.count = reader.read_u8()?;
        chunk.workers.queue = reader.read_u16()?;
        chunk.workers.idle = reader.read_u8()?;
        chunk.workers.fail = reader.read_u8()?;
        chunk.workers.clean = reader.read_u8()?;
        let ops_len = usize::from(reader.read_u16()?);
        for _ in 0..ops_len {
            chunk.ops.push(reader.read_u32()?);
        }
        reader.expect_magic(Magic::Workers)?;

        chunk.energy = Energy::load(reader)?;
        chunk.log = Log::load(reader)?;

        reader.expect_magic(Magic::Listen)?;
        let listeners = usize::from(reader.read_u16()?);
        for _ in 0..listeners {
            chunk.listeners.push(Listener {
                id: ImId::from_u16(reader.read_u16()?),
                src: Coord::from_u64(reader.read_u64()?),
                chan: reader.read_u8()?,
            });
        }
        reader.expect_magic(Magic::Listen)?;

        chunk.pills = Pills::load(reader)?;

        let arrivals = usize::from(reader.read_u16()?);
        for _ in 0..arrivals {
            let item = Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil);
            let src = Coord::from_u64(reader.read_u64()?);
            let len = usize::from(reader.read_u8()?);
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(reader.read_word()?);
            }
            chunk.arrivals.push(Arrival { item, src, data });
        }

        let launches = usize::from(reader.read_u16()?);
        for _ in 0..launches {
            let item = Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil);
            let speed = reader.read_u32()?;
            let dst = Coord::from_u64(reader.read_u64()?);
            let len = usize::from(reader.read_u8()?);
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(reader.read_word()?);
            }
            chunk.launches.push(PendingLaunch { item, speed, dst, data });
        }

        reader.expect_magic(Magic::Chunk)?;
        Ok(chunk)
    }
}

// -----------------------------------------------------------------------------
// api
// -----------------------------------------------------------------------------

/// A chunk bound to the per-tick world view and its shard's effect
/// buffer. Machine code only ever sees this.
pub struct ChunkApi<'a> {
    /// The chunk.
    pub chunk: &'a mut Chunk,
    /// Immutable world snapshot for this tick.
    pub view: &'a WorldView,
    /// The shard bus.
    pub fx: &'a mut Effects,
}

impl ChunkApi<'_> {
    /// World time this tick.
    #[inline]
    #[must_use]
    pub fn time(&self) -> WorldTs {
        self.view.time
    }

    /// Tech gate for the chunk's owner.
    #[must_use]
    pub fn known(&self, item: Item) -> bool {
        self.view.tech.known(self.chunk.owner, item)
    }

    /// True once the owner finished researching `item`.
    #[must_use]
    pub fn learned(&self, item: Item) -> bool {
        self.view.tech.known(self.chunk.owner, item)
    }

    /// The owner's learned bits for `item`.
    #[must_use]
    pub fn learned_bits(&self, item: Item) -> u64 {
        self.view
            .tech
            .user(self.chunk.owner)
            .map_or(0, |tech| tech.learned_bits(item))
    }

    /// Emits a learn-bit through the bus; lands next tick.
    pub fn tech_learn_bit(&mut self, item: Item, bit: u8) {
        self.fx.tech_push(self.chunk.owner, item, bit);
    }

    /// Logs to the chunk ring and forwards to the owner's log.
    pub fn log(&mut self, id: ImId, key: Word, value: Word) {
        let line = LogLine {
            star: self.chunk.coord(),
            time: self.view.time,
            id,
            key,
            value,
        };
        self.chunk.log.push(line);
        self.fx.log_push(self.chunk.owner, line);
    }

    /// Queues a lane launch; flushed to the bus at pipeline step 5.
    pub fn lanes_launch(&mut self, item: Item, speed: u32, dst: Coord, data: Vec<Word>) {
        self.chunk.launches.push(PendingLaunch { item, speed, dst, data });
    }

    /// Creates an entity immediately with caller-supplied words; lane
    /// arrivals and unpacking use this.
    pub fn create_from(&mut self, item: Item, data: &[Word]) -> bool {
        let Some(aix) = item.active_index() else { return false };
        let Some(id) = self.chunk.arenas[aix].alloc() else { return false };
        match items::make(self, item, id, data) {
            Some(state) => {
                self.chunk.arenas[aix].put(id, state);
                true
            }
            None => false,
        }
    }

    /// Routes an IO to `dst`. Replies to the user pseudo-item go to the
    /// owner's mailbox; true means the recipient existed.
    pub fn io(&mut self, io: Io, src: ImId, dst: ImId, args: &[Word]) -> bool {
        if dst.item() == Item::User {
            self.fx.user_io_push(self.chunk.owner, io, src, args);
            return true;
        }
        if self.chunk.state(dst).is_none() {
            return false;
        }
        items::io(self, io, src, dst, args);
        true
    }

    fn arrive(&mut self, arrival: Arrival) {
        match arrival.item {
            Item::Data => {
                let Some(&head) = arrival.data.first() else { return };
                let (chan, _) = packet_unpack(head);
                let hits: Vec<ImId> = self
                    .chunk
                    .listeners
                    .iter()
                    .filter(|l| l.src == arrival.src && l.chan == chan)
                    .map(|l| l.id)
                    .collect();
                for id in hits {
                    self.io(Io::Recv, ImId::NIL, id, &arrival.data);
                }
            }

            Item::Pill => {
                let cargo = arrival.data.first().map_or(Cargo::default(), |&w| Cargo::from_word(w));
                if !self.chunk.pills.arrive(Pill { src: arrival.src, cargo }) {
                    self.log(ImId::NIL, Io::Arrive.as_word(), IoErr::OutOfSpace.as_word());
                }
            }

            item if item.is_active() => {
                if !self.create_from(item, &arrival.data) {
                    self.log(ImId::NIL, Io::Arrive.as_word(), IoErr::OutOfSpace.as_word());
                }
            }

            item if item.is_logistics() => {
                if !self.chunk.create(item) {
                    self.log(ImId::NIL, Io::Arrive.as_word(), IoErr::OutOfSpace.as_word());
                }
            }

            _ => {}
        }
    }

    /// Advances the chunk one tick: arrivals, item sweep, matchmaker,
    /// energy, deferred launches, deferred creations.
    pub fn step(&mut self) {
        self.chunk.updated = self.view.time;

        let arrivals = std::mem::take(&mut self.chunk.arrivals);
        for arrival in arrivals {
            self.arrive(arrival);
        }

        for aix in 0..ITEM_ACTIVE_COUNT {
            for ix in 0..self.chunk.arenas[aix].len() {
                if !self.chunk.arenas[aix].live(ix) {
                    continue;
                }
                let id = self.chunk.arenas[aix].id_at(ix);
                items::step(self, id);
            }
        }

        self.chunk.step_ports();

        self.chunk.energy.step(&self.chunk.star);

        let launches = std::mem::take(&mut self.chunk.launches);
        for launch in launches {
            self.fx.lanes_push(&LaunchFx {
                owner: self.chunk.owner,
                item: launch.item,
                speed: launch.speed,
                src: self.chunk.coord(),
                dst: launch.dst,
                data: launch.data,
            });
        }

        for aix in 0..ITEM_ACTIVE_COUNT {
            let (_, missed) = self.chunk.arenas[aix].drain_create();
            for _ in 0..missed {
                let item = Item::from_active_index(aix).expect("active index");
                self.log(
                    ImId::new(item, 0),
                    Io::Step.as_word(),
                    IoErr::OutOfSpace.as_word(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::test_view;

    fn chunk() -> Chunk {
        Chunk::new(Star::barren(Coord::new(100, 100)), 0, 0)
    }

    fn spawn(chunk: &mut Chunk, item: Item) -> ImId {
        let (view, _) = test_view();
        let mut fx = Effects::new();
        assert!(chunk.api(&view, &mut fx).create_from(item, &[]));
        chunk.last(item)
    }

    #[test]
    fn test_create_is_deferred() {
        let (view, _) = test_view();
        let mut fx = Effects::new();
        let mut chunk = chunk();

        assert!(chunk.create(Item::Printer));
        assert_eq!(chunk.count(Item::Printer), 0);

        chunk.api(&view, &mut fx).step();
        assert_eq!(chunk.count(Item::Printer), 1);
        assert!(chunk.state(ImId::new(Item::Printer, 1)).is_some());
    }

    #[test]
    fn test_ports_handshake() {
        let mut chunk = chunk();
        let src = spawn(&mut chunk, Item::Extract);
        let dst = spawn(&mut chunk, Item::Printer);
        chunk.create(Item::Worker);

        assert!(chunk.ports_produce(src, Item::ElemA));
        assert!(!chunk.ports_produce(src, Item::ElemA));
        chunk.ports_request(dst, Item::ElemA);
        assert_eq!(chunk.ports_consume(dst), Item::Nil);

        chunk.step_ports();
        assert_eq!(chunk.ports_consume(dst), Item::ElemA);
        assert!(chunk.ports_consumed(src));
        assert_eq!(chunk.workers().queue, 1);
        assert_eq!(chunk.ops().len(), 1);
        assert_eq!(workers_op_split(chunk.ops()[0]), (src, dst));
    }

    #[test]
    fn test_worker_accounting_invariant() {
        let mut chunk = chunk();
        let dst = spawn(&mut chunk, Item::Printer);
        for _ in 0..3 {
            chunk.create(Item::Worker);
        }

        chunk.ports_request(dst, Item::ElemA);
        chunk.step_ports();

        let workers = chunk.workers();
        let matched = chunk.ops().len() as u8;
        assert_eq!(workers.idle + matched + workers.fail, workers.count);
        assert_eq!(workers.fail, 1);
        assert_eq!(workers.idle, 2);
    }

    #[test]
    fn test_reset_after_request_counts_clean() {
        let mut chunk = chunk();
        let dst = spawn(&mut chunk, Item::Printer);
        chunk.create(Item::Worker);

        chunk.ports_request(dst, Item::ElemA);
        chunk.ports_reset(dst);
        chunk.step_ports();

        let workers = chunk.workers();
        assert_eq!(workers.queue, 1);
        assert_eq!(workers.clean, 1);
        assert_eq!(workers.fail, 0);
        let ports = chunk.ports(dst).unwrap();
        assert_eq!(ports.input, Item::Nil);
        assert_eq!(ports.output, Item::Nil);
        assert_eq!(ports.state, PortsState::Nil);
    }

    #[test]
    fn test_save_round_trip() {
        let (view, _) = test_view();
        let mut fx = Effects::new();
        let mut chunk = chunk();

        let src = spawn(&mut chunk, Item::Extract);
        spawn(&mut chunk, Item::Printer);
        spawn(&mut chunk, Item::Storage);
        chunk.create(Item::Worker);
        chunk.create(Item::Solar);
        chunk.api(&view, &mut fx).step();
        chunk.ports_produce(src, Item::ElemA);
        chunk.api(&view, &mut fx).log(src, 1, 2);
        chunk.lanes_listen(src, Coord::new(7, 7), 3);

        let mut writer = SaveWriter::new();
        chunk.save(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        let loaded = Chunk::load(&mut reader, &view).unwrap();
        assert_eq!(chunk, loaded);
        assert!(reader.is_eof());

        // Byte-stable: saving the loaded chunk yields the same stream.
        let mut again = SaveWriter::new();
        loaded.save(&mut again);
        assert_eq!(again.as_slice(), bytes.as_slice());
    }

    #[test]
    fn test_delta_frames_ship_only_fresh_lines() {
        let (view, _) = test_view();
        let mut fx = Effects::new();
        let mut chunk = chunk();
        let mut mirror = Chunk::new(Star::barren(chunk.coord()), 0, 0);

        let id = spawn(&mut chunk, Item::Memory);
        chunk.api(&view, &mut fx).log(id, 1, 10);
        chunk.api(&view, &mut fx).log(id, 2, 20);

        let mut writer = SaveWriter::new();
        chunk.save_delta(&mut writer, (0, 0));
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        let ack = mirror.load_delta(&mut reader).unwrap();
        assert_eq!(mirror.logs().len(), 2);

        // Nothing new: the next frame carries no lines.
        let mut writer = SaveWriter::new();
        chunk.save_delta(&mut writer, ack);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        let ack = mirror.load_delta(&mut reader).unwrap();
        assert_eq!(mirror.logs().len(), 2);

        // One new line ships exactly once.
        chunk.api(&view, &mut fx).log(id, 3, 30);
        let mut writer = SaveWriter::new();
        chunk.save_delta(&mut writer, ack);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        mirror.load_delta(&mut reader).unwrap();
        assert_eq!(mirror.logs().len(), 3);
        let values: Vec<_> = mirror.logs().iter().map(|line| line.value).collect();
        assert_eq!(values, vec![10, 20, 30]);
    }
}
