//! # World
//!
//! The global read model and the tick orchestrator. The world owns
//! everything the chunks must not: the mods registry, the tech tree,
//! lanes, user mailboxes and logs, the generated star map and the shards
//! pool. It is mutated only on the main thread; workers see it through
//! per-tick [`WorldView`] snapshots.
//!
//! Per tick: advance time, resolve last tick's probe/scan registrations,
//! run the exec epoch across the pool, drain each shard's effect buffer
//! in shard index order, then advance the lanes. Given the same save and
//! the same user IO, every tick is byte-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use helion_core::atom::Atoms;
use helion_core::coord::Coord;
use helion_core::rng::SimRng;
use helion_core::save::{Magic, SaveReader, SaveResult, SaveWriter, SAVE_VERSION};
use helion_core::symbol::Symbol;
use helion_core::{UserId, Word, WorldTs, USER_ADMIN};
use helion_db::io::Io;
use helion_db::items::{ImId, Item};
use helion_db::stars::{sector_gen, sector_seed, star_name, Sector};
use helion_db::Db;
use helion_vm::{ModId, Mods};

use crate::chunk::Chunk;
use crate::effects::{Effect, ProbeReg, ScanIt, ScanReg, UserIoPacket};
use crate::lanes::Lanes;
use crate::log::{Log, USER_LOG_CAP};
use crate::pool::{Pool, ShardSlot};
use crate::tech::TechTree;

/// Immutable per-tick snapshot handed to the exec phase.
#[derive(Clone, Debug)]
pub struct WorldView {
    /// World time of the running tick.
    pub time: WorldTs,
    /// Mods registry snapshot.
    pub mods: Arc<Mods>,
    /// Tech tree snapshot.
    pub tech: Arc<TechTree>,
    /// Frozen content tables.
    pub db: Arc<Db>,
}

/// Per-user world-side state.
#[derive(Debug)]
pub struct UserState {
    /// Forwarded log lines.
    pub log: Log,
    /// Pending IO reply; the latest wins.
    pub io: Option<UserIoPacket>,
}

impl Default for UserState {
    fn default() -> Self {
        Self { log: Log::new(USER_LOG_CAP), io: None }
    }
}

/// The world.
#[derive(Debug)]
pub struct World {
    seed: u64,
    time: WorldTs,
    db: Arc<Db>,
    atoms: Atoms,
    mods: Arc<Mods>,
    tech: Arc<TechTree>,
    lanes: Lanes,
    users: BTreeMap<UserId, UserState>,
    sectors: BTreeMap<Coord, Sector>,
    inhabited: BTreeSet<Coord>,
    pool: Pool,
}

impl World {
    /// Fresh world from a seed. `shards` of zero picks the machine's
    /// parallelism.
    pub fn new(seed: u64, shards: usize) -> Result<Self, helion_db::ConfigError> {
        let db = Db::populate()?;
        let mut atoms = Atoms::new();
        db.populate_atoms(&mut atoms);

        let mut tech = TechTree::new();
        tech.learn_all(USER_ADMIN);

        tracing::info!(seed, "world up");
        Ok(Self {
            seed,
            time: 0,
            db: Arc::new(db),
            atoms,
            mods: Arc::new(Mods::new()),
            tech: Arc::new(tech),
            lanes: Lanes::new(),
            users: BTreeMap::new(),
            sectors: BTreeMap::new(),
            inhabited: BTreeSet::new(),
            pool: Pool::new(shards),
        })
    }

    /// World seed.
    #[inline]
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Current world time.
    #[inline]
    #[must_use]
    pub const fn time(&self) -> WorldTs {
        self.time
    }

    /// Frozen content tables.
    #[inline]
    #[must_use]
    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// The atoms registry.
    #[inline]
    #[must_use]
    pub const fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    /// Mutable atoms registry, for user-defined atoms.
    pub fn atoms_mut(&mut self) -> &mut Atoms {
        &mut self.atoms
    }

    /// The mods registry.
    #[inline]
    #[must_use]
    pub fn mods(&self) -> &Mods {
        &self.mods
    }

    /// Registers a new mod. Main thread only; exec phases keep reading
    /// their snapshot.
    pub fn mods_register(
        &mut self,
        code: Vec<u8>,
        symbols: Vec<(Symbol, u32)>,
    ) -> ModId {
        Arc::make_mut(&mut self.mods).register(code, symbols)
    }

    /// The tech tree.
    #[inline]
    #[must_use]
    pub fn tech(&self) -> &TechTree {
        &self.tech
    }

    /// Unlocks everything for `user`; bootstrap and tests.
    pub fn tech_learn_all(&mut self, user: UserId) {
        Arc::make_mut(&mut self.tech).learn_all(user);
    }

    /// In-flight lanes table.
    #[inline]
    #[must_use]
    pub const fn lanes(&self) -> &Lanes {
        &self.lanes
    }

    /// Number of inhabited stars.
    #[must_use]
    pub fn chunks_len(&self) -> usize {
        self.inhabited.len()
    }

    /// Inhabited star coordinates, in deterministic order.
    pub fn chunks(&self) -> impl Iterator<Item = Coord> + '_ {
        self.inhabited.iter().copied()
    }

    /// Builds the snapshot for the running tick.
    #[must_use]
    pub fn view(&self) -> WorldView {
        WorldView {
            time: self.time,
            mods: Arc::clone(&self.mods),
            tech: Arc::clone(&self.tech),
            db: Arc::clone(&self.db),
        }
    }

    /// The generated sector holding `coord`, cached.
    pub fn sector(&mut self, coord: Coord) -> &Sector {
        let origin = coord.sector();
        self.sectors.entry(origin).or_insert_with(|| sector_gen(self.seed, origin))
    }

    /// Per-user state, created on first touch.
    pub fn user_mut(&mut self, user: UserId) -> &mut UserState {
        self.users.entry(user).or_default()
    }

    /// A user's forwarded log, if any lines arrived yet.
    #[must_use]
    pub fn user_log(&self, user: UserId) -> Option<&Log> {
        self.users.get(&user).map(|state| &state.log)
    }

    /// Takes a user's pending IO reply.
    pub fn user_io_take(&mut self, user: UserId) -> Option<UserIoPacket> {
        self.users.get_mut(&user)?.io.take()
    }

    // -------------------------------------------------------------------------
    // chunks
    // -------------------------------------------------------------------------

    /// Claims the star at `coord` for `user`. False when there is no
    /// star there or the star is already claimed.
    pub fn chunk_alloc(&mut self, coord: Coord, user: UserId) -> bool {
        if self.inhabited.contains(&coord) {
            return false;
        }
        let Some(star) = self.sector(coord).star_at(coord).cloned() else {
            return false;
        };

        let mut rng = SimRng::new(sector_seed(self.seed, coord) ^ coord.to_u64());
        let name = self.atoms.make(star_name(&mut rng)) as Word;

        let chunk = Chunk::new(star, user, name);
        self.pool.slot(coord).shard.lock().register(chunk);
        self.inhabited.insert(coord);
        self.user_mut(user);
        true
    }

    /// Runs `f` against the chunk at `coord`.
    pub fn chunk<R>(&self, coord: Coord, f: impl FnOnce(&Chunk) -> R) -> Option<R> {
        let slot = self.pool.slot(coord);
        let shard = slot.shard.lock();
        shard.chunk(coord).map(f)
    }

    /// Runs `f` against the mutable chunk at `coord`. Main thread only,
    /// between epochs.
    pub fn chunk_mut<R>(&self, coord: Coord, f: impl FnOnce(&mut Chunk) -> R) -> Option<R> {
        let slot = self.pool.slot(coord);
        let mut shard = slot.shard.lock();
        shard.chunk_mut(coord).map(f)
    }

    /// Routes a user-side IO into a chunk. Effects land in the owning
    /// shard's buffer and apply at the end of the next tick.
    pub fn chunk_io(&self, coord: Coord, io: Io, src: ImId, dst: ImId, args: &[Word]) -> bool {
        let view = self.view();
        let slot = self.pool.slot(coord);
        let mut shard = slot.shard.lock();
        shard.chunk_io(coord, &view, io, src, dst, args)
    }

    /// Schedules creation of `item` in a chunk.
    pub fn chunk_create(&self, coord: Coord, item: Item) -> bool {
        self.chunk_mut(coord, |chunk| chunk.create(item)).unwrap_or(false)
    }

    /// Creates an entity with caller-supplied words in a chunk.
    pub fn chunk_create_from(&self, coord: Coord, item: Item, data: &[Word]) -> bool {
        let view = self.view();
        let slot = self.pool.slot(coord);
        let mut shard = slot.shard.lock();
        shard.chunk_create_from(coord, &view, item, data)
    }

    /// Injects a lane arrival directly; tests and bootstrap.
    pub fn lanes_arrive(&self, coord: Coord, item: Item, src: Coord, data: &[Word]) {
        let _ = self.chunk_mut(coord, |chunk| chunk.lanes_arrive(item, src, data));
    }

    // -------------------------------------------------------------------------
    // read model
    // -------------------------------------------------------------------------

    /// Counts `item` at `coord`: -1 for an uninhabited star.
    pub fn probe(&mut self, coord: Coord, item: Item) -> Word {
        if !self.inhabited.contains(&coord) {
            return -1;
        }
        self.chunk(coord, |chunk| chunk.count(item)).unwrap_or(-1)
    }

    /// Resolves a wide-scan cursor: the n-th inhabited star of the
    /// sector, nil once exhausted.
    pub fn scan(&mut self, it: ScanIt) -> Coord {
        let stars: Vec<Coord> =
            self.sector(it.sector).stars.iter().map(|star| star.coord).collect();
        stars
            .into_iter()
            .filter(|coord| self.inhabited.contains(coord))
            .nth(usize::from(it.index))
            .unwrap_or(Coord::nil())
    }

    // -------------------------------------------------------------------------
    // step
    // -------------------------------------------------------------------------

    /// Advances the world one tick.
    pub fn step(&mut self) {
        self.time += 1;
        let view = self.view();
        let slots: Vec<Arc<ShardSlot>> = self.pool.slots().to_vec();

        // begin: resolve last tick's registrations against the world as
        // of the start of this tick, install fresh views.
        for slot in &slots {
            let (probes, scans) = slot.shard.lock().effects_mut().take_regs();
            let probes: Vec<ProbeReg> = probes
                .into_iter()
                .map(|mut probe| {
                    probe.value = Some(self.probe(probe.dst, probe.item));
                    probe
                })
                .collect();
            let scans: Vec<ScanReg> = scans
                .into_iter()
                .map(|mut scan| {
                    scan.value = Some(self.scan(scan.it));
                    scan
                })
                .collect();

            let mut shard = slot.shard.lock();
            shard.effects_mut().install_regs(probes, scans);
            *slot.view.lock() = Some(view.clone());
        }

        // exec: parallel across the pool.
        self.pool.run_epoch();

        // end: apply effects per shard, in shard index order.
        for slot in &slots {
            let drained = slot.shard.lock().effects_mut().drain();
            let effects = match drained {
                Ok(effects) => effects,
                Err(err) => {
                    tracing::error!(?err, "corrupt shard bus, effects dropped");
                    debug_assert!(false, "corrupt shard bus");
                    continue;
                }
            };

            for effect in effects {
                match effect {
                    Effect::UserIo { user, packet } => {
                        self.user_mut(user).io = Some(packet);
                    }
                    Effect::Log { user, line } => {
                        self.user_mut(user).log.push(line);
                    }
                    Effect::Tech { user, item, bit } => {
                        Arc::make_mut(&mut self.tech).learn_bit(user, item, bit);
                    }
                    Effect::Lanes(launch) => {
                        self.lanes.launch(
                            self.time,
                            launch.owner,
                            launch.item,
                            launch.speed,
                            launch.src,
                            launch.dst,
                            launch.data,
                        );
                    }
                    effect @ (Effect::Probe(_) | Effect::Scan(_)) => {
                        slot.shard.lock().effects_mut().register(&effect);
                    }
                }
            }
        }

        // lanes: deliver due packets into arrival queues for next tick.
        for packet in self.lanes.step(self.time) {
            if !self.inhabited.contains(&packet.dst) {
                continue;
            }
            let _ = self.chunk_mut(packet.dst, |chunk| {
                chunk.lanes_arrive(packet.item, packet.src, &packet.data);
            });
        }
    }

    // -------------------------------------------------------------------------
    // save
    // -------------------------------------------------------------------------

    /// Serialises the world into a sealed stream.
    #[must_use]
    pub fn save(&self) -> Vec<u8> {
        let mut writer = SaveWriter::with_header(SAVE_VERSION);
        writer.write_magic(Magic::World);

        writer.write_u64(self.seed);
        writer.write_u32(self.time);
        writer.write_u16(self.pool.len() as u16);

        writer.write_magic(Magic::Atoms);
        writer.write_u32(self.atoms.len() as u32);
        for (id, sym) in self.atoms.iter() {
            writer.write_u64(id);
            writer.write_symbol(sym);
        }
        writer.write_u64(self.atoms.next_id());
        writer.write_magic(Magic::Atoms);

        self.mods.save(&mut writer);
        self.tech.save(&mut writer);
        self.lanes.save(&mut writer);

        writer.write_magic(Magic::User);
        writer.write_u16(self.users.len() as u16);
        for (&user, state) in &self.users {
            writer.write_u8(user);
            state.log.save(&mut writer);
            match &state.io {
                Some(packet) => {
                    writer.write_u8(1);
                    writer.write_word(packet.io.as_word());
                    writer.write_u16(packet.src.to_u16());
                    writer.write_u8(packet.args.len() as u8);
                    for &arg in &packet.args {
                        writer.write_word(arg);
                    }
                }
                None => writer.write_u8(0),
            }
        }
        writer.write_magic(Magic::User);

        writer.write_u32(self.inhabited.len() as u32);
        for &coord in &self.inhabited {
            let _ = self.chunk(coord, |chunk| chunk.save(&mut writer));
        }

        writer.write_magic(Magic::World);
        writer.seal();
        writer.into_bytes()
    }

    /// Rebuilds a world from a sealed stream.
    pub fn load(bytes: &[u8]) -> SaveResult<Self> {
        let (mut reader, _version) = SaveReader::with_header(bytes)?;
        reader.expect_magic(Magic::World)?;

        let seed = reader.read_u64()?;
        let time = reader.read_u32()?;
        let shards = usize::from(reader.read_u16()?);

        let mut world = Self::new(seed, shards).map_err(|err| {
            tracing::error!(?err, "content tables failed during load");
            helion_core::save::SaveError::Version(SAVE_VERSION)
        })?;
        world.time = time;

        reader.expect_magic(Magic::Atoms)?;
        let atom_count = reader.read_u32()?;
        let mut bindings = Vec::with_capacity(atom_count as usize);
        for _ in 0..atom_count {
            let id = reader.read_u64()?;
            let sym = reader.read_symbol()?;
            bindings.push((id, sym));
        }
        let next = reader.read_u64()?;
        reader.expect_magic(Magic::Atoms)?;
        world.atoms = Atoms::from_parts(bindings, next);

        world.mods = Arc::new(Mods::load(&mut reader)?);
        world.tech = Arc::new(TechTree::load(&mut reader)?);
        world.lanes = Lanes::load(&mut reader)?;

        reader.expect_magic(Magic::User)?;
        let users = usize::from(reader.read_u16()?);
        for _ in 0..users {
            let user = reader.read_u8()?;
            let log = Log::load(&mut reader)?;
            let io = if reader.read_u8()? != 0 {
                let io = Io::from_word(reader.read_word()?).unwrap_or(Io::Nil);
                let src = ImId::from_u16(reader.read_u16()?);
                let len = usize::from(reader.read_u8()?);
                let mut args = Vec::with_capacity(len);
                for _ in 0..len {
                    args.push(reader.read_word()?);
                }
                Some(UserIoPacket { io, src, args })
            } else {
                None
            };
            world.users.insert(user, UserState { log, io });
        }
        reader.expect_magic(Magic::User)?;

        let view = world.view();
        let chunks = reader.read_u32()?;
        for _ in 0..chunks {
            let chunk = Chunk::load(&mut reader, &view)?;
            let coord = chunk.coord();
            world.pool.slot(coord).shard.lock().register(chunk);
            world.inhabited.insert(coord);
        }

        reader.expect_magic(Magic::World)?;
        tracing::info!(time, chunks, "world loaded");
        Ok(world)
    }
}

/// Test fixture: a standalone view over fresh content tables, everything
/// researched for the admin user.
#[doc(hidden)]
#[must_use]
pub fn test_view() -> (WorldView, Arc<Db>) {
    let db = Arc::new(Db::populate().expect("content tables"));
    let mut tech = TechTree::new();
    tech.learn_all(USER_ADMIN);
    let view = WorldView {
        time: 0,
        mods: Arc::new(Mods::new()),
        tech: Arc::new(tech),
        db: Arc::clone(&db),
    };
    (view, db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_alloc_requires_star() {
        let mut world = World::new(42, 1).unwrap();
        let star = world.sector(Coord::center()).stars[0].coord;

        assert!(world.chunk_alloc(star, USER_ADMIN));
        assert!(!world.chunk_alloc(star, USER_ADMIN));
        assert!(!world.chunk_alloc(Coord::new(3, 3), USER_ADMIN));
        assert_eq!(world.chunks_len(), 1);
        assert_eq!(world.probe(star, Item::Worker), 0);
        assert_eq!(world.probe(Coord::new(3, 3), Item::Worker), -1);
    }

    #[test]
    fn test_scan_walks_inhabited() {
        let mut world = World::new(7, 2).unwrap();
        let stars: Vec<Coord> =
            world.sector(Coord::center()).stars.iter().map(|s| s.coord).collect();
        world.chunk_alloc(stars[1], USER_ADMIN);
        world.chunk_alloc(stars[3], USER_ADMIN);

        let it = ScanIt::new(Coord::center());
        assert_eq!(world.scan(it), stars[1]);
        assert_eq!(world.scan(it.next()), stars[3]);
        assert_eq!(world.scan(it.next().next()), Coord::nil());
    }

    #[test]
    fn test_step_advances_time() {
        let mut world = World::new(1, 2).unwrap();
        let star = world.sector(Coord::center()).stars[0].coord;
        world.chunk_alloc(star, USER_ADMIN);

        for _ in 0..5 {
            world.step();
        }
        assert_eq!(world.time(), 5);
        assert_eq!(world.chunk(star, Chunk::updated), Some(5));
    }

    #[test]
    fn test_save_round_trip() {
        let mut world = World::new(99, 2).unwrap();
        let stars: Vec<Coord> =
            world.sector(Coord::center()).stars.iter().map(|s| s.coord).collect();
        world.chunk_alloc(stars[0], USER_ADMIN);
        world.chunk_alloc(stars[1], USER_ADMIN);
        world.chunk_create(stars[0], Item::Extract);
        world.chunk_create(stars[0], Item::Worker);
        for _ in 0..10 {
            world.step();
        }

        let saved = world.save();
        let loaded = World::load(&saved).unwrap();
        assert_eq!(loaded.save(), saved);
    }
}
