//! # Machines
//!
//! One module per active kind. Machine state is a tagged union -
//! [`ActiveState`] - and behavior lives in free functions over
//! `(&mut ChunkApi, ImId)`: a machine re-borrows its own state for each
//! access and never holds the borrow across a call back into the chunk,
//! which keeps A→B→A IO chains (`state` → `return`) sound without any
//! interior mutability.

pub mod brain;
pub mod burner;
pub mod collider;
pub mod fusion;
pub mod lab;
pub mod memory;
pub mod nomad;
pub mod packer;
pub mod port;
pub mod prober;
pub mod receive;
pub mod scanner;
pub mod storage;
pub mod tape_runner;
pub mod test;
pub mod transmit;

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};

use crate::chunk::ChunkApi;
use crate::world::WorldView;

/// Loop counter treated as infinite.
pub const LOOPS_INF: u8 = u8::MAX;

/// Decodes a loops argument: out-of-range words mean "forever".
#[must_use]
pub fn loops_io(word: Word) -> u8 {
    if (1..Word::from(LOOPS_INF)).contains(&word) {
        word as u8
    } else {
        LOOPS_INF
    }
}

/// Per-instance state of an active item. The tag is the kind.
#[derive(Clone, Debug, PartialEq)]
pub enum ActiveState {
    /// Tape runner harvesting from the star.
    Extract(tape_runner::TapeRunner),
    /// Tape runner printing components.
    Printer(tape_runner::TapeRunner),
    /// Tape runner assembling machines.
    Assembly(tape_runner::TapeRunner),
    /// Tape runner condensing heavy elements.
    Condenser(tape_runner::TapeRunner),
    /// Probabilistic synthesiser.
    Collider(collider::Collider),
    /// Fuel-to-energy converter.
    Burner(burner::Burner),
    /// Rod-fed reactor.
    Fusion(fusion::Fusion),
    /// Research machine.
    Lab(lab::Lab),
    /// VM host.
    Brain(Box<brain::Brain>),
    /// Word store with get/set/cas.
    Memory(memory::Memory),
    /// Item buffer.
    Storage(storage::Storage),
    /// Remote item counter.
    Prober(prober::Prober),
    /// Sector/star scanner.
    Scanner(scanner::Scanner),
    /// Data packet emitter.
    Transmit(transmit::Transmit),
    /// Data packet listener.
    Receive(receive::Receive),
    /// Pill launcher.
    Port(port::Port),
    /// Machine-to-item converter.
    Packer(packer::Packer),
    /// Self-launching carrier.
    Nomad(nomad::Nomad),
    /// IO recorder for tests.
    Test(test::Test),
}

/// Initialises a fresh state for `item`. `None` for non-active kinds.
#[must_use]
pub fn spawn(item: Item, id: ImId) -> Option<ActiveState> {
    Some(match item {
        Item::Extract => ActiveState::Extract(tape_runner::TapeRunner::new(id)),
        Item::Printer => ActiveState::Printer(tape_runner::TapeRunner::new(id)),
        Item::Assembly => ActiveState::Assembly(tape_runner::TapeRunner::new(id)),
        Item::Condenser => ActiveState::Condenser(tape_runner::TapeRunner::new(id)),
        Item::Collider => ActiveState::Collider(collider::Collider::new(id)),
        Item::Burner => ActiveState::Burner(burner::Burner::new(id)),
        Item::Fusion => ActiveState::Fusion(fusion::Fusion::new(id)),
        Item::Lab => ActiveState::Lab(lab::Lab::new(id)),
        Item::Brain => ActiveState::Brain(Box::new(brain::Brain::new(id))),
        Item::Memory => ActiveState::Memory(memory::Memory::new(id)),
        Item::Storage => ActiveState::Storage(storage::Storage::new(id)),
        Item::Prober => ActiveState::Prober(prober::Prober::new(id)),
        Item::Scanner => ActiveState::Scanner(scanner::Scanner::new(id)),
        Item::Transmit => ActiveState::Transmit(transmit::Transmit::new(id)),
        Item::Receive => ActiveState::Receive(receive::Receive::new(id)),
        Item::Port => ActiveState::Port(port::Port::new(id)),
        Item::Packer => ActiveState::Packer(packer::Packer::new(id)),
        Item::Nomad => ActiveState::Nomad(nomad::Nomad::new(id)),
        Item::Test => ActiveState::Test(test::Test::new(id)),
        _ => return None,
    })
}

/// Builds a state from a lane payload or caller-supplied words. Kinds
/// without a `make` hook fall back to `spawn`. The nomad hook spawns its
/// cargo, which is why this takes the full chunk API.
pub fn make(api: &mut ChunkApi<'_>, item: Item, id: ImId, data: &[Word]) -> Option<ActiveState> {
    match item {
        Item::Brain => Some(ActiveState::Brain(Box::new(brain::make(api, id, data)))),
        Item::Memory => Some(ActiveState::Memory(memory::make(id, data))),
        Item::Nomad => Some(ActiveState::Nomad(nomad::make(api, id, data))),
        _ => spawn(item, id),
    }
}

/// Re-resolves host-memory caches after a load: packed tape pointers and
/// brain mod handles.
pub fn load_fixup(state: &mut ActiveState, view: &WorldView) {
    match state {
        ActiveState::Extract(runner)
        | ActiveState::Printer(runner)
        | ActiveState::Assembly(runner)
        | ActiveState::Condenser(runner) => tape_runner::load_fixup(runner, view),
        ActiveState::Collider(state) => collider::load_fixup(state, view),
        ActiveState::Brain(state) => brain::load_fixup(state, view),
        _ => {}
    }
}

/// Steps the machine behind `id`.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    match id.item() {
        Item::Extract | Item::Condenser => tape_runner::step(api, id, true),
        Item::Printer | Item::Assembly => tape_runner::step(api, id, false),
        Item::Collider => collider::step(api, id),
        Item::Burner => burner::step(api, id),
        Item::Fusion => fusion::step(api, id),
        Item::Lab => lab::step(api, id),
        Item::Brain => brain::step(api, id),
        Item::Storage => storage::step(api, id),
        Item::Prober => prober::step(api, id),
        Item::Scanner => scanner::step(api, id),
        Item::Port => port::step(api, id),
        Item::Packer => packer::step(api, id),
        Item::Nomad => nomad::step(api, id),
        _ => {}
    }
}

/// Dispatches an IO to the machine behind `dst`. The caller has already
/// checked that `dst` exists; unknown verbs are silently ignored.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match dst.item() {
        Item::Extract | Item::Printer | Item::Assembly | Item::Condenser => {
            tape_runner::io(api, io, src, dst, args);
        }
        Item::Collider => collider::io(api, io, src, dst, args),
        Item::Burner => burner::io(api, io, src, dst, args),
        Item::Fusion => fusion::io(api, io, src, dst, args),
        Item::Lab => lab::io(api, io, src, dst, args),
        Item::Brain => brain::io(api, io, src, dst, args),
        Item::Memory => memory::io(api, io, src, dst, args),
        Item::Storage => storage::io(api, io, src, dst, args),
        Item::Prober => prober::io(api, io, src, dst, args),
        Item::Scanner => scanner::io(api, io, src, dst, args),
        Item::Transmit => transmit::io(api, io, src, dst, args),
        Item::Receive => receive::io(api, io, src, dst, args),
        Item::Port => port::io(api, io, src, dst, args),
        Item::Packer => packer::io(api, io, src, dst, args),
        Item::Nomad => nomad::io(api, io, src, dst, args),
        Item::Test => test::io(api, io, src, dst, args),
        _ => {}
    }
}

/// Serialises one state slot.
pub fn save_state(writer: &mut SaveWriter, state: &ActiveState) {
    match state {
        ActiveState::Extract(runner)
        | ActiveState::Printer(runner)
        | ActiveState::Assembly(runner)
        | ActiveState::Condenser(runner) => runner.save(writer),
        ActiveState::Collider(state) => state.save(writer),
        ActiveState::Burner(state) => state.save(writer),
        ActiveState::Fusion(state) => state.save(writer),
        ActiveState::Lab(state) => state.save(writer),
        ActiveState::Brain(state) => state.save(writer),
        ActiveState::Memory(state) => state.save(writer),
        ActiveState::Storage(state) => state.save(writer),
        ActiveState::Prober(state) => state.save(writer),
        ActiveState::Scanner(state) => state.save(writer),
        ActiveState::Transmit(state) => state.save(writer),
        ActiveState::Receive(state) => state.save(writer),
        ActiveState::Port(state) => state.save(writer),
        ActiveState::Packer(state) => state.save(writer),
        ActiveState::Nomad(state) => state.save(writer),
        ActiveState::Test(state) => state.save(writer),
    }
}

/// Deserialises one state slot of kind `item`.
pub fn load_state(reader: &mut SaveReader<'_>, item: Item) -> SaveResult<ActiveState> {
    Ok(match item {
        Item::Extract => ActiveState::Extract(tape_runner::TapeRunner::load(reader)?),
        Item::Printer => ActiveState::Printer(tape_runner::TapeRunner::load(reader)?),
        Item::Assembly => ActiveState::Assembly(tape_runner::TapeRunner::load(reader)?),
        Item::Condenser => ActiveState::Condenser(tape_runner::TapeRunner::load(reader)?),
        Item::Collider => ActiveState::Collider(collider::Collider::load(reader)?),
        Item::Burner => ActiveState::Burner(burner::Burner::load(reader)?),
        Item::Fusion => ActiveState::Fusion(fusion::Fusion::load(reader)?),
        Item::Lab => ActiveState::Lab(lab::Lab::load(reader)?),
        Item::Brain => ActiveState::Brain(Box::new(brain::Brain::load(reader)?)),
        Item::Memory => ActiveState::Memory(memory::Memory::load(reader)?),
        Item::Storage => ActiveState::Storage(storage::Storage::load(reader)?),
        Item::Prober => ActiveState::Prober(prober::Prober::load(reader)?),
        Item::Scanner => ActiveState::Scanner(scanner::Scanner::load(reader)?),
        Item::Transmit => ActiveState::Transmit(transmit::Transmit::load(reader)?),
        Item::Receive => ActiveState::Receive(receive::Receive::load(reader)?),
        Item::Port => ActiveState::Port(port::Port::load(reader)?),
        Item::Packer => ActiveState::Packer(packer::Packer::load(reader)?),
        Item::Nomad => ActiveState::Nomad(nomad::Nomad::load(reader)?),
        Item::Test => ActiveState::Test(test::Test::load(reader)?),
        _ => {
            return Err(helion_core::save::SaveError::Magic {
                want: 0,
                got: u64::from(item as u8),
                at: reader.pos(),
            })
        }
    })
}

// -----------------------------------------------------------------------------
// flow
// -----------------------------------------------------------------------------

/// A machine's production summary, fed to observers. Mirrors what the
/// machine is currently moving, not how it is implemented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flow {
    /// Reporting machine.
    pub id: ImId,
    /// What the machine is ultimately producing or holding.
    pub target: Item,
    /// The item moving through its port right now, if any.
    pub item: Item,
    /// Remaining loops or stock, whichever the machine counts.
    pub loops: u8,
    /// Crafting depth of the target, for layout ordering.
    pub rank: u8,
}

/// Production summary for one state; `None` when the machine is idle.
#[must_use]
pub fn flow(state: &ActiveState, db: &helion_db::Db) -> Option<Flow> {
    let rank = |item: Item| db.tapes.info(item).map_or(1, |info| info.rank);

    match state {
        ActiveState::Extract(runner)
        | ActiveState::Printer(runner)
        | ActiveState::Assembly(runner)
        | ActiveState::Condenser(runner) => {
            let target = runner.tape.item();
            (!target.is_nil()).then(|| Flow {
                id: runner.id,
                target,
                item: target,
                loops: runner.loops,
                rank: rank(target),
            })
        }

        ActiveState::Collider(collider) => {
            let target = collider.tape.item();
            (!target.is_nil()).then(|| Flow {
                id: collider.id,
                target,
                item: collider.out_item,
                loops: collider.loops,
                rank: rank(target),
            })
        }

        ActiveState::Burner(burner) => (!burner.item.is_nil()).then(|| Flow {
            id: burner.id,
            target: burner.item,
            item: burner.item,
            loops: burner.loops,
            rank: rank(burner.item).saturating_add(1),
        }),

        ActiveState::Fusion(fusion) => (!fusion.paused).then(|| Flow {
            id: fusion.id,
            target: Item::Energy,
            item: if fusion.waiting { crate::items::fusion::FUSION_INPUT_ITEM } else { Item::Nil },
            loops: u8::from(fusion.waiting),
            rank: rank(crate::items::fusion::FUSION_INPUT_ITEM).saturating_add(1),
        }),

        ActiveState::Lab(lab) => (!lab.item.is_nil()).then(|| Flow {
            id: lab.id,
            target: lab.item,
            item: lab.item,
            loops: 0,
            rank: rank(lab.item),
        }),

        ActiveState::Storage(storage) => (!storage.item.is_nil()).then(|| Flow {
            id: storage.id,
            target: storage.item,
            item: storage.item,
            loops: storage.count.min(255) as u8,
            rank: rank(storage.item),
        }),

        ActiveState::Port(port) => {
            (port.state != crate::items::port::PortState::Idle).then(|| Flow {
                id: port.id,
                target: port.want.item,
                item: port.has.item,
                loops: port.want.count,
                rank: rank(port.has.item),
            })
        }

        ActiveState::Packer(packer) => (!packer.item.is_nil()).then(|| Flow {
            id: packer.id,
            target: packer.item,
            item: packer.item,
            loops: packer.loops,
            rank: rank(packer.item).saturating_add(1),
        }),

        ActiveState::Nomad(nomad) => (nomad.op != crate::items::nomad::NomadOp::Nil).then(|| {
            Flow {
                id: nomad.id,
                target: nomad.item,
                item: nomad.item,
                loops: nomad.loops,
                rank: rank(nomad.item).saturating_add(1),
            }
        }),

        _ => None,
    }
}

// -----------------------------------------------------------------------------
// io lists
// -----------------------------------------------------------------------------

/// One entry of a kind's recognised-command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoCmd {
    /// The verb.
    pub io: Io,
    /// Required argument count.
    pub args: u8,
}

const fn cmd(io: Io, args: u8) -> IoCmd {
    IoCmd { io, args }
}

const COMMON_CMDS: [IoCmd; 3] = [cmd(Io::Ping, 0), cmd(Io::State, 1), cmd(Io::Reset, 0)];

/// Commands a kind answers to. Unknown verbs are ignored, so this list
/// is documentation for callers, not an enforcement surface.
#[must_use]
pub fn io_list(item: Item) -> &'static [IoCmd] {
    match item {
        Item::Extract | Item::Printer | Item::Assembly | Item::Condenser => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Tape, 1),
        ] },
        Item::Collider => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Tape, 1),
            cmd(Io::Grow, 1),
        ] },
        Item::Burner => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Item, 1),
        ] },
        Item::Fusion => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Activate, 0),
        ] },
        Item::Lab => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Item, 1),
            cmd(Io::Get, 1),
            cmd(Io::Value, 1),
        ] },
        Item::Brain => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Id, 0),
            cmd(Io::Name, 0),
            cmd(Io::Mod, 1),
            cmd(Io::Tick, 0),
            cmd(Io::Coord, 0),
            cmd(Io::Specs, 1),
            cmd(Io::Log, 2),
            cmd(Io::Send, 1),
            cmd(Io::Recv, 0),
            cmd(Io::DbgAttach, 0),
            cmd(Io::DbgDetach, 0),
            cmd(Io::DbgBreak, 1),
            cmd(Io::DbgStep, 0),
        ] },
        Item::Memory => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Get, 1),
            cmd(Io::Set, 2),
            cmd(Io::Cas, 3),
        ] },
        Item::Storage => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 0),
            cmd(Io::Reset, 0),
            cmd(Io::Item, 1),
        ] },
        Item::Prober => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Probe, 1),
            cmd(Io::Value, 0),
        ] },
        Item::Scanner => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 0),
            cmd(Io::Reset, 0),
            cmd(Io::Scan, 1),
            cmd(Io::Value, 0),
        ] },
        Item::Transmit => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 0),
            cmd(Io::Reset, 0),
            cmd(Io::Channel, 1),
            cmd(Io::Target, 1),
            cmd(Io::Transmit, 1),
        ] },
        Item::Receive => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 0),
            cmd(Io::Reset, 0),
            cmd(Io::Channel, 1),
            cmd(Io::Target, 1),
            cmd(Io::Receive, 0),
        ] },
        Item::Port => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Item, 1),
            cmd(Io::Target, 1),
            cmd(Io::Input, 1),
            cmd(Io::Activate, 0),
        ] },
        Item::Packer => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Id, 1),
            cmd(Io::Item, 1),
        ] },
        Item::Nomad => &const { [
            cmd(Io::Ping, 0),
            cmd(Io::State, 1),
            cmd(Io::Reset, 0),
            cmd(Io::Mod, 1),
            cmd(Io::Get, 1),
            cmd(Io::Set, 2),
            cmd(Io::Pack, 1),
            cmd(Io::Load, 1),
            cmd(Io::Unload, 1),
            cmd(Io::Launch, 1),
        ] },
        Item::Test => &COMMON_CMDS,
        _ => &[],
    }
}

// -----------------------------------------------------------------------------
// shared checks
// -----------------------------------------------------------------------------

/// Arity check; logs `ioe-missing-arg` on failure.
pub fn check_args(api: &mut ChunkApi<'_>, id: ImId, io: Io, len: usize, min: usize) -> bool {
    if len >= min {
        return true;
    }
    api.log(id, io.as_word(), IoErr::MissingArg.as_word());
    false
}

/// Tech gate; logs `ioe-a0-unknown` when the owner has not researched
/// `item`.
pub fn check_known(api: &mut ChunkApi<'_>, id: ImId, io: Io, item: Item) -> bool {
    if api.known(item) {
        return true;
    }
    api.log(id, io.as_word(), IoErr::A0Unknown.as_word());
    false
}
