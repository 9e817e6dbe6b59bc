//! # Port
//!
//! The pill launcher: docks an incoming pill, unloads cargo it does not
//! want, loads cargo it does, then launches the pill at its target (or
//! back where it came from). Docking and launching each draw a fixed
//! energy cost from the ledger.

use helion_core::coord::Coord;
use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};

use crate::cargo::{Cargo, Pill};
use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, check_known, ActiveState};

/// Pill travel speed.
pub const PORT_LAUNCH_SPEED: u32 = 100;
/// Ledger cost to dock a pill.
pub const PORT_DOCK_ENERGY: u64 = 8;
/// Ledger cost to launch a pill.
pub const PORT_LAUNCH_ENERGY: u64 = 8;

/// Port phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PortState {
    /// Deactivated.
    #[default]
    Idle = 0,
    /// Waiting for a pill to dock.
    Docking = 1,
    /// Pill on the pad, deciding what to do.
    Docked = 2,
    /// Moving wanted cargo in.
    Loading = 3,
    /// Moving unwanted cargo out.
    Unloading = 4,
}

impl PortState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::Docking,
            2 => Self::Docked,
            3 => Self::Loading,
            4 => Self::Unloading,
            _ => Self::Idle,
        }
    }
}

/// Port state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Port {
    /// Own id.
    pub id: ImId,
    /// Phase.
    pub state: PortState,
    /// Launch target; nil sends the pill back to its origin.
    pub target: Coord,
    /// Cargo wanted on board before launching.
    pub want: Cargo,
    /// Cargo currently on board.
    pub has: Cargo,
    /// Docked pill's origin.
    pub origin: Coord,
    /// Dock filter: accepted pill item.
    pub input_item: Item,
    /// Dock filter: accepted pill origin.
    pub input_coord: Coord,
}

impl Port {
    /// Idle port.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    /// Serialises the port.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.state as u8);
        writer.write_u64(self.target.to_u64());
        writer.write_word(self.want.to_word());
        writer.write_word(self.has.to_word());
        writer.write_u64(self.origin.to_u64());
        writer.write_u8(self.input_item as u8);
        writer.write_u64(self.input_coord.to_u64());
    }

    /// Deserialises a port.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            state: PortState::from_u8(reader.read_u8()?),
            target: Coord::from_u64(reader.read_u64()?),
            want: Cargo::from_word(reader.read_word()?),
            has: Cargo::from_word(reader.read_word()?),
            origin: Coord::from_u64(reader.read_u64()?),
            input_item: Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil),
            input_coord: Coord::from_u64(reader.read_u64()?),
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Port> {
    match chunk.state_mut(id)? {
        ActiveState::Port(state) => Some(state),
        _ => None,
    }
}

// -----------------------------------------------------------------------------
// step
// -----------------------------------------------------------------------------

fn step_dock(api: &mut ChunkApi<'_>, id: ImId) {
    if !api.chunk.energy.can_consume(PORT_DOCK_ENERGY) {
        return;
    }

    let Some(port) = get(api.chunk, id) else { return };
    let (src, item) = (port.input_coord, port.input_item);
    let Some(pill) = api.chunk.pills_dock(src, item) else { return };

    api.chunk.energy.consume(PORT_DOCK_ENERGY);
    if let Some(port) = get(api.chunk, id) {
        port.state = PortState::Docked;
        port.origin = pill.src;
        port.has = pill.cargo;
        if port.has.is_empty() {
            port.has.item = port.want.item;
        }
    }
}

fn step_unload(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(port) = get(api.chunk, id) else { return };
    if port.state == PortState::Docked {
        let item = port.has.item;
        port.state = PortState::Unloading;
        api.chunk.ports_produce(id, item);
        return;
    }

    if !api.chunk.ports_consumed(id) {
        return;
    }
    if let Some(port) = get(api.chunk, id) {
        port.state = PortState::Docked;
        port.has.count -= 1;
        if port.has.is_empty() {
            port.has.item = port.want.item;
        }
    }
}

fn step_load(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(port) = get(api.chunk, id) else { return };
    if port.state == PortState::Docked {
        let item = port.want.item;
        port.state = PortState::Loading;
        api.chunk.ports_request(id, item);
        return;
    }

    if api.chunk.ports_consume(id).is_nil() {
        return;
    }
    if let Some(port) = get(api.chunk, id) {
        port.state = PortState::Docked;
        port.has.count += 1;
    }
}

fn step_launch(api: &mut ChunkApi<'_>, id: ImId) {
    if !api.chunk.energy.consume(PORT_LAUNCH_ENERGY) {
        return;
    }

    let Some(port) = get(api.chunk, id) else { return };
    let data = port.has.to_word();
    let dst = if port.target.is_nil() { port.origin } else { port.target };

    port.state = PortState::Docking;
    port.has = Cargo::default();
    port.origin = Coord::nil();

    api.lanes_launch(Item::Pill, PORT_LAUNCH_SPEED, dst, vec![data]);
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(port) = get(api.chunk, id) else { return };
    match port.state {
        PortState::Idle => {}
        PortState::Docking => step_dock(api, id),
        PortState::Loading => step_load(api, id),
        PortState::Unloading => step_unload(api, id),
        PortState::Docked => {
            if port.has.item != port.want.item {
                step_unload(api, id);
            } else if port.has.count < port.want.count {
                step_load(api, id);
            } else {
                step_launch(api, id);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if !check_args(api, id, Io::State, args.len(), 1) {
        return;
    }
    let Some(port) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Target) => port.target.to_u64() as Word,
        Some(Io::Item) => Word::from(port.want.item as u8),
        Some(Io::Loop) => Word::from(port.want.count),
        Some(Io::HasItem) => Word::from(port.has.item as u8),
        Some(Io::HasLoop) => Word::from(port.has.count),
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
    };
    api.io(Io::Return, id, src, &[value]);
}

fn io_reset(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(port) = get(api.chunk, id) else { return };
    let docked = port.state as u8 >= PortState::Docked as u8;
    let pill = Pill { src: port.origin, cargo: port.has };

    if docked {
        api.chunk.ports_reset(id);
        if !api.chunk.pills_undock(pill) {
            api.log(id, Io::Reset.as_word(), IoErr::OutOfSpace.as_word());
        }
    }

    if let Some(port) = get(api.chunk, id) {
        port.state = PortState::Idle;
        port.has = Cargo::default();
        port.origin = Coord::nil();
    }
}

fn io_item(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Item, args.len(), 1) {
        return;
    }

    // Nil clears the manifest: dock, strip, send back.
    let item = if args[0] == 0 { Item::Nil } else { Item::from_word(args[0]) };
    if args[0] != 0 && !Item::validate(args[0]) {
        api.log(id, Io::Item.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    if !item.is_nil() && !check_known(api, id, Io::Item, item) {
        return;
    }

    let count = match args.get(1) {
        Some(&word) if (0..=Word::from(u8::MAX)).contains(&word) => word as u8,
        Some(_) => {
            api.log(id, Io::Item.as_word(), IoErr::A1Invalid.as_word());
            return;
        }
        None => 0,
    };

    if let Some(port) = get(api.chunk, id) {
        port.want.item = item;
        port.want.count = if count == 0 && !item.is_nil() { 1 } else { count };
    }
    api.chunk.ports_reset(id);
}

fn io_target(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Target, args.len(), 1) {
        return;
    }
    // Nil target means "return to sender".
    if let Some(port) = get(api.chunk, id) {
        port.target = Coord::from_word(args[0]);
    }
}

fn io_input(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Input, args.len(), 1) {
        return;
    }

    // Nil accepts any pill.
    let item = if args[0] == 0 { Item::Nil } else { Item::from_word(args[0]) };
    if args[0] != 0 && !Item::validate(args[0]) {
        api.log(id, Io::Input.as_word(), IoErr::A0Invalid.as_word());
        return;
    }

    let coord = args.get(1).map_or(Coord::nil(), |&word| Coord::from_word(word));
    if let Some(port) = get(api.chunk, id) {
        port.input_item = item;
        port.input_coord = coord;
    }
}

fn io_activate(api: &mut ChunkApi<'_>, id: ImId) {
    if let Some(port) = get(api.chunk, id) {
        if port.state == PortState::Idle {
            port.state = PortState::Docking;
        }
    }
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src, args),
        Io::Reset => io_reset(api, dst),
        Io::Item => io_item(api, dst, args),
        Io::Target => io_target(api, dst, args),
        Io::Input => io_input(api, dst, args),
        Io::Activate => io_activate(api, dst),
        _ => {}
    }
}
