//! # Nomad
//!
//! A self-launching carrier: packs local machines into an internal
//! inventory, loads and unloads stacks through its port, and can launch
//! itself - inventory, mod word and memory included - as a lane packet.
//! On arrival the cargo unpacks in slot order, one item at a time; cargo
//! that does not fit the destination is logged and lost.
//!
//! The nomad doubles as a packer because nothing else could pack the
//! nomad itself, and the brain it carries has to be re-seeded on arrival.

use helion_core::coord::Coord;
use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};
use helion_vm::ModId;

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, check_known, loops_io, ActiveState, LOOPS_INF};

/// Distinct cargo slots.
pub const NOMAD_CARGO_LEN: usize = 12;
/// Stack cap per slot.
pub const NOMAD_CARGO_MAX: u8 = u8::MAX;
/// User memory words carried across launches.
pub const NOMAD_MEMORY_LEN: usize = 3;
/// Launch travel speed.
pub const NOMAD_SPEED: u32 = 50;

/// Cargo slots packed per payload word.
const DATA_CARGO: usize = 4;
/// Launch payload length: mod + memory + packed cargo.
pub const NOMAD_DATA_LEN: usize = 1 + NOMAD_MEMORY_LEN + NOMAD_CARGO_LEN / DATA_CARGO;

/// Nomad port phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum NomadOp {
    /// Idle.
    #[default]
    Nil = 0,
    /// Deleting local entities into the inventory.
    Pack = 1,
    /// Consuming from the port into the inventory.
    Load = 2,
    /// Producing from the inventory onto the port.
    Unload = 3,
}

impl NomadOp {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::Pack,
            2 => Self::Load,
            3 => Self::Unload,
            _ => Self::Nil,
        }
    }
}

/// One inventory slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NomadCargo {
    /// Stacked kind; nil marks a free slot.
    pub item: Item,
    /// Stack size.
    pub count: u8,
}

/// Nomad state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Nomad {
    /// Own id.
    pub id: ImId,
    /// Port phase.
    pub op: NomadOp,
    /// Kind the current operation moves.
    pub item: Item,
    /// Remaining operation loops.
    pub loops: u8,
    /// Waiting on a port handshake.
    pub waiting: bool,
    /// Mod handed to a carried brain on arrival.
    pub mod_id: ModId,
    /// User memory words.
    pub memory: [Word; NOMAD_MEMORY_LEN],
    /// Inventory.
    pub cargo: [NomadCargo; NOMAD_CARGO_LEN],
}

impl Nomad {
    /// Empty nomad.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    fn cargo_slot(&mut self, item: Item) -> Option<&mut NomadCargo> {
        self.cargo
            .iter_mut()
            .find(|slot| slot.item.is_nil() || slot.item == item)
    }

    fn cargo_stack(&mut self, item: Item) -> Option<&mut NomadCargo> {
        self.cargo.iter_mut().find(|slot| slot.item == item)
    }

    fn cargo_count(&self) -> usize {
        self.cargo.iter().filter(|slot| !slot.item.is_nil()).count()
    }

    fn encode_cargo(&self, ix: usize) -> Word {
        let mut word = 0u64;
        for off in 0..DATA_CARGO {
            let slot = self.cargo[ix * DATA_CARGO + off];
            let pair = u64::from(slot.item as u8) | (u64::from(slot.count) << 8);
            word |= pair << (off * 16);
        }
        word as Word
    }

    fn decode_cargo(&mut self, ix: usize, word: Word) {
        for off in 0..DATA_CARGO {
            let pair = (word as u64 >> (off * 16)) & 0xFFFF;
            self.cargo[ix * DATA_CARGO + off] = NomadCargo {
                item: Item::from_u8(pair as u8).unwrap_or(Item::Nil),
                count: (pair >> 8) as u8,
            };
        }
    }

    /// Serialises the nomad.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.op as u8);
        writer.write_u8(self.item as u8);
        writer.write_u8(self.loops);
        writer.write_u8(u8::from(self.waiting));
        writer.write_u32(self.mod_id.to_u32());
        for &word in &self.memory {
            writer.write_word(word);
        }
        for ix in 0..NOMAD_CARGO_LEN / DATA_CARGO {
            writer.write_word(self.encode_cargo(ix));
        }
    }

    /// Deserialises a nomad.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        let mut nomad = Self::new(ImId::from_u16(reader.read_u16()?));
        nomad.op = NomadOp::from_u8(reader.read_u8()?);
        nomad.item = Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil);
        nomad.loops = reader.read_u8()?;
        nomad.waiting = reader.read_u8()? != 0;
        nomad.mod_id = ModId::from_u32(reader.read_u32()?);
        for word in &mut nomad.memory {
            *word = reader.read_word()?;
        }
        for ix in 0..NOMAD_CARGO_LEN / DATA_CARGO {
            let word = reader.read_word()?;
            nomad.decode_cargo(ix, word);
        }
        Ok(nomad)
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Nomad> {
    match chunk.state_mut(id)? {
        ActiveState::Nomad(state) => Some(state),
        _ => None,
    }
}

fn port_reset(api: &mut ChunkApi<'_>, id: ImId) {
    api.chunk.ports_reset(id);
    if let Some(nomad) = get(api.chunk, id) {
        nomad.op = NomadOp::Nil;
        nomad.item = Item::Nil;
        nomad.loops = 0;
        nomad.waiting = false;
    }
}

fn port_setup(api: &mut ChunkApi<'_>, id: ImId, op: NomadOp, item: Item, loops: u8) {
    api.chunk.ports_reset(id);
    if let Some(nomad) = get(api.chunk, id) {
        nomad.op = op;
        nomad.item = item;
        nomad.loops = loops;
        nomad.waiting = false;
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    port_reset(api, id);
    if let Some(nomad) = get(api.chunk, id) {
        nomad.mod_id = ModId::NIL;
        nomad.memory = [0; NOMAD_MEMORY_LEN];
        nomad.cargo = [NomadCargo::default(); NOMAD_CARGO_LEN];
    }
}

/// Spawns the carried state on arrival: cargo in slot order, the mod
/// seeding the first brain out.
pub fn make(api: &mut ChunkApi<'_>, id: ImId, data: &[Word]) -> Nomad {
    let mut nomad = Nomad::new(id);
    if data.len() < NOMAD_DATA_LEN {
        return nomad;
    }

    nomad.mod_id = if ModId::validate(data[0]) {
        ModId::from_u32(data[0] as u32)
    } else {
        ModId::NIL
    };
    nomad.memory.copy_from_slice(&data[1..=NOMAD_MEMORY_LEN]);
    for ix in 0..NOMAD_CARGO_LEN / DATA_CARGO {
        nomad.decode_cargo(ix, data[1 + NOMAD_MEMORY_LEN + ix]);
    }

    let mut mod_word = Word::from(nomad.mod_id.to_u32());
    for ix in 0..NOMAD_CARGO_LEN {
        while nomad.cargo[ix].count > 0 {
            let item = nomad.cargo[ix].item;
            let ok = match item {
                Item::Brain => {
                    let args = [mod_word];
                    let args = if mod_word != 0 { &args[..] } else { &[] };
                    let ok = api.create_from(Item::Brain, args);
                    if ok {
                        mod_word = 0;
                    }
                    ok
                }
                _ => api.chunk.create(item),
            };

            if !ok {
                api.log(id, Io::Arrive.as_word(), IoErr::OutOfSpace.as_word());
            }

            nomad.cargo[ix].count -= 1;
        }
        nomad.cargo[ix].item = Item::Nil;
    }

    nomad
}

// -----------------------------------------------------------------------------
// step
// -----------------------------------------------------------------------------

fn step_done(api: &mut ChunkApi<'_>, id: ImId) {
    if let Some(nomad) = get(api.chunk, id) {
        nomad.loops = nomad.loops.saturating_sub(1);
        if nomad.loops == 0 {
            port_reset(api, id);
        }
    }
}

fn step_pack(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(nomad) = get(api.chunk, id) else { return };
    let item = nomad.item;

    let target = api.chunk.last(item);
    if target.is_nil() {
        port_reset(api, id);
        return;
    }

    let ok = api.chunk.delete(target);
    debug_assert!(ok);

    if let Some(nomad) = get(api.chunk, id) {
        if let Some(slot) = nomad.cargo_slot(item) {
            slot.item = item;
            slot.count = slot.count.saturating_add(1);
        }
    }
    step_done(api, id);
}

fn step_load(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(nomad) = get(api.chunk, id) else { return };
    if !nomad.waiting {
        let item = nomad.item;
        nomad.waiting = true;
        api.chunk.ports_request(id, item);
        return;
    }

    if api.chunk.ports_consume(id).is_nil() {
        return;
    }

    if let Some(nomad) = get(api.chunk, id) {
        nomad.waiting = false;
        let item = nomad.item;
        if let Some(slot) = nomad.cargo_slot(item) {
            slot.item = item;
            slot.count = slot.count.saturating_add(1);
        }
    }
    step_done(api, id);
}

fn step_unload(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(nomad) = get(api.chunk, id) else { return };
    if !nomad.waiting {
        let item = nomad.item;
        nomad.waiting = true;
        api.chunk.ports_produce(id, item);
        return;
    }

    if !api.chunk.ports_consumed(id) {
        return;
    }

    if let Some(nomad) = get(api.chunk, id) {
        nomad.waiting = false;
        let item = nomad.item;
        if let Some(slot) = nomad.cargo_stack(item) {
            slot.count = slot.count.saturating_sub(1);
            if slot.count == 0 {
                slot.item = Item::Nil;
            }
        }
    }
    step_done(api, id);
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(nomad) = get(api.chunk, id) else { return };
    match nomad.op {
        NomadOp::Nil => {}
        NomadOp::Pack => step_pack(api, id),
        NomadOp::Load => step_load(api, id),
        NomadOp::Unload => step_unload(api, id),
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if !check_args(api, id, Io::State, args.len(), 1) {
        return;
    }

    let Some(nomad) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Mod) => Word::from(nomad.mod_id.to_u32()),
        Some(Io::Item) => Word::from(nomad.item as u8),
        Some(Io::Loop) => Word::from(nomad.loops),
        Some(Io::Cargo) => match args.get(1) {
            None => nomad.cargo_count() as Word,
            Some(&word) if Item::validate(word) => {
                let item = Item::from_word(word);
                nomad.cargo_stack(item).map_or(0, |slot| Word::from(slot.count))
            }
            Some(_) => {
                api.log(id, Io::State.as_word(), IoErr::A1Invalid.as_word());
                0
            }
        },
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
    };
    api.io(Io::Return, id, src, &[value]);
}

/// Validates a pack/load/unload item argument.
fn check_cargo_item(api: &mut ChunkApi<'_>, id: ImId, io: Io, args: &[Word]) -> Option<Item> {
    if !check_args(api, id, io, args.len(), 1) {
        return None;
    }
    if !Item::validate(args[0]) {
        api.log(id, io.as_word(), IoErr::A0Invalid.as_word());
        return None;
    }
    let item = Item::from_word(args[0]);
    if !item.is_active() && !item.is_logistics() {
        api.log(id, io.as_word(), IoErr::A0Invalid.as_word());
        return None;
    }
    if !check_known(api, id, io, item) {
        return None;
    }
    Some(item)
}

fn io_pack(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    let Some(item) = check_cargo_item(api, id, Io::Pack, args) else { return };

    let room = match get(api.chunk, id).and_then(|nomad| nomad.cargo_slot(item).copied()) {
        Some(slot) => NOMAD_CARGO_MAX - slot.count,
        None => {
            api.log(id, Io::Pack.as_word(), IoErr::OutOfSpace.as_word());
            return;
        }
    };

    let loops = loops_io(args.get(1).copied().unwrap_or(Word::from(LOOPS_INF))).min(room);
    if loops == 0 {
        api.log(id, Io::Pack.as_word(), IoErr::OutOfSpace.as_word());
        return;
    }
    port_setup(api, id, NomadOp::Pack, item, loops);
}

fn io_load(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    let Some(item) = check_cargo_item(api, id, Io::Load, args) else { return };

    let room = match get(api.chunk, id).and_then(|nomad| nomad.cargo_slot(item).copied()) {
        Some(slot) => NOMAD_CARGO_MAX - slot.count,
        None => {
            api.log(id, Io::Load.as_word(), IoErr::OutOfSpace.as_word());
            return;
        }
    };

    let loops = loops_io(args.get(1).copied().unwrap_or(Word::from(LOOPS_INF))).min(room);
    if loops == 0 {
        api.log(id, Io::Load.as_word(), IoErr::OutOfSpace.as_word());
        return;
    }
    port_setup(api, id, NomadOp::Load, item, loops);
}

fn io_unload(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    let Some(item) = check_cargo_item(api, id, Io::Unload, args) else { return };

    let count = match get(api.chunk, id).and_then(|nomad| nomad.cargo_stack(item).copied()) {
        Some(slot) => slot.count,
        None => {
            api.log(id, Io::Unload.as_word(), IoErr::A0Invalid.as_word());
            return;
        }
    };
    port_setup(api, id, NomadOp::Unload, item, count);
}

fn io_mod(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Mod, args.len(), 1) {
        return;
    }
    if !ModId::validate(args[0]) {
        api.log(id, Io::Mod.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    if let Some(nomad) = get(api.chunk, id) {
        nomad.mod_id = ModId::from_u32(args[0] as u32);
    }
}

fn io_get(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    let value = 'value: {
        if !check_args(api, id, Io::Get, args.len(), 1) {
            break 'value 0;
        }
        if !(0..NOMAD_MEMORY_LEN as Word).contains(&args[0]) {
            api.log(id, Io::Get.as_word(), IoErr::A0Invalid.as_word());
            break 'value 0;
        }
        get(api.chunk, id).map_or(0, |nomad| nomad.memory[args[0] as usize])
    };
    api.io(Io::Return, id, src, &[value]);
}

fn io_set(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Set, args.len(), 2) {
        return;
    }
    if !(0..NOMAD_MEMORY_LEN as Word).contains(&args[0]) {
        api.log(id, Io::Set.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    if let Some(nomad) = get(api.chunk, id) {
        nomad.memory[args[0] as usize] = args[1];
    }
}

fn io_launch(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Launch, args.len(), 1) {
        return;
    }
    if !Coord::validate(args[0]) {
        api.log(id, Io::Launch.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    let dst = Coord::from_word(args[0]);

    // A brain cannot be packed and still issue the launch, so the launch
    // optionally packs one last id on the way out.
    if args.len() > 1 {
        if !ImId::validate(args[1]) {
            api.log(id, Io::Launch.as_word(), IoErr::A1Invalid.as_word());
            return;
        }
        let target = ImId::from_word(args[1]);
        let item = target.item();

        if !item.is_active() && !item.is_logistics() {
            api.log(id, Io::Launch.as_word(), IoErr::A1Invalid.as_word());
            return;
        }
        if !check_known(api, id, Io::Launch, item) {
            return;
        }

        let full = get(api.chunk, id)
            .and_then(|nomad| nomad.cargo_slot(item).copied())
            .map_or(true, |slot| slot.count == NOMAD_CARGO_MAX);
        if full {
            api.log(id, Io::Launch.as_word(), IoErr::OutOfSpace.as_word());
            return;
        }
        if !api.chunk.delete(target) {
            api.log(id, Io::Launch.as_word(), IoErr::A1Invalid.as_word());
            return;
        }
        if let Some(nomad) = get(api.chunk, id) {
            if let Some(slot) = nomad.cargo_slot(item) {
                slot.item = item;
                slot.count = slot.count.saturating_add(1);
            }
        }
    }

    let Some(nomad) = get(api.chunk, id) else { return };
    let mut data = Vec::with_capacity(NOMAD_DATA_LEN);
    data.push(Word::from(nomad.mod_id.to_u32()));
    data.extend_from_slice(&nomad.memory);
    for ix in 0..NOMAD_CARGO_LEN / DATA_CARGO {
        data.push(nomad.encode_cargo(ix));
    }

    api.lanes_launch(Item::Nomad, NOMAD_SPEED, dst, data);
    api.chunk.delete(id);
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src, args),
        Io::Reset => reset(api, dst),
        Io::Mod => io_mod(api, dst, args),
        Io::Get => io_get(api, dst, src, args),
        Io::Set => io_set(api, dst, args),
        Io::Pack => io_pack(api, dst, args),
        Io::Load => io_load(api, dst, args),
        Io::Unload => io_unload(api, dst, args),
        Io::Launch => io_launch(api, dst, args),
        _ => {}
    }
}
