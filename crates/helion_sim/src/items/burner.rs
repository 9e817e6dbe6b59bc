//! # Burner
//!
//! Converts one fuel item into a burst of ledger energy. The burst size
//! is a game rule: the sum of the element codes in the fuel's recipe,
//! elem-o folded into elem-m; the burn length grows with the log of the
//! recipe's total element count.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};
use helion_db::specs::{burner_energy, burner_work_cap};

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, check_known, loops_io, ActiveState, LOOPS_INF};

/// Burner phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum BurnerOp {
    /// Unconfigured.
    #[default]
    Nil = 0,
    /// Requesting fuel.
    In = 1,
    /// Burning.
    Work = 2,
}

impl BurnerOp {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::In,
            2 => Self::Work,
            _ => Self::Nil,
        }
    }
}

/// Burner state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Burner {
    /// Own id.
    pub id: ImId,
    /// Configured fuel.
    pub item: Item,
    /// Phase.
    pub op: BurnerOp,
    /// Remaining loops.
    pub loops: u8,
    /// Waiting on the input port.
    pub waiting: bool,
    /// Burn ticks left / per item.
    pub work_left: u8,
    /// Burn ticks per item.
    pub work_cap: u8,
    /// Energy produced per burn tick.
    pub output: u64,
}

impl Burner {
    /// Idle burner.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    /// Serialises the burner.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.item as u8);
        writer.write_u8(self.op as u8);
        writer.write_u8(self.loops);
        writer.write_u8(u8::from(self.waiting));
        writer.write_u8(self.work_left);
        writer.write_u8(self.work_cap);
        writer.write_u64(self.output);
    }

    /// Deserialises a burner.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            item: Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil),
            op: BurnerOp::from_u8(reader.read_u8()?),
            loops: reader.read_u8()?,
            waiting: reader.read_u8()? != 0,
            work_left: reader.read_u8()?,
            work_cap: reader.read_u8()?,
            output: reader.read_u64()?,
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Burner> {
    match chunk.state_mut(id)? {
        ActiveState::Burner(state) => Some(state),
        _ => None,
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    api.chunk.ports_reset(id);
    if let Some(burner) = get(api.chunk, id) {
        *burner = Burner::new(id);
    }
}

// -----------------------------------------------------------------------------
// step
// -----------------------------------------------------------------------------

fn step_in(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(burner) = get(api.chunk, id) else { return };
    if !burner.waiting {
        let item = burner.item;
        burner.waiting = true;
        api.chunk.ports_request(id, item);
        return;
    }

    let ret = api.chunk.ports_consume(id);
    if ret.is_nil() {
        return;
    }

    if let Some(burner) = get(api.chunk, id) {
        debug_assert_eq!(ret, burner.item);
        burner.op = BurnerOp::Work;
        burner.work_left = burner.work_cap;
        burner.waiting = false;
    }
}

fn step_work(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(burner) = get(api.chunk, id) else { return };
    let output = burner.output;
    api.chunk.energy.produce(output);

    let Some(burner) = get(api.chunk, id) else { return };
    burner.work_left = burner.work_left.saturating_sub(1);
    if burner.work_left > 0 {
        return;
    }

    burner.op = BurnerOp::In;
    if burner.loops != LOOPS_INF {
        burner.loops = burner.loops.saturating_sub(1);
    }
    if burner.loops == 0 {
        reset(api, id);
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(burner) = get(api.chunk, id) else { return };
    if burner.item.is_nil() {
        return;
    }

    match burner.op {
        BurnerOp::Nil => {}
        BurnerOp::In => step_in(api, id),
        BurnerOp::Work => step_work(api, id),
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if !check_args(api, id, Io::State, args.len(), 1) {
        return;
    }

    let Some(burner) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Item) => Word::from(burner.item as u8),
        Some(Io::Loop) => Word::from(burner.loops),
        Some(Io::Work) => Word::from(burner.work_cap),
        Some(Io::Output) => burner.output as Word,
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
    };

    api.io(Io::Return, id, src, &[value]);
}

fn io_item(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Item, args.len(), 1) {
        return;
    }

    if !Item::validate(args[0]) {
        api.log(id, Io::Item.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    let item = Item::from_word(args[0]);

    if !check_known(api, id, Io::Item, item) {
        return;
    }

    let output = burner_energy(&api.view.db.tapes, item);
    let work_cap = burner_work_cap(&api.view.db.tapes, item).min(255) as u8;
    let loops = loops_io(args.get(1).copied().unwrap_or(Word::from(LOOPS_INF)));

    reset(api, id);
    if let Some(burner) = get(api.chunk, id) {
        burner.op = BurnerOp::In;
        burner.item = item;
        burner.loops = loops;
        burner.output = output;
        burner.work_cap = work_cap;
    }
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src, args),
        Io::Item => io_item(api, dst, args),
        Io::Reset => reset(api, dst),
        _ => {}
    }
}
