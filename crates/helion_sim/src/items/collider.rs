//! # Collider
//!
//! Synthesises elements on a multi-phase cycle: grow the ring, gather
//! tape inputs, burn the work, then emit one output per half tape length
//! - each output rolling against the ring's rate, with misses coming out
//! as junk (elem-o).

use helion_core::rng::SimRng;
use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};
use helion_db::specs::{collider_rate, COLLIDER_SIZE_MAX};
use helion_db::tape::{TapePacked, TapeRet, TapeStep};

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, check_known, loops_io, ActiveState, LOOPS_INF};
use crate::world::WorldView;

/// What a missed roll produces.
pub const COLLIDER_JUNK: Item = Item::ElemO;
/// What growing the ring consumes.
pub const COLLIDER_GROW_ITEM: Item = Item::Accelerator;

/// Collider phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ColliderOp {
    /// Unconfigured.
    #[default]
    Nil = 0,
    /// Consuming accelerators to grow the ring.
    Grow = 1,
    /// Gathering tape inputs.
    In = 2,
    /// Burning work ticks.
    Work = 3,
    /// Emitting rolled outputs.
    Out = 4,
}

impl ColliderOp {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::Grow,
            2 => Self::In,
            3 => Self::Work,
            4 => Self::Out,
            _ => Self::Nil,
        }
    }
}

/// Collider state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collider {
    /// Own id.
    pub id: ImId,
    /// Ring size; drives the output rate.
    pub size: u8,
    /// Cached rate for the current size.
    pub rate: u8,
    /// Phase.
    pub op: ColliderOp,
    /// Remaining loops.
    pub loops: u8,
    /// Waiting on a port handshake.
    pub waiting: bool,
    /// Work ticks left / per cycle.
    pub work_left: u8,
    /// Work ticks per cycle.
    pub work_cap: u8,
    /// Output phase: rolled item, emitted count, total to emit.
    pub out_item: Item,
    /// Outputs emitted so far this cycle.
    pub out_it: u8,
    /// Outputs per cycle.
    pub out_len: u8,
    /// Packed tape cursor.
    pub tape: TapePacked,
    /// Roll stream.
    pub rng: SimRng,
}

impl Collider {
    /// Fresh collider with a size-1 ring.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self {
            id,
            size: 1,
            rate: collider_rate(1),
            op: ColliderOp::Nil,
            loops: 0,
            waiting: false,
            work_left: 0,
            work_cap: 0,
            out_item: Item::Nil,
            out_it: 0,
            out_len: 0,
            tape: TapePacked::NIL,
            rng: SimRng::new(u64::from(id.to_u16())),
        }
    }

    /// Serialises the collider.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.size);
        writer.write_u8(self.rate);
        writer.write_u8(self.op as u8);
        writer.write_u8(self.loops);
        writer.write_u8(u8::from(self.waiting));
        writer.write_u8(self.work_left);
        writer.write_u8(self.work_cap);
        writer.write_u8(self.out_item as u8);
        writer.write_u8(self.out_it);
        writer.write_u8(self.out_len);
        writer.write_u64(self.tape.to_u64());
        let (seed, pos) = self.rng.state();
        writer.write_u64(seed);
        writer.write_u128(pos);
    }

    /// Deserialises a collider; the cursor cache is fixed up separately.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            size: reader.read_u8()?,
            rate: reader.read_u8()?,
            op: ColliderOp::from_u8(reader.read_u8()?),
            loops: reader.read_u8()?,
            waiting: reader.read_u8()? != 0,
            work_left: reader.read_u8()?,
            work_cap: reader.read_u8()?,
            out_item: Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil),
            out_it: reader.read_u8()?,
            out_len: reader.read_u8()?,
            tape: TapePacked::from_u64(reader.read_u64()?),
            rng: {
                let seed = reader.read_u64()?;
                let pos = reader.read_u128()?;
                SimRng::from_state(seed, pos)
            },
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Collider> {
    match chunk.state_mut(id)? {
        ActiveState::Collider(state) => Some(state),
        _ => None,
    }
}

/// Re-resolves the cursor cache against the tape registry.
pub fn load_fixup(collider: &mut Collider, view: &WorldView) {
    collider.tape = view.db.tapes.repack(collider.tape);
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    api.chunk.ports_reset(id);
    if let Some(collider) = get(api.chunk, id) {
        let size = collider.size;
        let rng = collider.rng.clone();
        *collider = Collider::new(id);
        collider.size = size;
        collider.rate = collider_rate(size);
        collider.rng = rng;
    }
}

// -----------------------------------------------------------------------------
// step
// -----------------------------------------------------------------------------

fn step_grow(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(collider) = get(api.chunk, id) else { return };
    if !collider.waiting {
        collider.waiting = true;
        api.chunk.ports_request(id, COLLIDER_GROW_ITEM);
        return;
    }

    if api.chunk.ports_consume(id).is_nil() {
        return;
    }

    let Some(collider) = get(api.chunk, id) else { return };
    collider.waiting = false;
    collider.size = (collider.size + 1).min(COLLIDER_SIZE_MAX);
    collider.rate = collider_rate(collider.size);

    collider.loops = collider.loops.saturating_sub(1);
    if collider.loops == 0 {
        reset(api, id);
    }
}

fn step_in(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(collider) = get(api.chunk, id) else { return };
    let packed = collider.tape;
    let view = api.view;
    let Some(tape) = view.db.tapes.resolve(packed) else { return };
    let TapeRet::Step(TapeStep::Input(item)) = tape.at(packed.it()) else {
        // Input phase with no input step left: move on to work.
        let work = tape.work();
        if let Some(collider) = get(api.chunk, id) {
            collider.op = ColliderOp::Work;
            collider.work_left = work;
            collider.work_cap = work;
        }
        return;
    };

    let Some(collider) = get(api.chunk, id) else { return };
    if !collider.waiting {
        collider.waiting = true;
        api.chunk.ports_request(id, item);
        return;
    }

    let consumed = api.chunk.ports_consume(id);
    if consumed.is_nil() {
        return;
    }
    debug_assert_eq!(consumed, item);

    if let Some(collider) = get(api.chunk, id) {
        collider.waiting = false;
        collider.tape = collider.tape.inc();
    }
}

fn step_work(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(collider) = get(api.chunk, id) else { return };
    let packed = collider.tape;

    if collider.work_left > 0 {
        let view = api.view;
        let Some(tape) = view.db.tapes.resolve(packed) else { return };
        let energy = u64::from(tape.energy());
        if !api.chunk.energy.consume(energy) {
            return;
        }
        let Some(collider) = get(api.chunk, id) else { return };
        collider.work_left -= 1;
        if collider.work_left > 0 {
            return;
        }
    }

    let view = api.view;
    let Some(tape) = view.db.tapes.resolve(packed) else { return };
    let out_len = (tape.len() / 2).max(1);
    if let Some(collider) = get(api.chunk, id) {
        collider.op = ColliderOp::Out;
        collider.out_item = Item::Nil;
        collider.out_it = 0;
        collider.out_len = out_len;
    }
}

fn step_out(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(collider) = get(api.chunk, id) else { return };
    if !collider.waiting {
        let sample = collider.rng.uni(1, u64::from(COLLIDER_SIZE_MAX)) as u8;
        let item =
            if sample < collider.rate { collider.tape.item() } else { COLLIDER_JUNK };
        collider.out_item = item;
        collider.waiting = true;
        api.chunk.ports_produce(id, item);
        return;
    }

    if !api.chunk.ports_consumed(id) {
        return;
    }

    let Some(collider) = get(api.chunk, id) else { return };
    collider.waiting = false;
    collider.out_it += 1;
    if collider.out_it < collider.out_len {
        return;
    }

    collider.op = ColliderOp::In;
    collider.tape = collider.tape.rewind();
    if collider.loops != LOOPS_INF {
        collider.loops = collider.loops.saturating_sub(1);
    }
    if collider.loops == 0 {
        reset(api, id);
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(collider) = get(api.chunk, id) else { return };
    match collider.op {
        ColliderOp::Nil => {}
        ColliderOp::Grow => step_grow(api, id),
        ColliderOp::In => step_in(api, id),
        ColliderOp::Work => step_work(api, id),
        ColliderOp::Out => step_out(api, id),
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if !check_args(api, id, Io::State, args.len(), 1) {
        return;
    }

    let Some(collider) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Size) => Word::from(collider.size),
        Some(Io::Rate) => Word::from(collider.rate),
        Some(Io::Tape) => Word::from(collider.tape.item() as u8),
        Some(Io::Loop) => Word::from(collider.loops),
        Some(Io::Work) => Word::from(collider.work_cap),
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
    };
    api.io(Io::Return, id, src, &[value]);
}

fn io_grow(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Grow, args.len(), 1) {
        return;
    }

    let Some(collider) = get(api.chunk, id) else { return };
    let room = u64::from(COLLIDER_SIZE_MAX - collider.size);
    let loops = (args[0].max(0) as u64).min(room);
    if loops == 0 {
        api.log(id, Io::Grow.as_word(), IoErr::OutOfSpace.as_word());
        return;
    }

    reset(api, id);
    if let Some(collider) = get(api.chunk, id) {
        collider.op = ColliderOp::Grow;
        collider.loops = loops as u8;
    }
}

fn io_tape(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Tape, args.len(), 1) {
        return;
    }

    if !Item::validate(args[0]) {
        api.log(id, Io::Tape.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    let item = Item::from_word(args[0]);

    if !check_known(api, id, Io::Tape, item) {
        return;
    }

    let host_ok = api
        .view
        .db
        .tapes
        .get(item)
        .is_some_and(|tape| tape.host() == Item::Collider);
    if !host_ok {
        api.log(id, Io::Tape.as_word(), IoErr::A0Invalid.as_word());
        return;
    }

    let packed = api.view.db.tapes.pack(item, 0);
    let loops = loops_io(args.get(1).copied().unwrap_or(Word::from(LOOPS_INF)));

    reset(api, id);
    if let Some(collider) = get(api.chunk, id) {
        collider.op = ColliderOp::In;
        collider.tape = packed.unwrap_or(TapePacked::NIL);
        collider.loops = loops;
    }
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src, args),
        Io::Grow => io_grow(api, dst, args),
        Io::Tape => io_tape(api, dst, args),
        Io::Reset => reset(api, dst),
        _ => {}
    }
}
