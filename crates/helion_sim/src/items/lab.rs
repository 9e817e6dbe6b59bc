//! # Lab
//!
//! Research machine: consumes one item per cycle, works it down, then
//! learns one still-unknown research bit through the shard bus. When the
//! last bit is in, the selection clears itself.

use helion_core::rng::SimRng;
use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};
use helion_vm::vm_pack;

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, ActiveState};

/// Lab phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum LabState {
    /// Nothing selected or between cycles.
    #[default]
    Idle = 0,
    /// Waiting on the input port.
    Waiting = 1,
    /// Working the consumed item down.
    Working = 2,
}

impl LabState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::Waiting,
            2 => Self::Working,
            _ => Self::Idle,
        }
    }
}

/// Lab state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lab {
    /// Own id.
    pub id: ImId,
    /// Selected research item.
    pub item: Item,
    /// Phase.
    pub state: LabState,
    /// Work ticks left this cycle.
    pub work_left: u8,
    /// Work ticks per cycle.
    pub work_cap: u8,
    /// Per-instance bit-picking stream.
    pub rng: SimRng,
}

impl Lab {
    /// Idle lab, stream seeded from the id.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self {
            id,
            item: Item::Nil,
            state: LabState::Idle,
            work_left: 0,
            work_cap: 0,
            rng: SimRng::new(u64::from(id.to_u16())),
        }
    }

    /// Serialises the lab, stream position included.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.item as u8);
        writer.write_u8(self.state as u8);
        writer.write_u8(self.work_left);
        writer.write_u8(self.work_cap);
        let (seed, pos) = self.rng.state();
        writer.write_u64(seed);
        writer.write_u128(pos);
    }

    /// Deserialises a lab mid-stream.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        let id = ImId::from_u16(reader.read_u16()?);
        let item = Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil);
        let state = LabState::from_u8(reader.read_u8()?);
        let work_left = reader.read_u8()?;
        let work_cap = reader.read_u8()?;
        let seed = reader.read_u64()?;
        let pos = reader.read_u128()?;
        Ok(Self { id, item, state, work_left, work_cap, rng: SimRng::from_state(seed, pos) })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Lab> {
    match chunk.state_mut(id)? {
        ActiveState::Lab(state) => Some(state),
        _ => None,
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    api.chunk.ports_reset(id);
    if let Some(lab) = get(api.chunk, id) {
        lab.item = Item::Nil;
        lab.state = LabState::Idle;
        lab.work_left = 0;
        lab.work_cap = 0;
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(lab) = get(api.chunk, id) else { return };
    if lab.item.is_nil() {
        return;
    }

    match lab.state {
        LabState::Idle => {
            let item = lab.item;
            lab.state = LabState::Waiting;
            api.chunk.ports_request(id, item);
        }

        LabState::Waiting => {
            let ret = api.chunk.ports_consume(id);
            if ret.is_nil() {
                return;
            }
            if let Some(lab) = get(api.chunk, id) {
                debug_assert_eq!(ret, lab.item);
                lab.work_left = lab.work_cap;
                lab.state = LabState::Working;
            }
        }

        LabState::Working => {
            lab.work_left = lab.work_left.saturating_sub(1);
            if lab.work_left > 0 {
                return;
            }

            let item = lab.item;
            let bits = item.lab_bits();
            let learned = api.learned_bits(item);

            // Pick a still-unknown bit; the stream stays deterministic
            // because the known set is.
            let bit = {
                let Some(lab) = get(api.chunk, id) else { return };
                let mut bit = lab.rng.uni(0, u64::from(bits)) as u8;
                for _ in 0..bits {
                    if learned & (1 << bit) == 0 {
                        break;
                    }
                    bit = (bit + 1) % bits;
                }
                lab.state = LabState::Idle;
                bit
            };

            api.tech_learn_bit(item, bit);

            // The effect lands next tick; treat the last locally computed
            // bit as the completion signal.
            let mask = (1u64 << bits) - 1;
            if (learned | (1 << bit)) & mask == mask {
                if let Some(lab) = get(api.chunk, id) {
                    lab.item = Item::Nil;
                }
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

    let Some(lab) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Item) => Word::from(lab.item as u8),
        Some(Io::Work) => vm_pack(u32::from(lab.work_left), u32::from(lab.work_cap)),
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

    if item.lab_bits() == 0 || api.learned(item) {
        api.log(id, Io::Item.as_word(), IoErr::A0Invalid.as_word());
        return;
    }

    let work_cap = item.lab_work();
    reset(api, id);
    if let Some(lab) = get(api.chunk, id) {
        lab.item = item;
        lab.work_cap = work_cap;
    }
}

fn io_item_bits(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    let value = if !args.is_empty() && Item::validate(args[0]) {
        api.learned_bits(Item::from_word(args[0])) as Word
    } else {
        0
    };
    api.io(Io::Return, id, src, &[value]);
}

fn io_item_known(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    let value = if !args.is_empty() && Item::validate(args[0]) {
        Word::from(api.learned(Item::from_word(args[0])))
    } else {
        0
    };
    api.io(Io::Return, id, src, &[value]);
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
        Io::Get => io_item_bits(api, dst, src, args),
        Io::Value => io_item_known(api, dst, src, args),
        _ => {}
    }
}
