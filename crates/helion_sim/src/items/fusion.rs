//! # Fusion
//!
//! Rod-fed reactor. Buffers energy internally and feeds the ledger each
//! tick up to its output rate; the ledger's saturation cap pushes the
//! remainder back into the buffer. Requests a fresh rod whenever the
//! buffer has room for one.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, ActiveState};

/// Energy buffered per consumed rod.
pub const FUSION_ENERGY_ROD: u64 = 1 << 12;
/// Buffer capacity.
pub const FUSION_ENERGY_CAP: u64 = FUSION_ENERGY_ROD * 4;
/// Output per tick into the ledger.
pub const FUSION_ENERGY_OUTPUT: u64 = 64;
/// Fuel kind.
pub const FUSION_INPUT_ITEM: Item = Item::Rod;

/// Reactor state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fusion {
    /// Own id.
    pub id: ImId,
    /// Buffered energy.
    pub energy: u64,
    /// Suspended by `io-reset`; cleared by `io-activate`.
    pub paused: bool,
    /// Waiting on a rod delivery.
    pub waiting: bool,
}

impl Fusion {
    /// Fresh reactor, primed with one rod's worth of energy.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, energy: FUSION_ENERGY_ROD, paused: false, waiting: false }
    }

    /// Serialises the reactor.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u64(self.energy);
        writer.write_u8(u8::from(self.paused));
        writer.write_u8(u8::from(self.waiting));
    }

    /// Deserialises a reactor.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            energy: reader.read_u64()?,
            paused: reader.read_u8()? != 0,
            waiting: reader.read_u8()? != 0,
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Fusion> {
    match chunk.state_mut(id)? {
        ActiveState::Fusion(state) => Some(state),
        _ => None,
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    api.chunk.ports_reset(id);
    if let Some(fusion) = get(api.chunk, id) {
        fusion.paused = true;
        fusion.waiting = false;
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(fusion) = get(api.chunk, id) else { return };
    if fusion.paused {
        return;
    }

    let offered = fusion.energy.min(FUSION_ENERGY_OUTPUT);
    let rejected = api.chunk.energy.step_fusion(offered, FUSION_ENERGY_OUTPUT);
    let produced = offered - rejected;

    let Some(fusion) = get(api.chunk, id) else { return };
    fusion.energy -= produced;

    if !fusion.waiting {
        if fusion.energy + FUSION_ENERGY_ROD < FUSION_ENERGY_CAP {
            fusion.waiting = true;
            api.chunk.ports_request(id, FUSION_INPUT_ITEM);
        }
        return;
    }

    let ret = api.chunk.ports_consume(id);
    if ret.is_nil() {
        return;
    }

    if let Some(fusion) = get(api.chunk, id) {
        fusion.energy += FUSION_ENERGY_ROD;
        fusion.waiting = false;
        debug_assert!(fusion.energy < FUSION_ENERGY_CAP);
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if !check_args(api, id, Io::State, args.len(), 1) {
        return;
    }

    let Some(fusion) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Active) => Word::from(!fusion.paused),
        Some(Io::Energy) => fusion.energy as Word,
        Some(Io::Item) => {
            if !fusion.paused && fusion.waiting {
                Word::from(FUSION_INPUT_ITEM as u8)
            } else {
                0
            }
        }
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
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
        Io::Reset => reset(api, dst),
        Io::Activate => {
            if let Some(fusion) = get(api.chunk, dst) {
                fusion.paused = false;
            }
        }
        _ => {}
    }
}
