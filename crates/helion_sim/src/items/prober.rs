//! # Prober
//!
//! Counts an item kind at a remote star. The work cost scales with
//! distance; once elapsed, the query goes through the shard read model
//! and the answer lands one tick later, readable with `io-value`.

use helion_core::coord::Coord;
use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, ActiveState};

/// Distance units per work tick.
pub const PROBER_DIV: u64 = 1000;
/// Sentinel for "no result yet".
pub const PROBER_EMPTY: Word = -1;

/// Prober state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prober {
    /// Own id.
    pub id: ImId,
    /// Probed kind.
    pub item: Item,
    /// Probed star.
    pub coord: Coord,
    /// Result; [`PROBER_EMPTY`] while in flight.
    pub result: Word,
    /// Work ticks left before the query goes out.
    pub work_left: u8,
    /// Work ticks for the current target.
    pub work_cap: u8,
    /// Query registered, waiting on the read model.
    pub pending: bool,
}

impl Prober {
    /// Idle prober.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self {
            id,
            item: Item::Nil,
            coord: Coord::nil(),
            result: PROBER_EMPTY,
            work_left: 0,
            work_cap: 0,
            pending: false,
        }
    }

    /// Serialises the prober.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.item as u8);
        writer.write_u64(self.coord.to_u64());
        writer.write_word(self.result);
        writer.write_u8(self.work_left);
        writer.write_u8(self.work_cap);
        writer.write_u8(u8::from(self.pending));
    }

    /// Deserialises a prober.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            item: Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil),
            coord: Coord::from_u64(reader.read_u64()?),
            result: reader.read_word()?,
            work_left: reader.read_u8()?,
            work_cap: reader.read_u8()?,
            pending: reader.read_u8()? != 0,
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Prober> {
    match chunk.state_mut(id)? {
        ActiveState::Prober(state) => Some(state),
        _ => None,
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    if let Some(prober) = get(api.chunk, id) {
        *prober = Prober::new(id);
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(prober) = get(api.chunk, id) else { return };
    if prober.item.is_nil() || prober.result != PROBER_EMPTY {
        return;
    }

    if prober.work_left > 0 {
        prober.work_left -= 1;
        return;
    }

    let (coord, item) = (prober.coord, prober.item);
    if !prober.pending {
        prober.pending = true;
        let origin = api.chunk.coord();
        api.fx.probe_push(origin, coord, item);
        return;
    }

    let value = api.fx.probe_get(coord, item);
    if let Some(value) = value {
        if let Some(prober) = get(api.chunk, id) {
            prober.result = value.max(0);
            prober.pending = false;
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
    let Some(prober) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Target) => prober.coord.to_u64() as Word,
        Some(Io::Item) => Word::from(prober.item as u8),
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
    };
    api.io(Io::Return, id, src, &[value]);
}

fn io_probe(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Probe, args.len(), 1) {
        return;
    }

    if !Item::validate(args[0]) {
        api.log(id, Io::Probe.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    let item = Item::from_word(args[0]);

    let origin = api.chunk.coord();
    let mut coord = args.get(1).map_or(Coord::nil(), |&word| Coord::from_word(word));
    if coord.is_nil() {
        coord = origin;
    }

    let delta = origin.dist(coord) / PROBER_DIV;
    if delta >= u64::from(u8::MAX) {
        reset(api, id);
        api.log(id, Io::Probe.as_word(), IoErr::OutOfRange.as_word());
        return;
    }

    if let Some(prober) = get(api.chunk, id) {
        prober.item = item;
        prober.coord = coord;
        prober.work_cap = delta as u8;
        prober.work_left = delta as u8;
        prober.result = PROBER_EMPTY;
        prober.pending = false;
    }
}

fn io_value(api: &mut ChunkApi<'_>, id: ImId, src: ImId) {
    let Some(prober) = get(api.chunk, id) else { return };
    let result = prober.result;
    api.io(Io::Return, id, src, &[result]);

    if result != PROBER_EMPTY {
        reset(api, id);
    }
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src, args),
        Io::Probe => io_probe(api, dst, args),
        Io::Value => io_value(api, dst, src),
        Io::Reset => reset(api, dst),
        _ => {}
    }
}
