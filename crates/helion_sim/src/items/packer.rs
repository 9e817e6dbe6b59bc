//! # Packer
//!
//! Turns placed machines back into carriable items: deletes the newest
//! local entity of the configured kind and offers that same kind on its
//! output port, one per completed handshake.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, check_known, loops_io, ActiveState, LOOPS_INF};

/// Packer state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Packer {
    /// Own id.
    pub id: ImId,
    /// Kind being packed.
    pub item: Item,
    /// Remaining loops.
    pub loops: u8,
    /// Waiting on the output handshake.
    pub waiting: bool,
}

impl Packer {
    /// Idle packer.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    /// Serialises the packer.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.item as u8);
        writer.write_u8(self.loops);
        writer.write_u8(u8::from(self.waiting));
    }

    /// Deserialises a packer.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            item: Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil),
            loops: reader.read_u8()?,
            waiting: reader.read_u8()? != 0,
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Packer> {
    match chunk.state_mut(id)? {
        ActiveState::Packer(state) => Some(state),
        _ => None,
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    api.chunk.ports_reset(id);
    if let Some(packer) = get(api.chunk, id) {
        packer.item = Item::Nil;
        packer.loops = 0;
        packer.waiting = false;
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(packer) = get(api.chunk, id) else { return };
    let item = packer.item;
    if item.is_nil() {
        return;
    }

    if !packer.waiting {
        let target = api.chunk.last(item);
        if target.is_nil() {
            reset(api, id);
            return;
        }

        let ok = api.chunk.delete(target);
        debug_assert!(ok);

        api.chunk.ports_produce(id, item);
        if let Some(packer) = get(api.chunk, id) {
            packer.waiting = true;
        }
        return;
    }

    if !api.chunk.ports_consumed(id) {
        return;
    }

    let Some(packer) = get(api.chunk, id) else { return };
    packer.waiting = false;
    if packer.loops != LOOPS_INF {
        packer.loops = packer.loops.saturating_sub(1);
    }
    if packer.loops == 0 {
        reset(api, id);
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if !check_args(api, id, Io::State, args.len(), 1) {
        return;
    }
    let Some(packer) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Item) => Word::from(packer.item as u8),
        Some(Io::Loop) => Word::from(packer.loops),
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
    };
    api.io(Io::Return, id, src, &[value]);
}

/// Immediate one-shot pack of a specific id.
fn io_id(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Id, args.len(), 1) {
        return;
    }

    if !ImId::validate(args[0]) {
        api.log(id, Io::Id.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    let target = ImId::from_word(args[0]);
    let item = target.item();

    if !item.is_active() && !item.is_logistics() {
        api.log(id, Io::Id.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    if !check_known(api, id, Io::Id, item) {
        return;
    }
    if !api.chunk.delete(target) {
        api.log(id, Io::Id.as_word(), IoErr::A0Invalid.as_word());
        return;
    }

    api.chunk.ports_produce(id, item);
    if let Some(packer) = get(api.chunk, id) {
        packer.waiting = true;
        packer.item = item;
        packer.loops = 1;
    }
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

    if !item.is_active() && !item.is_logistics() {
        api.log(id, Io::Item.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    if !check_known(api, id, Io::Item, item) {
        return;
    }

    let loops = loops_io(args.get(1).copied().unwrap_or(Word::from(LOOPS_INF)));
    reset(api, id);
    if let Some(packer) = get(api.chunk, id) {
        packer.item = item;
        packer.loops = loops;
    }
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src, args),
        Io::Id => io_id(api, dst, args),
        Io::Item => io_item(api, dst, args),
        Io::Reset => reset(api, dst),
        _ => {}
    }
}
