//! # Storage
//!
//! Buffers one item kind: keeps a request open while below capacity and
//! simultaneously re-offers its stock on the output port, which makes it
//! both a sink and a source for the worker pool.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::Io;
use helion_db::items::{ImId, Item};
use helion_vm::vm_pack;

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, check_known, ActiveState};

/// Stack cap per storage.
pub const STORAGE_MAX: u16 = 4096;

/// Storage state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Storage {
    /// Own id.
    pub id: ImId,
    /// Stored kind.
    pub item: Item,
    /// Stock on hand.
    pub count: u16,
    /// Waiting on the input port.
    pub waiting: bool,
}

impl Storage {
    /// Empty storage.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    /// Serialises the storage.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.item as u8);
        writer.write_u16(self.count);
        writer.write_u8(u8::from(self.waiting));
    }

    /// Deserialises a storage.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            item: Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil),
            count: reader.read_u16()?,
            waiting: reader.read_u8()? != 0,
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Storage> {
    match chunk.state_mut(id)? {
        ActiveState::Storage(state) => Some(state),
        _ => None,
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    api.chunk.ports_reset(id);
    if let Some(storage) = get(api.chunk, id) {
        storage.item = Item::Nil;
        storage.count = 0;
        storage.waiting = false;
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(storage) = get(api.chunk, id) else { return };
    let item = storage.item;
    if item.is_nil() {
        return;
    }

    if !storage.waiting {
        if storage.count < STORAGE_MAX {
            storage.waiting = true;
            api.chunk.ports_request(id, item);
        }
    } else {
        let ret = api.chunk.ports_consume(id);
        if !ret.is_nil() {
            debug_assert_eq!(ret, item);
            if let Some(storage) = get(api.chunk, id) {
                storage.count += 1;
                storage.waiting = false;
            }
        }
    }

    let Some(storage) = get(api.chunk, id) else { return };
    if storage.count > 0 && api.chunk.ports_produce(id, item) {
        if let Some(storage) = get(api.chunk, id) {
            storage.count -= 1;
        }
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId) {
    let Some(storage) = get(api.chunk, id) else { return };
    let value = vm_pack(u32::from(storage.count), u32::from(storage.item as u8));
    api.io(Io::Return, id, src, &[value]);
}

fn io_item(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Item, args.len(), 1) {
        return;
    }
    if !Item::validate(args[0]) {
        return;
    }
    let item = Item::from_word(args[0]);
    if !check_known(api, id, Io::Item, item) {
        return;
    }
    if get(api.chunk, id).is_some_and(|storage| storage.item == item) {
        return;
    }

    reset(api, id);
    if let Some(storage) = get(api.chunk, id) {
        storage.item = item;
    }
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src),
        Io::Item => io_item(api, dst, args),
        Io::Reset => reset(api, dst),
        _ => {}
    }
}
