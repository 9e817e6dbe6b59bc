//! # Memory
//!
//! A small word store with `get`/`set`/`cas`. Brains use it to share
//! state across resets and across mod switches.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::ImId;

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, ActiveState};

/// Words per memory bank.
pub const MEMORY_LEN: usize = 8;

/// Memory state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Memory {
    /// Own id.
    pub id: ImId,
    /// The bank.
    pub data: [Word; MEMORY_LEN],
}

impl Memory {
    /// Zeroed bank.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, data: [0; MEMORY_LEN] }
    }

    /// Serialises the bank.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        for &word in &self.data {
            writer.write_word(word);
        }
    }

    /// Deserialises a bank.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        let id = ImId::from_u16(reader.read_u16()?);
        let mut data = [0; MEMORY_LEN];
        for word in &mut data {
            *word = reader.read_word()?;
        }
        Ok(Self { id, data })
    }
}

/// Seeds the bank from a lane payload.
#[must_use]
pub fn make(id: ImId, data: &[Word]) -> Memory {
    let mut memory = Memory::new(id);
    for (slot, &word) in memory.data.iter_mut().zip(data.iter()) {
        *slot = word;
    }
    memory
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Memory> {
    match chunk.state_mut(id)? {
        ActiveState::Memory(state) => Some(state),
        _ => None,
    }
}

fn io_get(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    let value = 'value: {
        if !check_args(api, id, Io::Get, args.len(), 1) {
            break 'value 0;
        }
        let Some(ix) = slot_index(args[0]) else {
            api.log(id, Io::Get.as_word(), IoErr::A0Invalid.as_word());
            break 'value 0;
        };
        get(api.chunk, id).map_or(0, |memory| memory.data[ix])
    };
    api.io(Io::Return, id, src, &[value]);
}

fn io_set(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Set, args.len(), 2) {
        return;
    }
    let Some(ix) = slot_index(args[0]) else {
        api.log(id, Io::Set.as_word(), IoErr::A0Invalid.as_word());
        return;
    };
    if let Some(memory) = get(api.chunk, id) {
        memory.data[ix] = args[1];
    }
}

fn io_cas(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    let old = 'old: {
        if !check_args(api, id, Io::Cas, args.len(), 3) {
            break 'old 0;
        }
        let Some(ix) = slot_index(args[0]) else {
            api.log(id, Io::Cas.as_word(), IoErr::A0Invalid.as_word());
            break 'old 0;
        };
        match get(api.chunk, id) {
            Some(memory) => {
                let old = memory.data[ix];
                if old == args[1] {
                    memory.data[ix] = args[2];
                }
                old
            }
            None => 0,
        }
    };
    api.io(Io::Return, id, src, &[old]);
}

fn slot_index(word: Word) -> Option<usize> {
    (0..MEMORY_LEN as Word).contains(&word).then_some(word as usize)
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => {
            if check_args(api, dst, Io::State, args.len(), 1) {
                api.log(dst, Io::State.as_word(), IoErr::A0Invalid.as_word());
                api.io(Io::Return, dst, src, &[0]);
            }
        }
        Io::Reset => {
            if let Some(memory) = get(api.chunk, dst) {
                memory.data = [0; MEMORY_LEN];
            }
        }
        Io::Get => io_get(api, dst, src, args),
        Io::Set => io_set(api, dst, args),
        Io::Cas => io_cas(api, dst, src, args),
        _ => {}
    }
}
