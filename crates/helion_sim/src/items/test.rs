//! # Test Item
//!
//! Not a real machine: records the last IO it received so tests can
//! assert on replies routed through the chunk. Registered like any other
//! active kind so the dispatch path under test is the real one.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::Io;
use helion_db::items::ImId;

use crate::chunk::ChunkApi;
use crate::items::ActiveState;

/// Recorded words cap.
pub const TEST_ARGS_CAP: usize = 7;

/// Recorder state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Test {
    /// Own id.
    pub id: ImId,
    /// Sender of the last IO.
    pub src: ImId,
    /// Verb of the last IO.
    pub io: Io,
    /// Recorded argument count.
    pub len: u8,
    /// Recorded arguments.
    pub args: [Word; TEST_ARGS_CAP],
}

impl Test {
    /// Empty recorder.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    /// True when the last recorded IO matches exactly.
    #[must_use]
    pub fn check(&self, io: Io, src: ImId, args: &[Word]) -> bool {
        self.io == io
            && self.src == src
            && usize::from(self.len) == args.len()
            && self.args[..args.len()] == *args
    }

    /// Serialises the recorder.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u16(self.src.to_u16());
        writer.write_word(self.io.as_word());
        writer.write_u8(self.len);
        for &word in &self.args {
            writer.write_word(word);
        }
    }

    /// Deserialises a recorder.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        let id = ImId::from_u16(reader.read_u16()?);
        let src = ImId::from_u16(reader.read_u16()?);
        let io = Io::from_word(reader.read_word()?).unwrap_or(Io::Nil);
        let len = reader.read_u8()?;
        let mut args = [0; TEST_ARGS_CAP];
        for word in &mut args {
            *word = reader.read_word()?;
        }
        Ok(Self { id, src, io, len, args })
    }
}

/// IO entry point: record and move on.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    let Some(ActiveState::Test(test)) = api.chunk.state_mut(dst) else { return };
    test.io = io;
    test.src = src;
    test.len = args.len().min(TEST_ARGS_CAP) as u8;
    test.args = [0; TEST_ARGS_CAP];
    test.args[..usize::from(test.len)].copy_from_slice(&args[..usize::from(test.len)]);
}
