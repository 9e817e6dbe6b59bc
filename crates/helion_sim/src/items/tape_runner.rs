//! # Tape Runner
//!
//! The shared engine behind extract, condenser, printer and assembly: a
//! cursor into a tape, a loop counter and a waiting flag. Harvesting
//! hosts (extract, condenser) additionally pull their output element out
//! of the star and starve out when it is exhausted.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};
use helion_db::tape::{TapePacked, TapeRet, TapeStep};
use helion_vm::vm_pack;

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, check_known, loops_io, ActiveState, LOOPS_INF};
use crate::world::WorldView;

/// Runner state; the packed cursor is all that is needed to resume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TapeRunner {
    /// Own id.
    pub id: ImId,
    /// Remaining loops; [`LOOPS_INF`] runs forever.
    pub loops: u8,
    /// Waiting on a port handshake.
    pub waiting: bool,
    /// Packed tape cursor.
    pub tape: TapePacked,
}

impl TapeRunner {
    /// Idle runner.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self { id, ..Self::default() }
    }

    /// Serialises the runner.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.loops);
        writer.write_u8(u8::from(self.waiting));
        writer.write_u64(self.tape.to_u64());
    }

    /// Deserialises a runner; the cursor cache is fixed up separately.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            loops: reader.read_u8()?,
            waiting: reader.read_u8()? != 0,
            tape: TapePacked::from_u64(reader.read_u64()?),
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut TapeRunner> {
    match chunk.state_mut(id)? {
        ActiveState::Extract(runner)
        | ActiveState::Printer(runner)
        | ActiveState::Assembly(runner)
        | ActiveState::Condenser(runner) => Some(runner),
        _ => None,
    }
}

/// Re-resolves the cursor cache against the tape registry.
pub fn load_fixup(runner: &mut TapeRunner, view: &WorldView) {
    runner.tape = view.db.tapes.repack(runner.tape);
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    api.chunk.ports_reset(id);
    if let Some(runner) = get(api.chunk, id) {
        runner.waiting = false;
        runner.loops = 0;
        runner.tape = TapePacked::NIL;
    }
}

// -----------------------------------------------------------------------------
// step
// -----------------------------------------------------------------------------

fn step_eof(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(runner) = get(api.chunk, id) else { return };
    if runner.loops != LOOPS_INF {
        runner.loops = runner.loops.saturating_sub(1);
    }
    if runner.loops == 0 {
        reset(api, id);
    } else {
        runner.tape = runner.tape.rewind();
    }
}

fn step_input(api: &mut ChunkApi<'_>, id: ImId, item: Item) {
    let Some(runner) = get(api.chunk, id) else { return };
    if !runner.waiting {
        runner.waiting = true;
        api.chunk.ports_request(id, item);
        return;
    }

    let consumed = api.chunk.ports_consume(id);
    if consumed.is_nil() {
        return;
    }
    debug_assert_eq!(consumed, item);

    if let Some(runner) = get(api.chunk, id) {
        runner.waiting = false;
        runner.tape = runner.tape.inc();
    }
}

fn step_work(api: &mut ChunkApi<'_>, id: ImId, energy: u64) {
    if !api.chunk.energy.consume(energy) {
        return;
    }
    if let Some(runner) = get(api.chunk, id) {
        runner.tape = runner.tape.inc();
    }
}

fn step_output(api: &mut ChunkApi<'_>, id: ImId, item: Item, harvest: bool) {
    let Some(runner) = get(api.chunk, id) else { return };
    if !runner.waiting {
        if harvest && !api.chunk.harvest(item) {
            api.log(id, Io::Step.as_word(), IoErr::Starved.as_word());
            reset(api, id);
            return;
        }

        let produced = api.chunk.ports_produce(id, item);
        debug_assert!(produced);
        if let Some(runner) = get(api.chunk, id) {
            runner.waiting = produced;
        }
        return;
    }

    if !api.chunk.ports_consumed(id) {
        return;
    }
    if let Some(runner) = get(api.chunk, id) {
        runner.waiting = false;
        runner.tape = runner.tape.inc();
    }
}

/// One tick. `harvest` marks the extract/condenser variant.
pub fn step(api: &mut ChunkApi<'_>, id: ImId, harvest: bool) {
    let Some(runner) = get(api.chunk, id) else { return };
    let packed = runner.tape;
    let Some(tape) = api.view.db.tapes.resolve(packed) else { return };
    let energy = u64::from(tape.energy());
    let ret = tape.at(packed.it());

    if !api.chunk.energy.consume(energy) {
        return;
    }

    match ret {
        TapeRet::Eof => step_eof(api, id),
        TapeRet::Step(TapeStep::Input(item)) => step_input(api, id, item),
        TapeRet::Step(TapeStep::Work) => step_work(api, id, energy),
        TapeRet::Step(TapeStep::Output(item)) => step_output(api, id, item, harvest),
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if !check_args(api, id, Io::State, args.len(), 1) {
        return;
    }

    let Some(runner) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Tape) => Word::from(runner.tape.item() as u8),
        Some(Io::Loop) => Word::from(runner.loops),
        Some(Io::Item) => vm_pack(u32::from(runner.loops), u32::from(runner.tape.item() as u8)),
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
    };

    api.io(Io::Return, id, src, &[value]);
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
        .is_some_and(|tape| tape.host() == id.item());
    if !host_ok {
        api.log(id, Io::Tape.as_word(), IoErr::A0Invalid.as_word());
        return;
    }

    let packed = api.view.db.tapes.pack(item, 0);
    let loops = loops_io(args.get(1).copied().unwrap_or(Word::from(LOOPS_INF)));

    reset(api, id);
    if let Some(runner) = get(api.chunk, id) {
        runner.tape = packed.unwrap_or(TapePacked::NIL);
        runner.loops = loops;
    }
}

/// IO entry point shared by every tape-running kind.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src, args),
        Io::Tape => io_tape(api, dst, args),
        Io::Reset => reset(api, dst),
        _ => {}
    }
}
