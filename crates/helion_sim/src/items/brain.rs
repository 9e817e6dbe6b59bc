//! # Brain
//!
//! The programmable machine: runs a mod on its VM at a fixed instruction
//! budget per tick, dispatches the VM's IO requests through the chunk,
//! and carries a one-packet message buffer plus debugger hooks
//! (attach/detach, breakpoint, single-step).
//!
//! Local intrinsics (`id`, `tick`, `coord`, `name`, `log`, `specs`,
//! `send`, `recv`) are answered inline; everything else forwards through
//! `chunk_io` with `io-ok`/`io-fail` pushed after the call so every
//! statement leaves a value on the stack.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::ImId;
use helion_db::specs::{specs_args, Spec};
use helion_vm::vm::IP_NIL;
use helion_vm::{vm_unpack, Mod, ModId, Vm, VmSignal, IO_CAP};

use crate::chunk::{Chunk, ChunkApi};
use crate::items::{check_args, ActiveState};
use crate::world::WorldView;

use std::sync::Arc;

/// VM instructions per tick.
pub const BRAIN_SPEED: u8 = 8;
/// Message buffer length in words.
pub const BRAIN_MSG_CAP: usize = 4;

/// The inbound message buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrainMsg {
    /// Buffered words.
    pub len: u8,
    /// Word storage.
    pub data: [Word; BRAIN_MSG_CAP],
}

/// Brain state.
#[derive(Clone, Debug)]
pub struct Brain {
    /// Own id.
    pub id: ImId,
    /// Loaded mod identity.
    pub mod_id: ModId,
    /// Resolved mod handle; never persisted, re-resolved on load.
    pub module: Option<Arc<Mod>>,
    /// The machine.
    pub vm: Vm,
    /// Inbound message buffer.
    pub msg: BrainMsg,
    /// Debugger attached; the brain does not step.
    pub debug: bool,
    /// Mod resolution failed; revived by `io-mod` or `io-reset`.
    pub fault: bool,
    /// Instruction pointer that trips the debugger.
    pub breakpoint: u32,
}

impl PartialEq for Brain {
    fn eq(&self, other: &Self) -> bool {
        // The module handle mirrors mod_id; comparing it would only drag
        // Arc identity into state equality.
        self.id == other.id
            && self.mod_id == other.mod_id
            && self.vm == other.vm
            && self.msg == other.msg
            && self.debug == other.debug
            && self.fault == other.fault
            && self.breakpoint == other.breakpoint
    }
}

impl Brain {
    /// Fresh brain with no mod loaded.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self {
            id,
            mod_id: ModId::NIL,
            module: None,
            vm: Vm::new(BRAIN_SPEED),
            msg: BrainMsg::default(),
            debug: false,
            fault: false,
            breakpoint: IP_NIL,
        }
    }

    /// Serialises the brain; the mod handle travels as its id only.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u32(self.mod_id.to_u32());
        self.vm.save(writer);
        writer.write_u8(self.msg.len);
        for &word in &self.msg.data {
            writer.write_word(word);
        }
        writer.write_u8(u8::from(self.debug));
        writer.write_u8(u8::from(self.fault));
        writer.write_u32(self.breakpoint);
    }

    /// Deserialises a brain; the mod handle is fixed up separately.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        let id = ImId::from_u16(reader.read_u16()?);
        let mod_id = ModId::from_u32(reader.read_u32()?);
        let vm = Vm::load(reader)?;
        let mut msg = BrainMsg { len: reader.read_u8()?, data: [0; BRAIN_MSG_CAP] };
        for word in &mut msg.data {
            *word = reader.read_word()?;
        }
        let debug = reader.read_u8()? != 0;
        let fault = reader.read_u8()? != 0;
        let breakpoint = reader.read_u32()?;
        Ok(Self { id, mod_id, module: None, vm, msg, debug, fault, breakpoint })
    }
}

/// Builds a brain from a lane payload: one optional mod id.
#[must_use]
pub fn make(api: &mut ChunkApi<'_>, id: ImId, data: &[Word]) -> Brain {
    let mut brain = Brain::new(id);
    if let Some(&word) = data.first() {
        if ModId::validate(word) {
            set_mod(&mut brain, api.view, ModId::from_u32(word as u32));
        }
    }
    brain
}

/// Re-resolves the mod handle after a load.
pub fn load_fixup(brain: &mut Brain, view: &WorldView) {
    if !brain.mod_id.is_nil() {
        brain.module = view.mods.get(brain.mod_id);
        debug_assert!(brain.module.is_some());
    }
}

fn set_mod(brain: &mut Brain, view: &WorldView, id: ModId) {
    brain.mod_id = id;
    brain.module = if id.is_nil() { None } else { view.mods.get(id) };
    brain.fault = !id.is_nil() && brain.module.is_none();
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Brain> {
    match chunk.state_mut(id)? {
        ActiveState::Brain(state) => Some(state),
        _ => None,
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    if let Some(brain) = get(api.chunk, id) {
        brain.mod_id = ModId::NIL;
        brain.module = None;
        brain.fault = false;
        brain.debug = false;
        brain.breakpoint = IP_NIL;
        brain.msg = BrainMsg::default();
        brain.vm.reset();
    }
}

fn push_msg(brain: &mut Brain, args: &[Word]) {
    let len = args.len().min(BRAIN_MSG_CAP);
    for ix in 0..len {
        brain.vm.push(args[len - ix - 1]);
    }
    brain.vm.push(len as Word);
}

// -----------------------------------------------------------------------------
// step
// -----------------------------------------------------------------------------

fn step_specs(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) -> Option<Word> {
    if !check_args(api, id, Io::Specs, args.len(), 1) {
        return None;
    }
    let Some(spec) = Spec::from_word(args[0]) else {
        api.log(id, Io::Specs.as_word(), IoErr::A0Invalid.as_word());
        return None;
    };
    specs_args(&api.view.db.tapes, spec, &args[1..])
}

/// Dispatches one VM-issued IO request.
fn step_io(api: &mut ChunkApi<'_>, id: ImId, req: &[Word]) {
    let (atom, dst_raw) = vm_unpack(req[0]);
    let dst = if dst_raw == 0 { id } else { ImId::from_word(Word::from(dst_raw)) };
    let args = &req[1..];

    let Some(verb) = Io::from_word(Word::from(atom)) else {
        api.log(id, Io::Step.as_word(), IoErr::VmFault.as_word());
        if let Some(brain) = get(api.chunk, id) {
            brain.vm.io_fault();
        }
        return;
    };

    let ok = match verb {
        Io::Recv => {
            if let Some(brain) = get(api.chunk, id) {
                let msg = brain.msg;
                brain.msg = BrainMsg::default();
                push_msg(brain, &msg.data[..usize::from(msg.len)]);
            }
            true
        }

        Io::Id => {
            if let Some(brain) = get(api.chunk, id) {
                brain.vm.push(Word::from(id.to_u16()));
            }
            true
        }

        Io::Tick => {
            let time = api.time();
            if let Some(brain) = get(api.chunk, id) {
                brain.vm.push(Word::from(time));
            }
            true
        }

        Io::Coord => {
            let coord = api.chunk.coord().to_u64() as Word;
            if let Some(brain) = get(api.chunk, id) {
                brain.vm.push(coord);
            }
            true
        }

        Io::Name => {
            if args.is_empty() {
                let name = api.chunk.name();
                if let Some(brain) = get(api.chunk, id) {
                    brain.vm.push(name);
                }
            } else {
                api.chunk.rename(args[0]);
            }
            true
        }

        Io::Log => {
            if check_args(api, id, Io::Log, args.len(), 2) {
                api.log(id, args[0], args[1]);
            }
            true
        }

        Io::Specs => match step_specs(api, id, args) {
            Some(value) => {
                if let Some(brain) = get(api.chunk, id) {
                    brain.vm.push(value);
                }
                true
            }
            None => false,
        },

        _ => api.io(verb, id, dst, args),
    };

    // Every IO statement leaves a value on the stack.
    if let Some(brain) = get(api.chunk, id) {
        brain.vm.push(if ok { Io::Ok.as_word() } else { Io::Fail.as_word() });
    }
}

fn vm_step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(brain) = get(api.chunk, id) else { return };
    if brain.fault || brain.vm.faulted() {
        return;
    }
    let Some(module) = brain.module.clone() else { return };

    let signal = brain.vm.exec(&module);
    if brain.vm.ip == brain.breakpoint {
        brain.debug = true;
    }

    match signal {
        VmSignal::Fault => {
            api.log(id, Io::Step.as_word(), IoErr::VmFault.as_word());
            return;
        }
        VmSignal::Reset => {
            reset(api, id);
            return;
        }
        VmSignal::Load(mod_id) => {
            let view = api.view;
            if let Some(brain) = get(api.chunk, id) {
                brain.vm.reset();
                set_mod(brain, view, mod_id);
            }
            return;
        }
        VmSignal::None => {}
    }

    let Some(brain) = get(api.chunk, id) else { return };
    if brain.vm.io_pending() {
        let mut buf = [0; IO_CAP];
        let len = brain.vm.io_take(&mut buf);
        if len > 0 {
            step_io(api, id, &buf[..len]);
        }
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(brain) = get(api.chunk, id) else { return };
    if brain.debug {
        return;
    }
    vm_step(api, id);
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if !check_args(api, id, Io::State, args.len(), 1) {
        return;
    }
    let Some(brain) = get(api.chunk, id) else { return };
    let value = match Io::from_word(args[0]) {
        Some(Io::Mod) => Word::from(brain.mod_id.to_u32()),
        Some(Io::DbgBreak) => Word::from(brain.breakpoint),
        _ => {
            api.log(id, Io::State.as_word(), IoErr::A0Invalid.as_word());
            0
        }
    };
    api.io(Io::Return, id, src, &[value]);
}

fn io_mod(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Mod, args.len(), 1) {
        return;
    }
    if !ModId::validate(args[0]) {
        api.log(id, Io::Mod.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    let mod_id = ModId::from_u32(args[0] as u32);

    let view = api.view;
    let unknown = match get(api.chunk, id) {
        Some(brain) => {
            brain.vm.reset();
            set_mod(brain, view, mod_id);
            brain.module.is_none()
        }
        None => return,
    };

    if unknown {
        api.log(id, Io::Mod.as_word(), IoErr::A0Unknown.as_word());
    }
}

fn io_name(api: &mut ChunkApi<'_>, id: ImId, src: ImId, args: &[Word]) {
    if args.is_empty() {
        let name = api.chunk.name();
        api.io(Io::Return, id, src, &[name]);
    } else {
        api.chunk.rename(args[0]);
    }
}

fn io_send(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if let Some(brain) = get(api.chunk, id) {
        let len = args.len().min(BRAIN_MSG_CAP);
        brain.msg.len = len as u8;
        brain.msg.data = [0; BRAIN_MSG_CAP];
        brain.msg.data[..len].copy_from_slice(&args[..len]);
    }
}

fn io_dbg_break(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::DbgBreak, args.len(), 1) {
        return;
    }
    if !(0..=Word::from(u32::MAX)).contains(&args[0]) {
        api.log(id, Io::DbgBreak.as_word(), IoErr::A0Invalid.as_word());
        return;
    }

    if let Some(brain) = get(api.chunk, id) {
        brain.breakpoint = if args[0] == 0 { IP_NIL } else { args[0] as u32 };
        brain.vm.speed = if brain.breakpoint == IP_NIL { BRAIN_SPEED } else { 1 };
    }
}

fn io_dbg_step(api: &mut ChunkApi<'_>, id: ImId) {
    let attached = get(api.chunk, id).map_or(false, |brain| brain.debug);
    if !attached {
        api.log(id, Io::DbgStep.as_word(), IoErr::InvalidState.as_word());
        return;
    }

    let old = match get(api.chunk, id) {
        Some(brain) => std::mem::replace(&mut brain.vm.speed, 1),
        None => return,
    };
    vm_step(api, id);
    if let Some(brain) = get(api.chunk, id) {
        brain.vm.speed = old;
    }
}

/// IO entry point for commands sent from other items or the user.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Return => {
            if check_args(api, dst, Io::Return, args.len(), 1) {
                if let Some(brain) = get(api.chunk, dst) {
                    brain.vm.push(args[0]);
                }
            }
        }
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        // The dispatch result is all the caller needed.
        Io::Pong => {}

        Io::State => io_state(api, dst, src, args),
        Io::Reset => reset(api, dst),

        Io::Id => {
            let value = Word::from(dst.to_u16());
            api.io(Io::Return, dst, src, &[value]);
        }
        Io::Name => io_name(api, dst, src, args),
        Io::Mod => io_mod(api, dst, args),

        Io::Tick => {
            let value = Word::from(api.time());
            api.io(Io::Return, dst, src, &[value]);
        }
        Io::Coord => {
            let value = api.chunk.coord().to_u64() as Word;
            api.io(Io::Return, dst, src, &[value]);
        }
        Io::Specs => {
            let value = step_specs(api, dst, args).unwrap_or(0);
            api.io(Io::Return, dst, src, &[value]);
        }
        Io::Log => {
            if check_args(api, dst, Io::Log, args.len(), 2) {
                api.log(dst, args[0], args[1]);
            }
        }

        Io::Send => io_send(api, dst, args),
        Io::Recv => {
            if let Some(brain) = get(api.chunk, dst) {
                push_msg(brain, args);
            }
        }

        Io::DbgAttach => {
            if let Some(brain) = get(api.chunk, dst) {
                brain.debug = true;
            }
        }
        Io::DbgDetach => {
            if let Some(brain) = get(api.chunk, dst) {
                brain.debug = false;
            }
        }
        Io::DbgBreak => io_dbg_break(api, dst, args),
        Io::DbgStep => io_dbg_step(api, dst),

        _ => {}
    }
}
