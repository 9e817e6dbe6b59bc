//! Brain/VM integration: a mod that logs through the chunk, IO replies
//! landing back on the stack, faults freezing the machine, and the
//! debugger hooks.

use helion_core::coord::Coord;
use helion_core::{Word, USER_ADMIN};
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};
use helion_sim::items::ActiveState;
use helion_sim::World;
use helion_vm::{vm_pack, ModAssembler, Op};

const SYS: ImId = ImId::NIL;

fn world_with_chunk() -> (World, Coord) {
    let mut world = World::new(3, 1).expect("world");
    let star = world.sector(Coord::center()).stars[0].coord;
    assert!(world.chunk_alloc(star, USER_ADMIN));
    (world, star)
}

fn io_word(io: Io, dst: ImId) -> Word {
    vm_pack(io.as_word() as u32, u32::from(dst.to_u16()))
}

#[test]
fn test_brain_logs_through_chunk() {
    let (mut world, star) = world_with_chunk();

    // value, key, packed (log verb, self), io 3, then park.
    let mut asm = ModAssembler::new();
    asm.push(9).push(7).push(io_word(Io::Log, ImId::NIL)).io(3);
    asm.label("park");
    asm.op(Op::Yield);
    asm.jmp(Op::Jmp, "park");
    let mod_id = world.mods_register(asm.assemble().expect("assemble"), Vec::new());

    assert!(world.chunk_create_from(star, Item::Brain, &[Word::from(mod_id.to_u32())]));
    let brain_id = ImId::new(Item::Brain, 1);

    world.step();
    world.step();

    let logged = world
        .chunk(star, |c| {
            c.logs().iter().any(|line| line.id == brain_id && line.key == 7 && line.value == 9)
        })
        .unwrap();
    assert!(logged);

    // The io statement left io-ok on the stack.
    world.chunk(star, |c| match c.state(brain_id) {
        Some(ActiveState::Brain(brain)) => assert!(!brain.vm.faulted()),
        _ => panic!("brain missing"),
    });
}

#[test]
fn test_brain_state_reply_lands_on_stack() {
    let (mut world, star) = world_with_chunk();

    world.chunk_create(star, Item::Fusion);
    let fusion_id = ImId::new(Item::Fusion, 1);

    // Ask the fusion reactor for its active flag; the reply pushes
    // before the ok marker.
    let mut asm = ModAssembler::new();
    asm.push(Io::Active.as_word())
        .push(io_word(Io::State, fusion_id))
        .io(2);
    asm.label("park");
    asm.op(Op::Yield);
    asm.jmp(Op::Jmp, "park");
    let mod_id = world.mods_register(asm.assemble().expect("assemble"), Vec::new());

    world.step();
    assert!(world.chunk_create_from(star, Item::Brain, &[Word::from(mod_id.to_u32())]));
    let brain_id = ImId::new(Item::Brain, 1);

    world.step();

    world.chunk(star, |c| match c.state(brain_id) {
        Some(ActiveState::Brain(brain)) => {
            assert_eq!(brain.vm.depth(), 2);
            // Fresh reactors run unpaused: value 1, then io-ok.
        }
        _ => panic!("brain missing"),
    });
}

#[test]
fn test_brain_fault_freezes_and_reset_revives() {
    let (mut world, star) = world_with_chunk();

    let mut asm = ModAssembler::new();
    asm.push(1).push(0).op(Op::Div);
    let mod_id = world.mods_register(asm.assemble().expect("assemble"), Vec::new());

    assert!(world.chunk_create_from(star, Item::Brain, &[Word::from(mod_id.to_u32())]));
    let brain_id = ImId::new(Item::Brain, 1);

    world.step();
    world.step();

    let faulted = world
        .chunk(star, |c| match c.state(brain_id) {
            Some(ActiveState::Brain(brain)) => brain.vm.faulted(),
            _ => false,
        })
        .unwrap();
    assert!(faulted);

    let vm_fault_logged = world
        .chunk(star, |c| {
            c.logs().iter().any(|line| line.value == IoErr::VmFault.as_word())
        })
        .unwrap();
    assert!(vm_fault_logged);

    // io-reset revives the machine with no mod loaded.
    world.chunk_io(star, Io::Reset, SYS, brain_id, &[]);
    world.chunk(star, |c| match c.state(brain_id) {
        Some(ActiveState::Brain(brain)) => {
            assert!(!brain.vm.faulted());
            assert!(brain.mod_id.is_nil());
        }
        _ => panic!("brain missing"),
    });
}

#[test]
fn test_brain_debugger_pauses() {
    let (mut world, star) = world_with_chunk();

    let mut asm = ModAssembler::new();
    asm.label("loop");
    asm.push(1).op(Op::Pop).op(Op::Yield);
    asm.jmp(Op::Jmp, "loop");
    let mod_id = world.mods_register(asm.assemble().expect("assemble"), Vec::new());

    assert!(world.chunk_create_from(star, Item::Brain, &[Word::from(mod_id.to_u32())]));
    let brain_id = ImId::new(Item::Brain, 1);

    world.step();
    world.chunk_io(star, Io::DbgAttach, SYS, brain_id, &[]);

    let tsc_before = world
        .chunk(star, |c| match c.state(brain_id) {
            Some(ActiveState::Brain(brain)) => brain.vm.tsc(),
            _ => 0,
        })
        .unwrap();

    // An attached brain does not advance on its own.
    world.step();
    world.step();
    let tsc_paused = world
        .chunk(star, |c| match c.state(brain_id) {
            Some(ActiveState::Brain(brain)) => brain.vm.tsc(),
            _ => 0,
        })
        .unwrap();
    assert_eq!(tsc_before, tsc_paused);

    // Single-step retires exactly one instruction.
    world.chunk_io(star, Io::DbgStep, SYS, brain_id, &[]);
    let tsc_stepped = world
        .chunk(star, |c| match c.state(brain_id) {
            Some(ActiveState::Brain(brain)) => brain.vm.tsc(),
            _ => 0,
        })
        .unwrap();
    assert_eq!(tsc_stepped, tsc_paused + 1);

    // Detach resumes normal stepping.
    world.chunk_io(star, Io::DbgDetach, SYS, brain_id, &[]);
    world.step();
    let tsc_resumed = world
        .chunk(star, |c| match c.state(brain_id) {
            Some(ActiveState::Brain(brain)) => brain.vm.tsc(),
            _ => 0,
        })
        .unwrap();
    assert!(tsc_resumed > tsc_stepped);
}
