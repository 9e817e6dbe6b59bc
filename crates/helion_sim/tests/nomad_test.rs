//! Nomad migration: pack a brain, launch across the lanes, and unpack
//! the whole kit on arrival with the carried mod seeding the brain.

use helion_core::coord::Coord;
use helion_core::{Word, USER_ADMIN};
use helion_db::io::Io;
use helion_db::items::{ImId, Item};
use helion_db::specs::travel_time;
use helion_sim::items::nomad::NOMAD_SPEED;
use helion_sim::items::ActiveState;
use helion_sim::World;
use helion_vm::{ModAssembler, Op};

const SYS: ImId = ImId::NIL;

#[test]
fn test_nomad_launch_and_arrival() {
    let mut world = World::new(5, 2).expect("world");
    let stars: Vec<Coord> = world.sector(Coord::center()).stars.iter().map(|s| s.coord).collect();
    let (src, dst) = (stars[0], stars[1]);
    assert!(world.chunk_alloc(src, USER_ADMIN));
    assert!(world.chunk_alloc(dst, USER_ADMIN));

    let mut asm = ModAssembler::new();
    asm.label("park");
    asm.op(Op::Yield);
    asm.jmp(Op::Jmp, "park");
    let mod_id = world.mods_register(asm.assemble().expect("assemble"), Vec::new());

    world.chunk_create(src, Item::Nomad);
    world.chunk_create(src, Item::Brain);
    world.step();

    let nomad_id = ImId::new(Item::Nomad, 1);
    let brain_id = ImId::new(Item::Brain, 1);

    // Carry the mod and a memory word across.
    world.chunk_io(src, Io::Mod, SYS, nomad_id, &[Word::from(mod_id.to_u32())]);
    world.chunk_io(src, Io::Set, SYS, nomad_id, &[0, 0x5EED]);

    // Launch, packing the brain on the way out.
    world.chunk_io(
        src,
        Io::Launch,
        SYS,
        nomad_id,
        &[dst.to_u64() as Word, Word::from(brain_id.to_u16())],
    );

    // Both entities left the source chunk.
    assert_eq!(world.chunk(src, |c| c.count(Item::Nomad)), Some(0));
    assert_eq!(world.chunk(src, |c| c.count(Item::Brain)), Some(0));

    let ticks = travel_time(NOMAD_SPEED, src, dst).max(1) + 2;
    for _ in 0..ticks {
        world.step();
    }

    // The nomad landed and unpacked its cargo.
    assert_eq!(world.chunk(dst, |c| c.count(Item::Nomad)), Some(1));
    assert_eq!(world.chunk(dst, |c| c.count(Item::Brain)), Some(1));

    let arrived_nomad = ImId::new(Item::Nomad, 1);
    world.chunk(dst, |c| match c.state(arrived_nomad) {
        Some(ActiveState::Nomad(nomad)) => {
            assert_eq!(nomad.mod_id, mod_id);
            assert_eq!(nomad.memory[0], 0x5EED);
            assert!(nomad.cargo.iter().all(|slot| slot.item.is_nil()));
        }
        _ => panic!("nomad missing"),
    });

    let arrived_brain = ImId::new(Item::Brain, 1);
    world.chunk(dst, |c| match c.state(arrived_brain) {
        Some(ActiveState::Brain(brain)) => assert_eq!(brain.mod_id, mod_id),
        _ => panic!("brain missing"),
    });
}

#[test]
fn test_nomad_load_unload() {
    let mut world = World::new(6, 1).expect("world");
    let star = world.sector(Coord::center()).stars[0].coord;
    assert!(world.chunk_alloc(star, USER_ADMIN));

    world.chunk_create(star, Item::Nomad);
    world.chunk_create(star, Item::Extract);
    world.chunk_create(star, Item::Worker);
    world.step();

    let nomad_id = ImId::new(Item::Nomad, 1);
    let extract_id = ImId::new(Item::Extract, 1);

    // Load two elem-a off the extractor's port.
    world.chunk_io(star, Io::Load, SYS, nomad_id, &[Word::from(Item::ElemA as u8), 2]);
    for _ in 0..8 {
        world.chunk_mut(star, |c| c.ports_produce(extract_id, Item::ElemA));
        world.step();
    }

    let count = |world: &World| {
        world
            .chunk(star, |c| match c.state(nomad_id) {
                Some(ActiveState::Nomad(nomad)) => nomad
                    .cargo
                    .iter()
                    .find(|slot| slot.item == Item::ElemA)
                    .map_or(0, |slot| slot.count),
                _ => 0,
            })
            .unwrap()
    };
    assert_eq!(count(&world), 2);

    // Unload everything back out, draining through the extractor's
    // input port.
    world.chunk_io(star, Io::Unload, SYS, nomad_id, &[Word::from(Item::ElemA as u8)]);
    for _ in 0..8 {
        world.chunk_mut(star, |c| {
            c.ports_consume(extract_id);
            c.ports_request(extract_id, Item::ElemA);
        });
        world.step();
    }
    assert_eq!(count(&world), 0);
}
