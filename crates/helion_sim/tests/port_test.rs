//! Pill launcher scenario: dock a preloaded pill, unload into storage,
//! then want-driven reload and relaunch, on both ends of a star pair.

use helion_core::coord::Coord;
use helion_core::{Word, USER_ADMIN};
use helion_db::io::Io;
use helion_db::items::{ImId, Item};
use helion_db::specs::travel_time;
use helion_sim::cargo::Cargo;
use helion_sim::items::port::PORT_LAUNCH_SPEED;
use helion_sim::items::ActiveState;
use helion_sim::World;

const SYS: ImId = ImId::NIL;
const LOAD_TICKS: usize = 20;
const ELEM_COUNT: u8 = 2;

fn step_for(world: &mut World, ticks: usize) {
    for _ in 0..ticks {
        world.step();
    }
}

fn storage_count(world: &World, star: Coord, id: ImId) -> u16 {
    world
        .chunk(star, |c| match c.state(id) {
            Some(ActiveState::Storage(storage)) => storage.count,
            _ => u16::MAX,
        })
        .expect("chunk")
}

#[test]
fn test_port_pill_cycle() {
    let mut world = World::new(0, 2).expect("world");
    let stars: Vec<Coord> = world.sector(Coord::center()).stars.iter().map(|s| s.coord).collect();
    let (src, dst) = (stars[0], stars[1]);
    assert!(world.chunk_alloc(src, USER_ADMIN));
    assert!(world.chunk_alloc(dst, USER_ADMIN));

    for &star in &[src, dst] {
        world.chunk_create(star, Item::Port);
        world.chunk_create(star, Item::Storage);
        world.chunk_create(star, Item::Worker);
    }
    let port_id = ImId::new(Item::Port, 1);
    let storage_id = ImId::new(Item::Storage, 1);

    // One step for the items to be created.
    world.step();

    // Preload each pad with a pill of (elem-a, 2).
    let pill_data = Cargo::new(Item::ElemA, ELEM_COUNT).to_word();
    world.lanes_arrive(src, Item::Pill, dst, &[pill_data]);
    world.lanes_arrive(dst, Item::Pill, src, &[pill_data]);

    let elem_a = Word::from(Item::ElemA as u8);
    world.chunk_io(src, Io::Item, SYS, storage_id, &[elem_a]);
    world.chunk_io(dst, Io::Item, SYS, storage_id, &[elem_a]);

    let dst_word = dst.to_u64() as Word;
    let src_word = src.to_u64() as Word;

    for _ in 0..4 {
        // Phase 1: no manifest, dock and strip the pill into storage.
        world.chunk_io(src, Io::Item, SYS, port_id, &[0]);
        world.chunk_io(dst, Io::Item, SYS, port_id, &[0]);
        world.chunk_io(src, Io::Target, SYS, port_id, &[dst_word]);
        world.chunk_io(dst, Io::Target, SYS, port_id, &[src_word]);
        world.chunk_io(src, Io::Activate, SYS, port_id, &[]);
        world.chunk_io(dst, Io::Activate, SYS, port_id, &[]);

        step_for(&mut world, LOAD_TICKS);

        assert_eq!(storage_count(&world, src, storage_id), u16::from(ELEM_COUNT - 1));
        assert_eq!(storage_count(&world, dst, storage_id), u16::from(ELEM_COUNT - 1));
        world.chunk_io(src, Io::Reset, SYS, port_id, &[]);
        world.chunk_io(dst, Io::Reset, SYS, port_id, &[]);

        // Each side launched its emptied pill at the other.
        step_for(&mut world, travel_time(PORT_LAUNCH_SPEED, src, dst) as usize + 2);

        // Phase 2: want (elem-a, 2), reload from storage and relaunch.
        let manifest = [elem_a, Word::from(ELEM_COUNT)];
        world.chunk_io(src, Io::Item, SYS, port_id, &manifest);
        world.chunk_io(dst, Io::Item, SYS, port_id, &manifest);
        world.chunk_io(src, Io::Target, SYS, port_id, &[dst_word]);
        world.chunk_io(dst, Io::Target, SYS, port_id, &[src_word]);
        world.chunk_io(src, Io::Activate, SYS, port_id, &[]);
        world.chunk_io(dst, Io::Activate, SYS, port_id, &[]);

        step_for(&mut world, LOAD_TICKS);

        assert_eq!(storage_count(&world, src, storage_id), 0);
        assert_eq!(storage_count(&world, dst, storage_id), 0);
        world.chunk_io(src, Io::Reset, SYS, port_id, &[]);
        world.chunk_io(dst, Io::Reset, SYS, port_id, &[]);

        step_for(&mut world, travel_time(PORT_LAUNCH_SPEED, src, dst) as usize + 2);
    }
}
