//! Chunk stepper benchmark: a busy single star and a small multi-star
//! world, stepped hot.

use criterion::{criterion_group, criterion_main, Criterion};

use helion_core::coord::Coord;
use helion_core::{Word, USER_ADMIN};
use helion_db::io::Io;
use helion_db::items::{ImId, Item};
use helion_sim::World;

fn busy_world(shards: usize, stars: usize) -> World {
    let mut world = World::new(0xBE7C_17A2, shards).expect("world");
    let coords: Vec<Coord> = world
        .sector(Coord::center())
        .stars
        .iter()
        .take(stars)
        .map(|s| s.coord)
        .collect();

    for &coord in &coords {
        world.chunk_alloc(coord, USER_ADMIN);
        for _ in 0..4 {
            world.chunk_create(coord, Item::Extract);
            world.chunk_create(coord, Item::Printer);
            world.chunk_create(coord, Item::Worker);
        }
        world.chunk_create(coord, Item::Storage);
        world.chunk_create(coord, Item::Solar);
        world.step();

        for seq in 1..=4 {
            world.chunk_io(
                coord,
                Io::Tape,
                ImId::NIL,
                ImId::new(Item::Extract, seq),
                &[Word::from(Item::ElemA as u8)],
            );
            world.chunk_io(
                coord,
                Io::Tape,
                ImId::NIL,
                ImId::new(Item::Printer, seq),
                &[Word::from(Item::Monobarex as u8)],
            );
        }
        world.chunk_io(
            coord,
            Io::Item,
            ImId::NIL,
            ImId::new(Item::Storage, 1),
            &[Word::from(Item::Monobarex as u8)],
        );
    }
    world
}

fn bench_single_chunk(c: &mut Criterion) {
    let mut world = busy_world(1, 1);
    c.bench_function("chunk_step_busy", |b| {
        b.iter(|| world.step());
    });
}

fn bench_multi_shard(c: &mut Criterion) {
    let mut world = busy_world(4, 8);
    c.bench_function("world_step_8_stars_4_shards", |b| {
        b.iter(|| world.step());
    });
}

criterion_group!(benches, bench_single_chunk, bench_multi_shard);
criterion_main!(benches);
