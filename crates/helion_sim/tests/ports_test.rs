//! Worker/ports matchmaker scenarios: one producer one consumer, two on
//! one, one on two, and the reset accounting rules.

use helion_core::coord::Coord;
use helion_core::USER_ADMIN;
use helion_db::items::{ImId, Item};
use helion_sim::World;

fn world_with_chunk() -> (World, Coord) {
    let mut world = World::new(0, 1).expect("world");
    let star = world.sector(Coord::center()).stars[0].coord;
    assert!(world.chunk_alloc(star, USER_ADMIN));
    (world, star)
}

#[test]
fn test_ports_1on1() {
    let (mut world, star) = world_with_chunk();

    let item = Item::ElemA;
    let src = ImId::new(Item::Extract, 1);
    let dst = ImId::new(Item::Printer, 1);

    world.chunk_create(star, Item::Extract);
    world.chunk_create(star, Item::Printer);
    world.chunk_create(star, Item::Worker);
    world.step();

    for _ in 0..3 {
        assert_eq!(world.chunk_mut(star, |c| c.ports_produce(src, item)), Some(true));
        assert_eq!(world.chunk_mut(star, |c| c.ports_produce(src, item)), Some(false));

        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(Item::Nil));
        world.chunk_mut(star, |c| c.ports_request(dst, item));
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(Item::Nil));

        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(item));
    }
}

#[test]
fn test_ports_2on1() {
    let (mut world, star) = world_with_chunk();

    let item = Item::ElemA;
    let src0 = ImId::new(Item::Extract, 1);
    let src1 = ImId::new(Item::Extract, 2);
    let dst = ImId::new(Item::Printer, 1);

    world.chunk_create(star, Item::Extract);
    world.chunk_create(star, Item::Extract);
    world.chunk_create(star, Item::Printer);
    world.chunk_create(star, Item::Worker);
    world.step();

    for _ in 0..3 {
        assert_eq!(world.chunk_mut(star, |c| c.ports_produce(src1, item)), Some(true));
        assert_eq!(world.chunk_mut(star, |c| c.ports_produce(src0, item)), Some(true));
        world.chunk_mut(star, |c| c.ports_request(dst, item));

        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(item));
        world.chunk_mut(star, |c| c.ports_request(dst, item));

        // One item per worker per tick: the second producer drains on
        // the next tick.
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(item));
    }
}

#[test]
fn test_ports_1on2() {
    let (mut world, star) = world_with_chunk();

    let item = Item::ElemA;
    let src = ImId::new(Item::Extract, 1);
    let dst0 = ImId::new(Item::Printer, 1);
    let dst1 = ImId::new(Item::Printer, 2);

    world.chunk_create(star, Item::Extract);
    world.chunk_create(star, Item::Printer);
    world.chunk_create(star, Item::Printer);
    world.chunk_create(star, Item::Worker);
    world.step();

    for _ in 0..3 {
        world.chunk_mut(star, |c| c.ports_produce(src, item));
        world.chunk_mut(star, |c| c.ports_request(dst1, item));
        world.chunk_mut(star, |c| c.ports_request(dst0, item));

        // Requests service in arrival order: dst1 queued first.
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst0)), Some(Item::Nil));
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst1)), Some(item));
        world.chunk_mut(star, |c| c.ports_produce(src, item));

        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst0)), Some(item));
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst1)), Some(Item::Nil));
    }
}

#[test]
fn test_ports_reset_accounting() {
    let (mut world, star) = world_with_chunk();

    let item = Item::ElemA;
    let src = ImId::new(Item::Extract, 1);
    let dst = ImId::new(Item::Printer, 1);

    world.chunk_create(star, Item::Extract);
    world.chunk_create(star, Item::Printer);
    world.chunk_create(star, Item::Worker);
    world.step();

    for _ in 0..3 {
        // Clean delivery.
        world.chunk_mut(star, |c| c.ports_produce(src, item));
        world.chunk_mut(star, |c| c.ports_request(dst, item));
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(item));
        assert_eq!(world.chunk(star, |c| c.workers().queue), Some(1));

        // Producer reset: the request goes unmatched (fail) and the
        // reset sweeps as one clean op.
        world.chunk_mut(star, |c| c.ports_produce(src, item));
        world.chunk_mut(star, |c| c.ports_reset(src));
        world.chunk_mut(star, |c| c.ports_request(dst, item));
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(Item::Nil));
        assert_eq!(world.chunk(star, |c| c.workers().queue), Some(1));
        assert_eq!(world.chunk(star, |c| c.workers().clean), Some(1));
        assert_eq!(world.chunk(star, |c| c.workers().fail), Some(1));

        // The failed request stays queued and lands next tick.
        world.chunk_mut(star, |c| c.ports_produce(src, item));
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(item));
        assert_eq!(world.chunk(star, |c| c.workers().queue), Some(1));

        // Receiver reset before the match: silent cancel, clean only.
        world.chunk_mut(star, |c| c.ports_produce(src, item));
        world.chunk_mut(star, |c| c.ports_request(dst, item));
        world.chunk_mut(star, |c| c.ports_reset(dst));
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(Item::Nil));
        assert_eq!(world.chunk(star, |c| c.workers().queue), Some(1));
        assert_eq!(world.chunk(star, |c| c.workers().clean), Some(1));
        assert_eq!(world.chunk(star, |c| c.workers().fail), Some(0));

        // The producer's item is still offered; a fresh request takes it.
        world.chunk_mut(star, |c| c.ports_request(dst, item));
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(item));
        assert_eq!(world.chunk(star, |c| c.workers().queue), Some(1));

        // Producer reset with the request in flight: fail plus clean.
        world.chunk_mut(star, |c| c.ports_produce(src, item));
        world.chunk_mut(star, |c| c.ports_request(dst, item));
        world.chunk_mut(star, |c| c.ports_reset(src));
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(Item::Nil));
        assert_eq!(world.chunk(star, |c| c.workers().queue), Some(1));
        assert_eq!(world.chunk(star, |c| c.workers().clean), Some(1));
        assert_eq!(world.chunk(star, |c| c.workers().fail), Some(1));

        // Receiver reset clears the leftover request.
        world.chunk_mut(star, |c| c.ports_reset(dst));
        world.step();
        assert_eq!(world.chunk_mut(star, |c| c.ports_consume(dst)), Some(Item::Nil));
        assert_eq!(world.chunk(star, |c| c.workers().queue), Some(1));
        assert_eq!(world.chunk(star, |c| c.workers().clean), Some(1));
        assert_eq!(world.chunk(star, |c| c.workers().fail), Some(0));
    }
}
