//! Read-model machines: prober counts across stars, the scanner sweeps a
//! sector, and the lab pushes learn-bits through the bus.

use helion_core::coord::Coord;
use helion_core::{Word, USER_ADMIN};
use helion_db::io::Io;
use helion_db::items::{ImId, Item};
use helion_sim::items::ActiveState;
use helion_sim::World;

const SYS: ImId = ImId::NIL;

fn reply_value(world: &World, star: Coord, test_id: ImId) -> Option<Word> {
    world
        .chunk(star, |c| match c.state(test_id) {
            Some(ActiveState::Test(test)) if test.io == Io::Return => Some(test.args[0]),
            _ => None,
        })
        .flatten()
}

#[test]
fn test_prober_counts_remote_items() {
    let mut world = World::new(21, 2).expect("world");
    let stars: Vec<Coord> = world.sector(Coord::center()).stars.iter().map(|s| s.coord).collect();
    let (here, there) = (stars[0], stars[1]);
    assert!(world.chunk_alloc(here, USER_ADMIN));
    assert!(world.chunk_alloc(there, USER_ADMIN));

    world.chunk_create(here, Item::Prober);
    world.chunk_create(here, Item::Test);
    for _ in 0..3 {
        world.chunk_create(there, Item::Worker);
    }
    world.step();

    let prober_id = ImId::new(Item::Prober, 1);
    let test_id = ImId::new(Item::Test, 1);

    world.chunk_io(
        here,
        Io::Probe,
        SYS,
        prober_id,
        &[Word::from(Item::Worker as u8), there.to_u64() as Word],
    );

    // Work cost, registration, resolution, then the value poll.
    let mut value = None;
    for _ in 0..16 {
        world.step();
        world.chunk_io(here, Io::Value, test_id, prober_id, &[]);
        value = reply_value(&world, here, test_id).filter(|&v| v >= 0);
        if value.is_some() {
            break;
        }
    }
    assert_eq!(value, Some(3));

    // The prober resets after handing out its result.
    world.chunk(here, |c| match c.state(prober_id) {
        Some(ActiveState::Prober(prober)) => assert!(prober.item.is_nil()),
        _ => panic!("prober missing"),
    });
}

#[test]
fn test_scanner_wide_sweep() {
    let mut world = World::new(22, 2).expect("world");
    let stars: Vec<Coord> = world.sector(Coord::center()).stars.iter().map(|s| s.coord).collect();
    assert!(world.chunk_alloc(stars[0], USER_ADMIN));
    assert!(world.chunk_alloc(stars[2], USER_ADMIN));

    world.chunk_create(stars[0], Item::Scanner);
    world.chunk_create(stars[0], Item::Test);
    world.step();

    let scanner_id = ImId::new(Item::Scanner, 1);
    let test_id = ImId::new(Item::Test, 1);

    world.chunk_io(stars[0], Io::Scan, SYS, scanner_id, &[Coord::center().to_u64() as Word]);

    let mut hits = Vec::new();
    for _ in 0..64 {
        world.step();
        world.chunk_io(stars[0], Io::Value, test_id, scanner_id, &[]);
        match reply_value(&world, stars[0], test_id) {
            // -1 is "not ready yet", 0 is "sweep exhausted".
            Some(-1) | None => {}
            Some(0) => break,
            Some(value) => hits.push(Coord::from_word(value)),
        }
        if hits.len() == 2 {
            break;
        }
    }

    // The sweep walks the inhabited stars in sector order.
    assert_eq!(hits, vec![stars[0], stars[2]]);
}

#[test]
fn test_lab_learns_through_the_bus() {
    let user = 1;
    let mut world = World::new(23, 1).expect("world");
    let star = world.sector(Coord::center()).stars[0].coord;
    assert!(world.chunk_alloc(star, user));

    world.chunk_create(star, Item::Lab);
    world.chunk_create(star, Item::Extract);
    world.chunk_create(star, Item::Worker);
    world.step();

    let lab_id = ImId::new(Item::Lab, 1);
    let extract_id = ImId::new(Item::Extract, 1);

    assert!(!world.tech().known(user, Item::ElemG));
    world.chunk_io(star, Io::Item, SYS, lab_id, &[Word::from(Item::ElemG as u8)]);

    for _ in 0..64 {
        world.chunk_mut(star, |c| {
            c.ports_produce(extract_id, Item::ElemG);
        });
        world.step();
        if world.tech().known(user, Item::ElemG) {
            break;
        }
    }

    assert!(world.tech().known(user, Item::ElemG));
    // The lab clears its selection once the last bit lands.
    world.chunk(star, |c| match c.state(lab_id) {
        Some(ActiveState::Lab(lab)) => assert!(lab.item.is_nil()),
        _ => panic!("lab missing"),
    });
}
