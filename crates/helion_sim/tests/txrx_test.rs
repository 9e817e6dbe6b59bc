//! Transmit/receive round trips across two stars: unconfigured drops,
//! payload delivery, buffer saturation and reset.

use helion_core::coord::Coord;
use helion_core::{Word, USER_ADMIN};
use helion_db::io::Io;
use helion_db::items::{ImId, Item};
use helion_db::specs::travel_time;
use helion_sim::items::transmit::TRANSMIT_SPEED;
use helion_sim::items::ActiveState;
use helion_sim::World;

const SYS: ImId = ImId::NIL;

fn wait_travel(world: &mut World, speed: u32, src: Coord, dst: Coord) {
    // Launch flush + flight + arrival processing.
    let ticks = travel_time(speed, src, dst).max(1) + 2;
    for _ in 0..ticks {
        world.step();
    }
}

fn check_recv(world: &World, star: Coord, test_id: ImId, rx: ImId, payload: &[Word]) -> bool {
    world
        .chunk(star, |c| match c.state(test_id) {
            Some(ActiveState::Test(test)) => test.check(Io::Recv, rx, payload),
            _ => false,
        })
        .unwrap_or(false)
}

#[test]
fn test_txrx_round_trip() {
    let mut world = World::new(0, 2).expect("world");
    let stars: Vec<Coord> = world.sector(Coord::center()).stars.iter().map(|s| s.coord).collect();
    let (src, dst) = (stars[0], stars[1]);
    assert!(world.chunk_alloc(src, USER_ADMIN));
    assert!(world.chunk_alloc(dst, USER_ADMIN));

    world.chunk_create(src, Item::Transmit);
    world.chunk_create(dst, Item::Receive);
    world.chunk_create(dst, Item::Test);
    world.step();

    let id_tx = ImId::new(Item::Transmit, 1);
    let id_rx = ImId::new(Item::Receive, 1);
    let id_test = ImId::new(Item::Test, 1);

    let payload: [Word; 3] = [
        0x1111_1111_1111_1111,
        0x2222_2222_2222_2222,
        0x3333_3333_3333_3333,
    ];

    // Nothing buffered: zero-length recv.
    world.chunk_io(dst, Io::Receive, id_test, id_rx, &[]);
    assert!(check_recv(&world, dst, id_test, id_rx, &[]));

    // Unconfigured transmitter refuses to send.
    world.chunk_io(src, Io::Transmit, SYS, id_tx, &payload);
    wait_travel(&mut world, TRANSMIT_SPEED, src, dst);
    world.chunk_io(dst, Io::Receive, id_test, id_rx, &[]);
    assert!(check_recv(&world, dst, id_test, id_rx, &[]));

    // Transmitter configured but the receiver not listening yet: the
    // packet crosses and is dropped on arrival.
    world.chunk_io(src, Io::Target, SYS, id_tx, &[dst.to_u64() as Word]);
    world.chunk_io(src, Io::Transmit, SYS, id_tx, &payload);
    wait_travel(&mut world, TRANSMIT_SPEED, src, dst);
    world.chunk_io(dst, Io::Receive, id_test, id_rx, &[]);
    assert!(check_recv(&world, dst, id_test, id_rx, &[]));

    // Receiver listening to the source.
    world.chunk_io(dst, Io::Target, SYS, id_rx, &[src.to_u64() as Word]);

    // Round trips.
    for _ in 0..5 {
        world.chunk_io(src, Io::Transmit, SYS, id_tx, &payload);
        wait_travel(&mut world, TRANSMIT_SPEED, src, dst);

        world.chunk_io(dst, Io::Receive, id_test, id_rx, &[]);
        assert!(check_recv(&world, dst, id_test, id_rx, &payload));

        world.chunk_io(dst, Io::Receive, id_test, id_rx, &[]);
        assert!(check_recv(&world, dst, id_test, id_rx, &[]));
    }

    // Saturation: buffer depth is one, only the latest survives.
    for _ in 0..5 {
        world.chunk_io(src, Io::Transmit, SYS, id_tx, &payload);
        world.step();
        world.chunk_io(src, Io::Transmit, SYS, id_tx, &payload);

        wait_travel(&mut world, TRANSMIT_SPEED, src, dst);

        world.chunk_io(dst, Io::Receive, id_test, id_rx, &[]);
        assert!(check_recv(&world, dst, id_test, id_rx, &payload));

        world.chunk_io(dst, Io::Receive, id_test, id_rx, &[]);
        assert!(check_recv(&world, dst, id_test, id_rx, &[]));
    }

    // Reset detaches both ends.
    world.chunk_io(src, Io::Reset, SYS, id_tx, &[]);
    world.chunk_io(dst, Io::Reset, SYS, id_rx, &[]);

    world.chunk_io(src, Io::Transmit, SYS, id_tx, &payload);
    wait_travel(&mut world, TRANSMIT_SPEED, src, dst);
    world.chunk_io(dst, Io::Receive, id_test, id_rx, &[]);
    assert!(check_recv(&world, dst, id_test, id_rx, &[]));
}
