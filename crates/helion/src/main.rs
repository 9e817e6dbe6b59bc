//! # Helion
//!
//! Headless entry point: builds or loads a world, bootstraps a home star
//! on fresh seeds, then ticks the simulation at the requested pace while
//! listening for commands on stdin.
//!
//! Exit code 0 on a clean quit; 1 on a load failure or unrecoverable
//! fault.

use std::io::BufRead;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use tracing_subscriber::EnvFilter;

use helion_core::coord::Coord;
use helion_core::USER_ADMIN;
use helion_db::items::Item;
use helion_sim::proxy::Proxy;
use helion_sim::World;

/// Target ticks per second for each speed setting; `None` is uncapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Speed {
    Pause,
    Slow,
    Fast,
    Faster,
    Fastest,
}

impl Speed {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "pause" => Some(Self::Pause),
            "slow" => Some(Self::Slow),
            "fast" => Some(Self::Fast),
            "faster" => Some(Self::Faster),
            "fastest" => Some(Self::Fastest),
            _ => None,
        }
    }

    fn ticks_per_sec(self) -> Option<u64> {
        match self {
            Self::Pause => Some(0),
            Self::Slow => Some(1),
            Self::Fast => Some(10),
            Self::Faster => Some(100),
            Self::Fastest => None,
        }
    }
}

/// Parsed command line.
struct Args {
    seed: u64,
    load: Option<String>,
    save: Option<String>,
    speed: Speed,
    ticks: Option<u64>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        seed: 0,
        load: None,
        save: None,
        speed: Speed::Fast,
        ticks: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| {
            it.next().ok_or_else(|| format!("{name} expects a value"))
        };
        match arg.as_str() {
            "--seed" => {
                args.seed = value("--seed")?
                    .parse()
                    .map_err(|err| format!("bad --seed: {err}"))?;
            }
            "--load" => args.load = Some(value("--load")?),
            "--save" => args.save = Some(value("--save")?),
            "--speed" => {
                let raw = value("--speed")?;
                args.speed = Speed::parse(&raw)
                    .ok_or_else(|| format!("bad --speed '{raw}'"))?;
            }
            "--ticks" => {
                args.ticks = Some(
                    value("--ticks")?
                        .parse()
                        .map_err(|err| format!("bad --ticks: {err}"))?,
                );
            }
            other => return Err(format!("unknown flag '{other}'")),
        }
    }
    Ok(args)
}

/// Stdin commands, forwarded to the run loop.
enum Command {
    Quit,
    Save,
    Speed(Speed),
}

fn spawn_stdin() -> Receiver<Command> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("helion-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let mut words = line.split_whitespace();
                let command = match (words.next(), words.next()) {
                    (Some("quit"), _) => Some(Command::Quit),
                    (Some("save"), _) => Some(Command::Save),
                    (Some("speed"), Some(value)) => Speed::parse(value).map(Command::Speed),
                    _ => None,
                };
                match command {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None => eprintln!("commands: quit | save | speed <pause|slow|fast|faster|fastest>"),
                }
            }
        })
        .expect("stdin thread spawn");
    rx
}

/// Claims the first star of the home sector and seeds a minimal base.
fn bootstrap(world: &mut World) {
    let star = world.sector(Coord::center()).stars[0].coord;
    if !world.chunk_alloc(star, USER_ADMIN) {
        return;
    }

    world.chunk_create(star, Item::Extract);
    world.chunk_create(star, Item::Printer);
    world.chunk_create(star, Item::Assembly);
    world.chunk_create(star, Item::Brain);
    for _ in 0..4 {
        world.chunk_create(star, Item::Worker);
        world.chunk_create(star, Item::Solar);
    }
    tracing::info!(coord = ?star, "home star claimed");
}

fn save_world(world: &World, path: &str) -> bool {
    match std::fs::write(path, world.save()) {
        Ok(()) => {
            tracing::info!(path, "world saved");
            true
        }
        Err(err) => {
            tracing::error!(path, ?err, "save failed");
            false
        }
    }
}

fn run() -> i32 {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("helion: {err}");
            return 1;
        }
    };

    let mut world = match &args.load {
        Some(path) => {
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    eprintln!("helion: cannot read '{path}': {err}");
                    return 1;
                }
            };
            match World::load(&bytes) {
                Ok(world) => world,
                Err(err) => {
                    eprintln!("helion: cannot load '{path}': {err}");
                    return 1;
                }
            }
        }
        None => {
            let mut world = match World::new(args.seed, 0) {
                Ok(world) => world,
                Err(err) => {
                    eprintln!("helion: content tables: {err}");
                    return 1;
                }
            };
            bootstrap(&mut world);
            world
        }
    };

    let commands = spawn_stdin();
    let mut speed = args.speed;
    let mut ran: u64 = 0;

    loop {
        match commands.try_recv() {
            Ok(Command::Quit) => break,
            Ok(Command::Save) => {
                if let Some(path) = &args.save {
                    save_world(&world, path);
                } else {
                    eprintln!("no --save path configured");
                }
            }
            Ok(Command::Speed(next)) => {
                tracing::info!(?next, "speed changed");
                speed = next;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        match speed.ticks_per_sec() {
            Some(0) => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Some(rate) => {
                let start = Instant::now();
                world.step();
                let budget = Duration::from_micros(1_000_000 / rate);
                if let Some(rest) = budget.checked_sub(start.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
            None => world.step(),
        }

        ran += 1;
        if ran % 1000 == 0 {
            let proxy = Proxy::new(&world);
            tracing::debug!(
                time = proxy.time(),
                chunks = proxy.chunks_len(),
                lanes = proxy.lanes_len(),
                "tick"
            );
        }

        if args.ticks.is_some_and(|limit| ran >= limit) {
            break;
        }
    }

    if let Some(path) = &args.save {
        if !save_world(&world, path) {
            return 1;
        }
    }
    0
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().expect("directive")))
        .init();

    std::process::exit(run());
}
