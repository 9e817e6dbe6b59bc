//! # Scanner
//!
//! Two modes: a targeted count of one star (like the prober) or a wide
//! sweep walking the inhabited stars of a sector one `io-value` poll at a
//! time. The work cost scales with range; answers come through the shard
//! read model one tick after the cost elapses.

use helion_core::coord::{Coord, SECTOR_SIZE};
use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::io::{Io, IoErr};
use helion_db::items::{ImId, Item};

use crate::chunk::{Chunk, ChunkApi};
use crate::effects::ScanIt;
use crate::items::{check_args, ActiveState};

/// Distance units per work tick.
pub const SCANNER_DIV: u64 = 1000;
/// Sentinel for "no result yet".
pub const SCANNER_EMPTY: Word = -1;

/// Scanner modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ScannerState {
    /// Nothing scheduled.
    #[default]
    Idle = 0,
    /// Sweeping a sector.
    Wide = 1,
    /// Counting one star.
    Target = 2,
}

impl ScannerState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Self::Wide,
            2 => Self::Target,
            _ => Self::Idle,
        }
    }
}

/// Scanner state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scanner {
    /// Own id.
    pub id: ImId,
    /// Mode.
    pub state: ScannerState,
    /// Wide-sweep cursor.
    pub it: ScanIt,
    /// Target-mode star.
    pub coord: Coord,
    /// Target-mode item.
    pub item: Item,
    /// Result; [`SCANNER_EMPTY`] while in flight.
    pub result: Word,
    /// Work ticks left.
    pub work_left: u8,
    /// Work ticks per query.
    pub work_cap: u8,
    /// Query registered, waiting on the read model.
    pub pending: bool,
}

impl Scanner {
    /// Idle scanner.
    #[must_use]
    pub fn new(id: ImId) -> Self {
        Self {
            id,
            state: ScannerState::Idle,
            it: ScanIt::default(),
            coord: Coord::nil(),
            item: Item::Nil,
            result: SCANNER_EMPTY,
            work_left: 0,
            work_cap: 0,
            pending: false,
        }
    }

    /// Serialises the scanner.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.id.to_u16());
        writer.write_u8(self.state as u8);
        writer.write_u64(self.it.sector.to_u64());
        writer.write_u16(self.it.index);
        writer.write_u64(self.coord.to_u64());
        writer.write_u8(self.item as u8);
        writer.write_word(self.result);
        writer.write_u8(self.work_left);
        writer.write_u8(self.work_cap);
        writer.write_u8(u8::from(self.pending));
    }

    /// Deserialises a scanner.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        Ok(Self {
            id: ImId::from_u16(reader.read_u16()?),
            state: ScannerState::from_u8(reader.read_u8()?),
            it: ScanIt {
                sector: Coord::from_u64(reader.read_u64()?),
                index: reader.read_u16()?,
            },
            coord: Coord::from_u64(reader.read_u64()?),
            item: Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil),
            result: reader.read_word()?,
            work_left: reader.read_u8()?,
            work_cap: reader.read_u8()?,
            pending: reader.read_u8()? != 0,
        })
    }
}

fn get(chunk: &mut Chunk, id: ImId) -> Option<&mut Scanner> {
    match chunk.state_mut(id)? {
        ActiveState::Scanner(state) => Some(state),
        _ => None,
    }
}

fn reset(api: &mut ChunkApi<'_>, id: ImId) {
    if let Some(scanner) = get(api.chunk, id) {
        *scanner = Scanner::new(id);
    }
}

/// One tick.
pub fn step(api: &mut ChunkApi<'_>, id: ImId) {
    let Some(scanner) = get(api.chunk, id) else { return };
    if scanner.state == ScannerState::Idle || scanner.result != SCANNER_EMPTY {
        return;
    }

    if scanner.work_left > 0 {
        scanner.work_left -= 1;
        return;
    }

    let origin = api.chunk.coord();
    let Some(scanner) = get(api.chunk, id) else { return };

    match scanner.state {
        ScannerState::Idle => {}

        ScannerState::Wide => {
            let it = scanner.it;
            if !scanner.pending {
                scanner.pending = true;
                api.fx.scan_push(origin, it);
                return;
            }
            let value = api.fx.scan_get(it);
            if let Some(coord) = value {
                if let Some(scanner) = get(api.chunk, id) {
                    scanner.result = coord.to_u64() as Word;
                    scanner.pending = false;
                }
            }
        }

        ScannerState::Target => {
            let (coord, item) = (scanner.coord, scanner.item);
            if !scanner.pending {
                scanner.pending = true;
                api.fx.probe_push(origin, coord, item);
                return;
            }
            let value = api.fx.probe_get(coord, item);
            if let Some(value) = value {
                if let Some(scanner) = get(api.chunk, id) {
                    scanner.result = value.max(0);
                    scanner.pending = false;
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// io
// -----------------------------------------------------------------------------

fn io_state(api: &mut ChunkApi<'_>, id: ImId, src: ImId) {
    let Some(scanner) = get(api.chunk, id) else { return };
    let value = match scanner.state {
        ScannerState::Idle => 0,
        ScannerState::Wide => scanner.it.sector.to_u64() as Word,
        ScannerState::Target => scanner.coord.to_u64() as Word,
    };
    api.io(Io::Return, id, src, &[value]);
}

fn io_scan(api: &mut ChunkApi<'_>, id: ImId, args: &[Word]) {
    if !check_args(api, id, Io::Scan, args.len(), 1) {
        return;
    }

    if !Coord::validate(args[0]) {
        api.log(id, Io::Scan.as_word(), IoErr::A0Invalid.as_word());
        return;
    }
    let mut coord = Coord::from_word(args[0]);

    let item = match args.get(1) {
        Some(&word) if Item::validate(word) => Item::from_word(word),
        Some(_) => {
            api.log(id, Io::Scan.as_word(), IoErr::A1Invalid.as_word());
            return;
        }
        None => Item::Nil,
    };

    let origin = api.chunk.coord();
    let wide = item.is_nil();
    if wide {
        // Aim at the middle of the sector for the range cost.
        let sector = coord.sector();
        coord = Coord::new(sector.x + SECTOR_SIZE / 2, sector.y + SECTOR_SIZE / 2);
    }

    let delta = origin.dist(coord) / SCANNER_DIV;
    if delta >= u64::from(u8::MAX) {
        reset(api, id);
        return;
    }

    if let Some(scanner) = get(api.chunk, id) {
        if wide {
            scanner.state = ScannerState::Wide;
            scanner.it = ScanIt::new(coord);
        } else {
            scanner.state = ScannerState::Target;
            scanner.coord = coord;
            scanner.item = item;
        }
        scanner.work_cap = delta as u8;
        scanner.work_left = delta as u8;
        scanner.result = SCANNER_EMPTY;
        scanner.pending = false;
    }
}

fn io_value(api: &mut ChunkApi<'_>, id: ImId, src: ImId) {
    let Some(scanner) = get(api.chunk, id) else { return };
    let result = scanner.result;
    let state = scanner.state;
    api.io(Io::Return, id, src, &[result]);

    let Some(scanner) = get(api.chunk, id) else { return };
    match state {
        ScannerState::Idle => {}

        ScannerState::Target => {
            if result != SCANNER_EMPTY {
                reset(api, id);
            }
        }

        ScannerState::Wide => {
            if result == SCANNER_EMPTY {
                return;
            }
            if result == 0 {
                // Sweep exhausted.
                reset(api, id);
                return;
            }
            // Rearm for the next star of the sweep.
            scanner.it = scanner.it.next();
            scanner.work_left = scanner.work_cap;
            scanner.result = SCANNER_EMPTY;
            scanner.pending = false;
        }
    }
}

/// IO entry point.
pub fn io(api: &mut ChunkApi<'_>, io: Io, src: ImId, dst: ImId, args: &[Word]) {
    match io {
        Io::Ping => {
            api.io(Io::Pong, dst, src, &[]);
        }
        Io::State => io_state(api, dst, src),
        Io::Scan => io_scan(api, dst, args),
        Io::Value => io_value(api, dst, src),
        Io::Reset => reset(api, dst),
        _ => {}
    }
}
