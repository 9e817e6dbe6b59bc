//! # Stars
//!
//! Star descriptors and the deterministic world generator: weighted star
//! classes, elemental abundance rolls and the two-part name generator.
//! Everything derives from the world seed and the sector coordinate, so a
//! sector regenerates identically on every run and every load.

use helion_core::coord::{Coord, SECTOR_SIZE};
use helion_core::rng::SimRng;
use helion_core::save::{Magic, SaveReader, SaveResult, SaveWriter};
use helion_core::symbol::Symbol;

use crate::items::{Item, ITEM_NATURAL_FIRST, ITEM_NATURAL_LAST};

/// Number of natural elements a star can hold.
pub const STAR_ELEMS: usize = (ITEM_NATURAL_LAST - ITEM_NATURAL_FIRST + 1) as usize;

/// A star: position, energy class and remaining elemental abundances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Star {
    /// Absolute position.
    pub coord: Coord,
    /// Energy class; drives the solar budget.
    pub energy: u16,
    /// Remaining natural abundances, indexed by `elem code - 1`.
    pub elems: [u16; STAR_ELEMS],
}

impl Star {
    /// A barren star at `coord`; useful for tests.
    #[must_use]
    pub fn barren(coord: Coord) -> Self {
        Self { coord, energy: 0, elems: [0; STAR_ELEMS] }
    }

    /// Remaining abundance of a natural element.
    #[must_use]
    pub fn elem(&self, item: Item) -> u16 {
        if !item.is_natural() {
            return 0;
        }
        self.elems[item as u8 as usize - 1]
    }

    /// Harvests one unit; false when the star is exhausted for `item`.
    pub fn extract(&mut self, item: Item) -> bool {
        if !item.is_natural() {
            return false;
        }
        let slot = &mut self.elems[item as u8 as usize - 1];
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    /// Serialises the descriptor.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_magic(Magic::Star);
        writer.write_u64(self.coord.to_u64());
        writer.write_u16(self.energy);
        for &val in &self.elems {
            writer.write_u16(val);
        }
        writer.write_magic(Magic::Star);
    }

    /// Deserialises a descriptor.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        reader.expect_magic(Magic::Star)?;
        let coord = Coord::from_u64(reader.read_u64()?);
        let energy = reader.read_u16()?;
        let mut elems = [0u16; STAR_ELEMS];
        for slot in &mut elems {
            *slot = reader.read_u16()?;
        }
        reader.expect_magic(Magic::Star)?;
        Ok(Self { coord, energy, elems })
    }
}

// -----------------------------------------------------------------------------
// classes
// -----------------------------------------------------------------------------

struct RollRange {
    first: Item,
    last: Item,
    min: u16,
    max: u16,
    count: usize,
}

struct StarClass {
    weight: u64,
    energy: (u16, u16),
    ranges: &'static [RollRange],
}

// Weighted star classes. The common yellows carry the light elements;
// rarer classes skew heavy and hot.
static CLASSES: &[StarClass] = &[
    StarClass {
        weight: 60,
        energy: (200, 600),
        ranges: &[
            RollRange { first: Item::ElemA, last: Item::ElemF, min: 4000, max: 16000, count: 5 },
            RollRange { first: Item::ElemG, last: Item::ElemK, min: 100, max: 2000, count: 2 },
        ],
    },
    StarClass {
        weight: 25,
        energy: (400, 1200),
        ranges: &[
            RollRange { first: Item::ElemA, last: Item::ElemF, min: 2000, max: 8000, count: 4 },
            RollRange { first: Item::ElemG, last: Item::ElemK, min: 1000, max: 8000, count: 4 },
        ],
    },
    StarClass {
        weight: 10,
        energy: (1000, 4000),
        ranges: &[
            RollRange { first: Item::ElemA, last: Item::ElemF, min: 500, max: 4000, count: 3 },
            RollRange { first: Item::ElemG, last: Item::ElemK, min: 4000, max: 16000, count: 5 },
        ],
    },
    StarClass {
        weight: 5,
        energy: (4000, 16000),
        ranges: &[
            RollRange { first: Item::ElemA, last: Item::ElemK, min: 8000, max: 32000, count: 8 },
        ],
    },
];

fn class_pick(rng: &mut SimRng) -> &'static StarClass {
    let total: u64 = CLASSES.iter().map(|class| class.weight).sum();
    let mut value = rng.uni(0, total);
    for class in CLASSES {
        if value < class.weight {
            return class;
        }
        value -= class.weight;
    }
    &CLASSES[CLASSES.len() - 1]
}

fn star_roll(rng: &mut SimRng, coord: Coord) -> Star {
    let class = class_pick(rng);
    let mut star = Star {
        coord,
        energy: rng.uni(u64::from(class.energy.0), u64::from(class.energy.1)) as u16,
        elems: [0; STAR_ELEMS],
    };

    for range in class.ranges {
        let span = u64::from(range.last as u8 - range.first as u8) + 1;
        for _ in 0..range.count {
            let ix = (range.first as u8 - 1) as usize + rng.uni(0, span) as usize;
            star.elems[ix] =
                star.elems[ix].saturating_add(rng.uni(u64::from(range.min), u64::from(range.max)) as u16);
        }
    }

    star
}

// -----------------------------------------------------------------------------
// names
// -----------------------------------------------------------------------------

static NAME_PREFIXES: &[&str] = &[
    "beta", "gama", "nova", "kilo", "ultra", "keto", "sigma", "tera", "vela", "orion", "argo",
    "lyra", "cyra", "dorn", "ixo", "proto",
];

static NAME_SUFFIXES: &[&str] = &[
    "aris", "belar", "cantor", "dulin", "ephor", "ganis", "helos", "irid", "jundar", "koreth",
    "lumen", "moran", "nexar", "ophal", "pryon", "quorin",
];

/// Deterministic star name, derived from the same stream as the roll.
#[must_use]
pub fn star_name(rng: &mut SimRng) -> Symbol {
    let prefix = NAME_PREFIXES[rng.uni(0, NAME_PREFIXES.len() as u64) as usize];
    let suffix = NAME_SUFFIXES[rng.uni(0, NAME_SUFFIXES.len() as u64) as usize];
    Symbol::new(&format!("{prefix}-{suffix}"))
}

// -----------------------------------------------------------------------------
// sectors
// -----------------------------------------------------------------------------

/// A generated sector: its origin and its stars in generation order.
#[derive(Clone, Debug)]
pub struct Sector {
    /// Sector origin (multiple of [`SECTOR_SIZE`]).
    pub coord: Coord,
    /// Stars in deterministic generation order.
    pub stars: Vec<Star>,
}

impl Sector {
    /// The star at `coord`, if the sector rolled one there.
    #[must_use]
    pub fn star_at(&self, coord: Coord) -> Option<&Star> {
        self.stars.iter().find(|star| star.coord == coord)
    }
}

/// Stream seed for a sector: world seed mixed with the sector origin.
#[must_use]
pub fn sector_seed(seed: u64, sector: Coord) -> u64 {
    // splitmix-style finalizer; cheap and stable across platforms.
    let mut mix = seed ^ sector.to_u64().wrapping_mul(0x9E37_79B9_7F4A_7C15);
    mix ^= mix >> 30;
    mix = mix.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    mix ^= mix >> 27;
    mix = mix.wrapping_mul(0x94D0_49BB_1331_11EB);
    mix ^ (mix >> 31)
}

/// Generates a sector. Positions are unique and never the nil coordinate.
#[must_use]
pub fn sector_gen(seed: u64, at: Coord) -> Sector {
    let origin = at.sector();
    let mut rng = SimRng::new(sector_seed(seed, origin));

    let count = rng.uni(8, 17);
    let mut stars: Vec<Star> = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let coord = loop {
            let coord = Coord::new(
                origin.x + rng.uni(0, u64::from(SECTOR_SIZE)) as u32,
                origin.y + rng.uni(0, u64::from(SECTOR_SIZE)) as u32,
            );
            if !coord.is_nil() && !stars.iter().any(|star| star.coord == coord) {
                break coord;
            }
        };
        stars.push(star_roll(&mut rng, coord));
    }

    Sector { coord: origin, stars }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_is_deterministic() {
        let a = sector_gen(42, Coord::center());
        let b = sector_gen(42, Coord::center());
        assert_eq!(a.stars, b.stars);
        assert!(a.stars.len() >= 8);

        let c = sector_gen(43, Coord::center());
        assert_ne!(a.stars, c.stars);
    }

    #[test]
    fn test_stars_stay_in_sector() {
        let sector = sector_gen(7, Coord::center());
        for star in &sector.stars {
            assert_eq!(star.coord.sector(), sector.coord);
            assert!(star.energy > 0);
        }
    }

    #[test]
    fn test_extract_drains() {
        let mut star = sector_gen(1, Coord::center()).stars[0].clone();
        let elem = (ITEM_NATURAL_FIRST..=ITEM_NATURAL_LAST)
            .filter_map(Item::from_u8)
            .find(|&item| star.elem(item) > 0)
            .expect("some abundance");

        let before = star.elem(elem);
        assert!(star.extract(elem));
        assert_eq!(star.elem(elem), before - 1);
        assert!(!star.extract(Item::Brain));
    }

    #[test]
    fn test_star_save_round_trip() {
        let star = sector_gen(9, Coord::center()).stars[2].clone();
        let mut writer = SaveWriter::new();
        star.save(&mut writer);

        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        assert_eq!(Star::load(&mut reader).unwrap(), star);
    }
}
