//! # Specs
//!
//! The frozen table of game constants and derived formulas, queryable from
//! the VM through `io-specs`. A spec is either a scalar or a pure function
//! over up to [`SPECS_MAX_ARGS`] words. Nothing here reads mutable state;
//! a spec call made twice with the same arguments returns the same word.

use helion_core::atom::{Atoms, ATOM_SPEC_BASE};
use helion_core::coord::Coord;
use helion_core::symbol::Symbol;
use helion_core::Word;

use crate::items::Item;
use crate::tape::Tapes;

/// Maximum argument count accepted by a computed spec.
pub const SPECS_MAX_ARGS: usize = 4;

/// Hard cap on live entities per chunk.
pub const STAR_ITEM_CAP: u16 = 255;

macro_rules! specs {
    ($($variant:ident = $off:literal, $name:literal;)*) => {
        /// A spec key.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Spec {
            $(
                #[doc = $name]
                $variant = $off,
            )*
        }

        impl Spec {
            /// Atom identity of this spec.
            #[inline]
            #[must_use]
            pub const fn as_word(self) -> Word {
                ATOM_SPEC_BASE as Word + self as u8 as Word
            }

            /// Decodes an atom word inside the spec range.
            #[must_use]
            pub const fn from_word(word: Word) -> Option<Self> {
                let base = ATOM_SPEC_BASE as Word;
                if word < base || word > base + 0xFF {
                    return None;
                }
                match (word - base) as u8 {
                    $( $off => Some(Self::$variant), )*
                    _ => None,
                }
            }

            /// Atom name, e.g. `spec-stars-travel-time`.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )*
                }
            }

            /// Every spec, for atom registration.
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )* ];
        }
    };
}

specs! {
    StarItemCap = 0x01, "spec-star-item-cap";
    StarsTravelTime = 0x02, "spec-stars-travel-time";
    SolarEnergy = 0x03, "spec-solar-energy";
    BurnerEnergy = 0x04, "spec-burner-energy";
    BurnerWorkCap = 0x05, "spec-burner-work-cap";
    ColliderOutputRate = 0x06, "spec-collider-output-rate";
    LabBits = 0x07, "spec-lab-bits";
    LabWork = 0x08, "spec-lab-work";
    TestVar = 0x09, "spec-test-var";
    TestFn = 0x0A, "spec-test-fn";
}

/// Registers spec atoms at their fixed identities.
pub fn populate_atoms(atoms: &mut Atoms) {
    for &spec in Spec::ALL {
        let ok = atoms.set(Symbol::new(spec.name()), spec.as_word() as u64);
        debug_assert!(ok);
    }
}

// -----------------------------------------------------------------------------
// formulas
// -----------------------------------------------------------------------------

/// Lane travel time: `ceil(dist / speed)` ticks, never zero for distinct
/// stars.
#[must_use]
pub fn travel_time(speed: u32, src: Coord, dst: Coord) -> u32 {
    let speed = u64::from(speed.max(1));
    let dist = src.dist(dst);
    (dist.div_ceil(speed)).min(u64::from(u32::MAX)) as u32
}

/// Solar budget for one tick. A star always yields a trickle even with no
/// collectors; each solar panel adds a full share.
#[must_use]
pub fn solar_output(star_energy: u16, solar: u16) -> u64 {
    u64::from(star_energy) * (1 + u64::from(solar)) / 4
}

/// Burner fold: elem-o burns as elem-m. Game rule, not an implementation
/// artifact.
#[must_use]
pub const fn burner_fold(item: Item) -> Item {
    match item {
        Item::ElemO => Item::ElemM,
        other => other,
    }
}

/// Energy released per burner work tick: the sum of the element codes
/// present in the item's recipe, elem-o folded into elem-m.
#[must_use]
pub fn burner_energy(tapes: &Tapes, item: Item) -> u64 {
    if item.is_elem() {
        return burner_fold(item) as u8 as u64;
    }

    let Some(info) = tapes.info(item) else { return 0 };
    let mut output = 0u64;
    for (ix, &count) in info.elems.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let elem = Item::from_u8(ix as u8 + 1).unwrap_or(Item::Nil);
        output += burner_fold(elem) as u8 as u64;
    }
    output
}

/// Burner burn duration: `max(1, log2(1 + total element count))` ticks.
#[must_use]
pub fn burner_work_cap(tapes: &Tapes, item: Item) -> u64 {
    let sum: u64 = if item.is_elem() {
        1
    } else {
        1 + tapes
            .info(item)
            .map(|info| info.elems.iter().map(|&c| u64::from(c)).sum())
            .unwrap_or(0)
    };
    u64::from(sum.ilog2()).max(1)
}

/// Collider size cap.
pub const COLLIDER_SIZE_MAX: u8 = 64;

/// Collider output rate for a given ring size; compared against a uniform
/// sample in `[1, COLLIDER_SIZE_MAX)`.
#[must_use]
pub fn collider_rate(size: u8) -> u8 {
    let size = size.clamp(1, COLLIDER_SIZE_MAX);
    let k = u32::from(COLLIDER_SIZE_MAX) / u64::from(COLLIDER_SIZE_MAX).ilog2();
    (k * (u32::from(size) + 1).ilog2()).min(u32::from(COLLIDER_SIZE_MAX)) as u8
}

// -----------------------------------------------------------------------------
// dispatch
// -----------------------------------------------------------------------------

/// Evaluates a spec against its arguments. `None` signals `io-fail`.
#[must_use]
pub fn specs_args(tapes: &Tapes, spec: Spec, args: &[Word]) -> Option<Word> {
    if args.len() > SPECS_MAX_ARGS {
        return None;
    }

    match spec {
        Spec::StarItemCap => Some(Word::from(STAR_ITEM_CAP)),

        Spec::StarsTravelTime => {
            let (&speed, rest) = args.split_first()?;
            if speed <= 0 {
                return None;
            }
            let (&src, rest) = rest.split_first()?;
            let (&dst, _) = rest.split_first()?;
            if !Coord::validate(src) || !Coord::validate(dst) {
                return None;
            }
            Some(Word::from(travel_time(
                speed.min(Word::from(u32::MAX)) as u32,
                Coord::from_word(src),
                Coord::from_word(dst),
            )))
        }

        Spec::SolarEnergy => {
            let (&star, rest) = args.split_first()?;
            if !(0..=Word::from(u16::MAX)).contains(&star) {
                return None;
            }
            let solar = match rest.first() {
                Some(&val) if (0..=Word::from(STAR_ITEM_CAP)).contains(&val) => val as u16,
                Some(_) => return None,
                None => 1,
            };
            Some(solar_output(star as u16, solar) as Word)
        }

        Spec::BurnerEnergy => {
            let (&word, _) = args.split_first()?;
            Item::validate(word)
                .then(|| burner_energy(tapes, Item::from_word(word)) as Word)
        }

        Spec::BurnerWorkCap => {
            let (&word, _) = args.split_first()?;
            Item::validate(word)
                .then(|| burner_work_cap(tapes, Item::from_word(word)) as Word)
        }

        Spec::ColliderOutputRate => {
            let (&size, _) = args.split_first()?;
            if size <= 0 {
                return None;
            }
            Some(Word::from(collider_rate(
                size.min(Word::from(COLLIDER_SIZE_MAX)) as u8,
            )))
        }

        Spec::LabBits => {
            let (&word, _) = args.split_first()?;
            Item::validate(word).then(|| Word::from(Item::from_word(word).lab_bits()))
        }

        Spec::LabWork => {
            let (&word, _) = args.split_first()?;
            Item::validate(word).then(|| Word::from(Item::from_word(word).lab_work()))
        }

        Spec::TestVar => Some(0x123),

        Spec::TestFn => Some(args.iter().sum()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::DEFAULT_TAPES_TOML;

    fn tapes() -> Tapes {
        Tapes::from_toml(DEFAULT_TAPES_TOML).expect("tapes")
    }

    #[test]
    fn test_travel_time() {
        let src = Coord::new(1000, 1000);
        let dst = Coord::new(1000, 4000);
        assert_eq!(travel_time(100, src, dst), 30);
        assert_eq!(travel_time(7, src, dst), 429);
        assert_eq!(travel_time(100, src, src), 0);
    }

    #[test]
    fn test_burner_folds_elem_o() {
        let tapes = tapes();
        assert_eq!(
            burner_energy(&tapes, Item::ElemO),
            burner_energy(&tapes, Item::ElemM)
        );
        assert!(burner_energy(&tapes, Item::Monobarex) > 0);
        assert_eq!(burner_work_cap(&tapes, Item::ElemA), 1);
    }

    #[test]
    fn test_collider_rate_monotone() {
        let mut last = 0;
        for size in 1..=COLLIDER_SIZE_MAX {
            let rate = collider_rate(size);
            assert!(rate >= last);
            assert!(rate <= COLLIDER_SIZE_MAX);
            last = rate;
        }
    }

    #[test]
    fn test_dispatch() {
        let tapes = tapes();
        assert_eq!(
            specs_args(&tapes, Spec::StarItemCap, &[]),
            Some(Word::from(STAR_ITEM_CAP))
        );
        assert_eq!(specs_args(&tapes, Spec::TestVar, &[]), Some(0x123));
        assert_eq!(specs_args(&tapes, Spec::TestFn, &[1, 2, 3]), Some(6));
        assert_eq!(specs_args(&tapes, Spec::StarsTravelTime, &[0]), None);
        assert_eq!(
            Spec::from_word(Spec::SolarEnergy.as_word()),
            Some(Spec::SolarEnergy)
        );
    }
}
