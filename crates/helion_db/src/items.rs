//! # Item Registry
//!
//! The 8-bit item kind space, partitioned into contiguous ranges known at
//! compile time: natural elements, synthesised elements, logistics,
//! active machines (per-instance state), passive components and system
//! pseudo-items. Each kind carries its research parameters.
//!
//! The `im_id` scheme packs `(kind, sequence)` into 16 bits; sequence 0 is
//! nil and sequences are handed out 1-based by the per-kind arena.

use std::fmt;

use helion_core::atom::Atoms;
use helion_core::symbol::Symbol;
use helion_core::Word;

// -----------------------------------------------------------------------------
// ranges
// -----------------------------------------------------------------------------

/// First natural element.
pub const ITEM_NATURAL_FIRST: u8 = 0x01;
/// Last natural element.
pub const ITEM_NATURAL_LAST: u8 = 0x0B;
/// First synthesised element.
pub const ITEM_SYNTH_FIRST: u8 = 0x0C;
/// Last synthesised element.
pub const ITEM_SYNTH_LAST: u8 = 0x1A;
/// First logistics item.
pub const ITEM_LOGISTICS_FIRST: u8 = 0x1B;
/// Last logistics item.
pub const ITEM_LOGISTICS_LAST: u8 = 0x21;
/// First active (stateful) item.
pub const ITEM_ACTIVE_FIRST: u8 = 0x22;
/// Last active item.
pub const ITEM_ACTIVE_LAST: u8 = 0x34;
/// Number of active kinds; arenas are indexed by `kind - ITEM_ACTIVE_FIRST`.
pub const ITEM_ACTIVE_COUNT: usize = (ITEM_ACTIVE_LAST - ITEM_ACTIVE_FIRST + 1) as usize;
/// First passive component.
pub const ITEM_PASSIVE_FIRST: u8 = 0x35;
/// Last passive component.
pub const ITEM_PASSIVE_LAST: u8 = 0x40;
/// First system pseudo-item.
pub const ITEM_SYS_FIRST: u8 = 0xFA;

macro_rules! items {
    ($($variant:ident = $code:literal, $name:literal, bits: $bits:literal, work: $work:literal;)*) => {
        /// An item kind. The discriminant is the wire code.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        pub enum Item {
            /// Absence of an item.
            #[default]
            Nil = 0x00,
            $(
                #[doc = $name]
                $variant = $code,
            )*
        }

        impl Item {
            /// Decodes a wire code.
            #[must_use]
            pub const fn from_u8(code: u8) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )*
                    _ => None,
                }
            }

            /// Human-readable name.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    Self::Nil => "nil",
                    $( Self::$variant => $name, )*
                }
            }

            /// Unknown research bits on this kind. Zero means the kind
            /// needs no research.
            #[must_use]
            pub const fn lab_bits(self) -> u8 {
                match self {
                    Self::Nil => 0,
                    $( Self::$variant => $bits, )*
                }
            }

            /// Lab ticks per learned bit.
            #[must_use]
            pub const fn lab_work(self) -> u8 {
                match self {
                    Self::Nil => 0,
                    $( Self::$variant => $work, )*
                }
            }

            /// Every kind, in code order.
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )* ];
        }
    };
}

items! {
    // natural elements
    ElemA = 0x01, "elem-a", bits: 0, work: 0;
    ElemB = 0x02, "elem-b", bits: 0, work: 0;
    ElemC = 0x03, "elem-c", bits: 0, work: 0;
    ElemD = 0x04, "elem-d", bits: 0, work: 0;
    ElemE = 0x05, "elem-e", bits: 0, work: 0;
    ElemF = 0x06, "elem-f", bits: 0, work: 0;
    ElemG = 0x07, "elem-g", bits: 2, work: 4;
    ElemH = 0x08, "elem-h", bits: 2, work: 4;
    ElemI = 0x09, "elem-i", bits: 2, work: 4;
    ElemJ = 0x0A, "elem-j", bits: 4, work: 8;
    ElemK = 0x0B, "elem-k", bits: 4, work: 8;

    // synthesised elements
    ElemL = 0x0C, "elem-l", bits: 8, work: 16;
    ElemM = 0x0D, "elem-m", bits: 8, work: 16;
    ElemN = 0x0E, "elem-n", bits: 8, work: 16;
    ElemO = 0x0F, "elem-o", bits: 0, work: 0;
    ElemP = 0x10, "elem-p", bits: 8, work: 16;
    ElemQ = 0x11, "elem-q", bits: 8, work: 16;
    ElemR = 0x12, "elem-r", bits: 12, work: 16;
    ElemS = 0x13, "elem-s", bits: 12, work: 16;
    ElemT = 0x14, "elem-t", bits: 12, work: 24;
    ElemU = 0x15, "elem-u", bits: 12, work: 24;
    ElemV = 0x16, "elem-v", bits: 16, work: 24;
    ElemW = 0x17, "elem-w", bits: 16, work: 24;
    ElemX = 0x18, "elem-x", bits: 16, work: 32;
    ElemY = 0x19, "elem-y", bits: 16, work: 32;
    ElemZ = 0x1A, "elem-z", bits: 16, work: 32;

    // logistics
    Rod = 0x1B, "rod", bits: 4, work: 8;
    Solar = 0x1C, "solar", bits: 4, work: 8;
    Worker = 0x1D, "worker", bits: 0, work: 0;
    Battery = 0x1E, "battery", bits: 4, work: 8;
    Accelerator = 0x1F, "accelerator", bits: 8, work: 16;
    Pill = 0x20, "pill", bits: 4, work: 8;
    Kwheel = 0x21, "kwheel", bits: 8, work: 16;

    // active
    Extract = 0x22, "extract", bits: 0, work: 0;
    Printer = 0x23, "printer", bits: 0, work: 0;
    Assembly = 0x24, "assembly", bits: 4, work: 8;
    Condenser = 0x25, "condenser", bits: 8, work: 8;
    Collider = 0x26, "collider", bits: 16, work: 24;
    Burner = 0x27, "burner", bits: 4, work: 8;
    Fusion = 0x28, "fusion", bits: 12, work: 16;
    Lab = 0x29, "lab", bits: 4, work: 8;
    Brain = 0x2A, "brain", bits: 8, work: 16;
    Memory = 0x2B, "memory", bits: 8, work: 8;
    Storage = 0x2C, "storage", bits: 0, work: 0;
    Prober = 0x2D, "prober", bits: 8, work: 8;
    Scanner = 0x2E, "scanner", bits: 8, work: 16;
    Transmit = 0x2F, "transmit", bits: 12, work: 16;
    Receive = 0x30, "receive", bits: 12, work: 16;
    Port = 0x31, "port", bits: 12, work: 24;
    Packer = 0x32, "packer", bits: 8, work: 8;
    Nomad = 0x33, "nomad", bits: 16, work: 32;
    Test = 0x34, "test", bits: 0, work: 0;

    // passive components
    Monobarex = 0x35, "monobarex", bits: 4, work: 4;
    Monochate = 0x36, "monochate", bits: 4, work: 4;
    Monocharkoid = 0x37, "monocharkoid", bits: 4, work: 4;
    Duochium = 0x38, "duochium", bits: 8, work: 8;
    Duodylitil = 0x39, "duodylitil", bits: 8, work: 8;
    Trifimate = 0x3A, "trifimate", bits: 8, work: 8;
    Tridylate = 0x3B, "tridylate", bits: 8, work: 8;
    Trichubarium = 0x3C, "trichubarium", bits: 12, work: 12;
    Tetrafimry = 0x3D, "tetrafimry", bits: 12, work: 12;
    Tetradylgen = 0x3E, "tetradylgen", bits: 12, work: 12;
    Pentamoxate = 0x3F, "pentamoxate", bits: 16, work: 16;
    Penterltor = 0x40, "penterltor", bits: 16, work: 16;

    // system pseudo-items
    Data = 0xFA, "data", bits: 0, work: 0;
    Dummy = 0xFB, "dummy", bits: 0, work: 0;
    Energy = 0xFC, "energy", bits: 0, work: 0;
    User = 0xFD, "user", bits: 0, work: 0;
}

impl Item {
    #[inline]
    #[must_use]
    pub const fn is_nil(self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Natural or synthesised element.
    #[inline]
    #[must_use]
    pub const fn is_elem(self) -> bool {
        let code = self as u8;
        code >= ITEM_NATURAL_FIRST && code <= ITEM_SYNTH_LAST
    }

    /// Harvestable from a star.
    #[inline]
    #[must_use]
    pub const fn is_natural(self) -> bool {
        let code = self as u8;
        code >= ITEM_NATURAL_FIRST && code <= ITEM_NATURAL_LAST
    }

    /// Worker, solar, pill and friends: counted, not instantiated.
    #[inline]
    #[must_use]
    pub const fn is_logistics(self) -> bool {
        let code = self as u8;
        code >= ITEM_LOGISTICS_FIRST && code <= ITEM_LOGISTICS_LAST
    }

    /// Carries per-instance state in an arena.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        let code = self as u8;
        code >= ITEM_ACTIVE_FIRST && code <= ITEM_ACTIVE_LAST
    }

    /// Inert crafted component.
    #[inline]
    #[must_use]
    pub const fn is_passive(self) -> bool {
        let code = self as u8;
        code >= ITEM_PASSIVE_FIRST && code <= ITEM_PASSIVE_LAST
    }

    /// System pseudo-item (data, dummy, energy, user).
    #[inline]
    #[must_use]
    pub const fn is_sys(self) -> bool {
        self as u8 >= ITEM_SYS_FIRST
    }

    /// Arena index for active kinds.
    #[inline]
    #[must_use]
    pub const fn active_index(self) -> Option<usize> {
        if self.is_active() {
            Some((self as u8 - ITEM_ACTIVE_FIRST) as usize)
        } else {
            None
        }
    }

    /// Active kind at arena index `ix`.
    #[inline]
    #[must_use]
    pub const fn from_active_index(ix: usize) -> Option<Self> {
        if ix < ITEM_ACTIVE_COUNT {
            Self::from_u8(ITEM_ACTIVE_FIRST + ix as u8)
        } else {
            None
        }
    }

    /// Whether a VM word names a valid item.
    #[inline]
    #[must_use]
    pub const fn validate(word: Word) -> bool {
        word > 0 && word <= u8::MAX as Word && Self::from_u8(word as u8).is_some()
    }

    /// Decodes a VM word; invalid words decode to nil.
    #[inline]
    #[must_use]
    pub const fn from_word(word: Word) -> Self {
        if word > 0 && word <= u8::MAX as Word {
            match Self::from_u8(word as u8) {
                Some(item) => item,
                None => Self::Nil,
            }
        } else {
            Self::Nil
        }
    }

    /// Resolves a name back to a kind. Startup-only path.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|item| item.name() == name)
    }
}

/// Registers every item atom (`item-<name>` at the kind code).
pub fn populate_atoms(atoms: &mut Atoms) {
    for &item in Item::ALL {
        let atom = format!("item-{}", item.name());
        let ok = atoms.set(Symbol::new(&atom), u64::from(item as u8));
        debug_assert!(ok);
    }
}

// -----------------------------------------------------------------------------
// im_id
// -----------------------------------------------------------------------------

/// 16-bit entity id: kind in the top byte, 1-based sequence in the bottom.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImId(u16);

impl ImId {
    /// The nil id.
    pub const NIL: Self = Self(0);

    /// Packs `(kind, seq)`. Sequence is 1-based.
    #[inline]
    #[must_use]
    pub const fn new(item: Item, seq: u8) -> Self {
        Self(((item as u8 as u16) << 8) | seq as u16)
    }

    /// Raw wire value.
    #[inline]
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self.0
    }

    /// Rebuilds from the wire value.
    #[inline]
    #[must_use]
    pub const fn from_u16(val: u16) -> Self {
        Self(val)
    }

    /// The kind byte.
    #[inline]
    #[must_use]
    pub const fn item(self) -> Item {
        match Item::from_u8((self.0 >> 8) as u8) {
            Some(item) => item,
            None => Item::Nil,
        }
    }

    /// The 1-based sequence byte.
    #[inline]
    #[must_use]
    pub const fn seq(self) -> u8 {
        self.0 as u8
    }

    #[inline]
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Whether a VM word is a well-formed id.
    #[inline]
    #[must_use]
    pub const fn validate(word: Word) -> bool {
        word > 0
            && word <= u16::MAX as Word
            && Item::from_u8((word as u16 >> 8) as u8).is_some()
            && (word as u16 as u8) != 0
    }

    /// Decodes a VM word; invalid words decode to nil.
    #[inline]
    #[must_use]
    pub const fn from_word(word: Word) -> Self {
        if Self::validate(word) {
            Self(word as u16)
        } else {
            Self::NIL
        }
    }
}

impl fmt::Display for ImId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02x}", self.item().name(), self.seq())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_are_contiguous() {
        for code in ITEM_NATURAL_FIRST..=ITEM_PASSIVE_LAST {
            assert!(Item::from_u8(code).is_some(), "hole at {code:#x}");
        }
        assert_eq!(Item::Extract.active_index(), Some(0));
        assert_eq!(
            Item::Test.active_index(),
            Some(ITEM_ACTIVE_COUNT - 1)
        );
        assert_eq!(Item::from_active_index(0), Some(Item::Extract));
        assert!(Item::Solar.is_logistics());
        assert!(Item::Brain.is_active());
        assert!(Item::Monobarex.is_passive());
        assert!(Item::Data.is_sys());
        assert!(!Item::Data.is_active());
    }

    #[test]
    fn test_im_id_pack() {
        let id = ImId::new(Item::Printer, 3);
        assert_eq!(id.item(), Item::Printer);
        assert_eq!(id.seq(), 3);
        assert!(!id.is_nil());
        assert!(ImId::validate(Word::from(id.to_u16())));
        assert!(!ImId::validate(0));
        assert!(!ImId::validate(Word::from(ImId::new(Item::Printer, 0).to_u16())));
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Item::from_name("elem-a"), Some(Item::ElemA));
        assert_eq!(Item::from_name("nomad"), Some(Item::Nomad));
        assert_eq!(Item::from_name("bogus"), None);
    }
}
