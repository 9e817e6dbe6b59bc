//! # Cargo & Pills
//!
//! A cargo is `(item, count)` packed into one word so pill payloads fit a
//! single lane word. The pills store holds pills that landed at a chunk
//! until a port docks them.

use helion_core::coord::Coord;
use helion_core::save::{Magic, SaveReader, SaveResult, SaveWriter};
use helion_core::Word;
use helion_db::items::Item;
use helion_vm::{vm_pack, vm_unpack};

/// Landed pills a chunk can hold.
pub const PILLS_CAP: usize = 255;

/// An item stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cargo {
    /// Stacked item kind.
    pub item: Item,
    /// Stack size.
    pub count: u8,
}

impl Cargo {
    /// Builds a stack.
    #[inline]
    #[must_use]
    pub const fn new(item: Item, count: u8) -> Self {
        Self { item, count }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.count == 0
    }

    /// Packs to one lane word.
    #[inline]
    #[must_use]
    pub fn to_word(self) -> Word {
        vm_pack(self.item as u8 as u32, u32::from(self.count))
    }

    /// Unpacks a lane word; malformed words become empty cargo.
    #[must_use]
    pub fn from_word(word: Word) -> Self {
        let (item, count) = vm_unpack(word);
        let item = u8::try_from(item).ok().and_then(Item::from_u8).unwrap_or(Item::Nil);
        Self { item, count: count.min(255) as u8 }
    }
}

/// One landed pill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pill {
    /// Star the pill was launched from.
    pub src: Coord,
    /// Carried stack.
    pub cargo: Cargo,
}

/// The per-chunk pill store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pills {
    list: Vec<Pill>,
}

impl Pills {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Landed pill count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Lands a pill; false when the pad is full.
    pub fn arrive(&mut self, pill: Pill) -> bool {
        if self.list.len() == PILLS_CAP {
            return false;
        }
        self.list.push(pill);
        true
    }

    /// Docks the first pill matching the filters: a nil `src` matches any
    /// origin, a nil `item` any cargo.
    pub fn dock(&mut self, src: Coord, item: Item) -> Option<Pill> {
        let at = self.list.iter().position(|pill| {
            (src.is_nil() || pill.src == src)
                && (item.is_nil() || pill.cargo.item == item || pill.cargo.is_empty())
        })?;
        Some(self.list.remove(at))
    }

    /// Returns a docked pill to the pad, e.g. on a port reset.
    pub fn undock(&mut self, pill: Pill) -> bool {
        self.arrive(pill)
    }

    /// Serialises the store.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_magic(Magic::Pills);
        writer.write_u16(self.list.len() as u16);
        for pill in &self.list {
            writer.write_u64(pill.src.to_u64());
            writer.write_word(pill.cargo.to_word());
        }
        writer.write_magic(Magic::Pills);
    }

    /// Deserialises the store.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        reader.expect_magic(Magic::Pills)?;
        let len = usize::from(reader.read_u16()?);
        let mut pills = Self::new();
        for _ in 0..len {
            let src = Coord::from_u64(reader.read_u64()?);
            let cargo = Cargo::from_word(reader.read_word()?);
            pills.list.push(Pill { src, cargo });
        }
        reader.expect_magic(Magic::Pills)?;
        Ok(pills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cargo_word_round_trip() {
        let cargo = Cargo::new(Item::ElemA, 2);
        assert_eq!(Cargo::from_word(cargo.to_word()), cargo);
        assert_eq!(Cargo::from_word(0), Cargo::default());
    }

    #[test]
    fn test_dock_filters() {
        let mut pills = Pills::new();
        let a = Pill { src: Coord::new(1, 1), cargo: Cargo::new(Item::ElemA, 2) };
        let b = Pill { src: Coord::new(2, 2), cargo: Cargo::new(Item::ElemB, 1) };
        pills.arrive(a);
        pills.arrive(b);

        // Item filter skips the first pill.
        assert_eq!(pills.dock(Coord::nil(), Item::ElemB), Some(b));
        // Coord filter must match what's left.
        assert_eq!(pills.dock(Coord::new(9, 9), Item::Nil), None);
        assert_eq!(pills.dock(Coord::new(1, 1), Item::Nil), Some(a));
        assert!(pills.is_empty());

        assert!(pills.undock(a));
        assert_eq!(pills.len(), 1);
    }

    #[test]
    fn test_save_round_trip() {
        let mut pills = Pills::new();
        pills.arrive(Pill { src: Coord::new(5, 6), cargo: Cargo::new(Item::Rod, 7) });

        let mut writer = SaveWriter::new();
        pills.save(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        assert_eq!(Pills::load(&mut reader).unwrap(), pills);
    }
}
