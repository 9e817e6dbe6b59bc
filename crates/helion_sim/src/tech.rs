//! # Tech
//!
//! Per-user research state: one bitmap of learned bits per item. An item
//! is known once every research bit is set; kinds with no research bits
//! are known from the start. Learn-bit events always travel through the
//! shard bus so the tree only mutates on the main thread.

use std::collections::BTreeMap;

use helion_core::save::{Magic, SaveReader, SaveResult, SaveWriter};
use helion_core::UserId;
use helion_db::items::Item;

/// One user's research state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tech {
    bits: BTreeMap<Item, u64>,
}

impl Tech {
    /// Fresh state: only zero-bit kinds are known.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Learned bits for `item`.
    #[must_use]
    pub fn learned_bits(&self, item: Item) -> u64 {
        self.bits.get(&item).copied().unwrap_or(0)
    }

    /// True once every research bit of `item` is learned.
    #[must_use]
    pub fn learned(&self, item: Item) -> bool {
        let bits = item.lab_bits();
        if bits == 0 {
            return true;
        }
        let mask = (1u64 << bits) - 1;
        self.learned_bits(item) & mask == mask
    }

    /// Alias of [`Tech::learned`]: known kinds gate recipes and configs.
    #[must_use]
    pub fn known(&self, item: Item) -> bool {
        self.learned(item)
    }

    /// Sets one learned bit.
    pub fn learn_bit(&mut self, item: Item, bit: u8) {
        if bit >= 64 {
            return;
        }
        *self.bits.entry(item).or_insert(0) |= 1 << bit;
    }

    /// Marks `item` fully learned.
    pub fn learn_all(&mut self, item: Item) {
        let bits = item.lab_bits();
        if bits > 0 {
            self.bits.insert(item, (1u64 << bits) - 1);
        }
    }

    fn save(&self, writer: &mut SaveWriter) {
        writer.write_u16(self.bits.len() as u16);
        for (&item, &bits) in &self.bits {
            writer.write_u8(item as u8);
            writer.write_u64(bits);
        }
    }

    fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        let len = usize::from(reader.read_u16()?);
        let mut tech = Self::new();
        for _ in 0..len {
            let item = Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil);
            let bits = reader.read_u64()?;
            if !item.is_nil() {
                tech.bits.insert(item, bits);
            }
        }
        Ok(tech)
    }
}

/// Research state for every user. Shared into the exec phase behind an
/// `Arc`; mutated copy-on-write during `end`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TechTree {
    users: BTreeMap<UserId, Tech>,
}

impl TechTree {
    /// Empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A user's state; absent users have everything-with-bits unlearned.
    #[must_use]
    pub fn user(&self, user: UserId) -> Option<&Tech> {
        self.users.get(&user)
    }

    /// True when `item` is known to `user`.
    #[must_use]
    pub fn known(&self, user: UserId, item: Item) -> bool {
        self.users.get(&user).map_or(item.lab_bits() == 0, |tech| tech.known(item))
    }

    /// Applies a learn-bit effect.
    pub fn learn_bit(&mut self, user: UserId, item: Item, bit: u8) {
        self.users.entry(user).or_default().learn_bit(item, bit);
    }

    /// Unlocks everything for `user`; bootstrap and tests.
    pub fn learn_all(&mut self, user: UserId) {
        let tech = self.users.entry(user).or_default();
        for &item in Item::ALL {
            tech.learn_all(item);
        }
    }

    /// Serialises the tree.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_magic(Magic::Tech);
        writer.write_u16(self.users.len() as u16);
        for (&user, tech) in &self.users {
            writer.write_u8(user);
            tech.save(writer);
        }
        writer.write_magic(Magic::Tech);
    }

    /// Deserialises the tree.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        reader.expect_magic(Magic::Tech)?;
        let len = usize::from(reader.read_u16()?);
        let mut tree = Self::new();
        for _ in 0..len {
            let user = reader.read_u8()?;
            tree.users.insert(user, Tech::load(reader)?);
        }
        reader.expect_magic(Magic::Tech)?;
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_bit_kinds_known() {
        let tree = TechTree::new();
        assert!(tree.known(0, Item::ElemA));
        assert!(tree.known(0, Item::Worker));
        assert!(!tree.known(0, Item::Fusion));
    }

    #[test]
    fn test_learning_completes() {
        let mut tree = TechTree::new();
        let bits = Item::Assembly.lab_bits();
        for bit in 0..bits - 1 {
            tree.learn_bit(0, Item::Assembly, bit);
            assert!(!tree.known(0, Item::Assembly));
        }
        tree.learn_bit(0, Item::Assembly, bits - 1);
        assert!(tree.known(0, Item::Assembly));

        // Re-learning a bit is idempotent.
        tree.learn_bit(0, Item::Assembly, 0);
        assert!(tree.known(0, Item::Assembly));
    }

    #[test]
    fn test_save_round_trip() {
        let mut tree = TechTree::new();
        tree.learn_bit(0, Item::Lab, 1);
        tree.learn_all(3);

        let mut writer = SaveWriter::new();
        tree.save(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        assert_eq!(TechTree::load(&mut reader).unwrap(), tree);
    }
}
