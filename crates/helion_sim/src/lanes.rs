//! # Lanes
//!
//! In-flight packets between stars. A packet carries its owner, an item
//! kind, a copied payload and a precomputed arrival tick; the table is
//! keyed by destination and iterated in coordinate order so delivery is
//! deterministic. Payloads are always copied by value - nothing borrowed
//! outlives the packet.

use std::collections::BTreeMap;

use helion_core::coord::Coord;
use helion_core::save::{Magic, SaveReader, SaveResult, SaveWriter};
use helion_core::{UserId, Word, WorldTs};
use helion_db::items::Item;
use helion_db::specs::travel_time;

/// Longest packet payload in words.
pub const PACKET_DATA_CAP: usize = 8;

/// One in-flight packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Launching user.
    pub owner: UserId,
    /// What materialises on arrival.
    pub item: Item,
    /// Travel speed the arrival was computed with.
    pub speed: u32,
    /// Launch star.
    pub src: Coord,
    /// Destination star.
    pub dst: Coord,
    /// Tick the packet lands on.
    pub arrival: WorldTs,
    /// Copied payload.
    pub data: Vec<Word>,
}

/// The global in-flight table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Lanes {
    map: BTreeMap<Coord, Vec<Packet>>,
}

impl Lanes {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// In-flight packet count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Packets bound for `dst`.
    #[must_use]
    pub fn inbound(&self, dst: Coord) -> usize {
        self.map.get(&dst).map_or(0, Vec::len)
    }

    /// Launches a packet at `now`. Arrival is at least one tick out, so
    /// a packet is never delivered on its launch tick.
    pub fn launch(
        &mut self,
        now: WorldTs,
        owner: UserId,
        item: Item,
        speed: u32,
        src: Coord,
        dst: Coord,
        data: Vec<Word>,
    ) {
        let mut data = data;
        data.truncate(PACKET_DATA_CAP);
        let arrival = now + travel_time(speed, src, dst).max(1);
        self.map.entry(dst).or_default().push(Packet {
            owner,
            item,
            speed,
            src,
            dst,
            arrival,
            data,
        });
    }

    /// Pops every packet due at `now`, destination order first, launch
    /// order within a destination.
    pub fn step(&mut self, now: WorldTs) -> Vec<Packet> {
        let mut due = Vec::new();
        for queue in self.map.values_mut() {
            let mut ix = 0;
            while ix < queue.len() {
                if queue[ix].arrival <= now {
                    due.push(queue.remove(ix));
                } else {
                    ix += 1;
                }
            }
        }
        self.map.retain(|_, queue| !queue.is_empty());
        due
    }

    /// Serialises the table.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_magic(Magic::Lanes);
        writer.write_u32(self.len() as u32);
        for queue in self.map.values() {
            for packet in queue {
                writer.write_u8(packet.owner);
                writer.write_u8(packet.item as u8);
                writer.write_u32(packet.speed);
                writer.write_u64(packet.src.to_u64());
                writer.write_u64(packet.dst.to_u64());
                writer.write_u32(packet.arrival);
                writer.write_u8(packet.data.len() as u8);
                for &word in &packet.data {
                    writer.write_word(word);
                }
            }
        }
        writer.write_magic(Magic::Lanes);
    }

    /// Deserialises the table.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        reader.expect_magic(Magic::Lanes)?;
        let count = reader.read_u32()?;
        let mut lanes = Self::new();
        for _ in 0..count {
            let owner = reader.read_u8()?;
            let item = Item::from_u8(reader.read_u8()?).unwrap_or(Item::Nil);
            let speed = reader.read_u32()?;
            let src = Coord::from_u64(reader.read_u64()?);
            let dst = Coord::from_u64(reader.read_u64()?);
            let arrival = reader.read_u32()?;
            let len = usize::from(reader.read_u8()?);
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(reader.read_word()?);
            }
            lanes
                .map
                .entry(dst)
                .or_default()
                .push(Packet { owner, item, speed, src, dst, arrival, data });
        }
        reader.expect_magic(Magic::Lanes)?;
        Ok(lanes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrival_always_future() {
        let mut lanes = Lanes::new();
        let here = Coord::new(10, 10);
        lanes.launch(100, 0, Item::Pill, u32::MAX, here, here, vec![]);

        assert!(lanes.step(100).is_empty());
        let due = lanes.step(101);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].arrival, 101);
        assert!(lanes.is_empty());
    }

    #[test]
    fn test_travel_time_scales() {
        let mut lanes = Lanes::new();
        let src = Coord::new(0, 0);
        let dst = Coord::new(0, 1000);
        lanes.launch(0, 0, Item::Data, 100, src, dst, vec![1, 2, 3]);

        assert!(lanes.step(9).is_empty());
        let due = lanes.step(10);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn test_order_within_destination() {
        let mut lanes = Lanes::new();
        let dst = Coord::new(5, 5);
        lanes.launch(0, 0, Item::Data, u32::MAX, Coord::new(1, 1), dst, vec![1]);
        lanes.launch(0, 0, Item::Data, u32::MAX, Coord::new(2, 2), dst, vec![2]);

        let due = lanes.step(1);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].data, vec![1]);
        assert_eq!(due[1].data, vec![2]);
    }

    #[test]
    fn test_save_round_trip() {
        let mut lanes = Lanes::new();
        lanes.launch(5, 1, Item::Pill, 100, Coord::new(1, 2), Coord::new(3, 4), vec![42]);
        lanes.launch(5, 0, Item::Data, 10, Coord::new(9, 9), Coord::new(3, 4), vec![-1, -2]);

        let mut writer = SaveWriter::new();
        lanes.save(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        assert_eq!(Lanes::load(&mut reader).unwrap(), lanes);
    }
}
