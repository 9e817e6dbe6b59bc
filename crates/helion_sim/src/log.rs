//! # Logs
//!
//! Bounded per-chunk and per-user rings of `{time, id, key, value}`
//! lines. Keys and values are atoms, so a log line costs four words and
//! the UI resolves names lazily.

use helion_core::coord::Coord;
use helion_core::ring::Ring;
use helion_core::save::{Magic, SaveReader, SaveResult, SaveWriter};
use helion_core::{Word, WorldTs};
use helion_db::items::ImId;

/// Lines retained per chunk.
pub const CHUNK_LOG_CAP: usize = 32;
/// Lines retained per user.
pub const USER_LOG_CAP: usize = 64;

/// One log line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogLine {
    /// Star the line originated from; nil for system lines.
    pub star: Coord,
    /// World time of the event.
    pub time: WorldTs,
    /// Reporting entity.
    pub id: ImId,
    /// Event key atom (usually the IO verb).
    pub key: Word,
    /// Event value atom (usually an `ioe-*` code).
    pub value: Word,
}

/// Bounded log ring; old lines fall off the tail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log {
    ring: Ring<LogLine>,
    cap: usize,
}

impl Log {
    /// Ring retaining at most `cap` lines.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self { ring: Ring::with_capacity(cap), cap }
    }

    /// Appends a line, dropping the oldest at capacity.
    pub fn push(&mut self, line: LogLine) {
        if self.ring.len() == self.cap {
            self.ring.pop();
        }
        self.ring.push(line);
    }

    /// Lines oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = LogLine> + '_ {
        self.ring.iter()
    }

    /// Retained line count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// The ring's `(head, tail)` cursor pair; the delta ack currency.
    #[must_use]
    pub fn cursors(&self) -> (u16, u16) {
        self.ring.cursors()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Serialises the ring.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_magic(Magic::Log);
        writer.write_u32(self.cap as u32);
        writer.write_ring(&self.ring, |w, line| {
            w.write_u64(line.star.to_u64());
            w.write_u32(line.time);
            w.write_u16(line.id.to_u16());
            w.write_word(line.key);
            w.write_word(line.value);
        });
        writer.write_magic(Magic::Log);
    }

    /// Deserialises the ring.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        reader.expect_magic(Magic::Log)?;
        let cap = reader.read_u32()? as usize;
        let ring = reader.read_ring(|r| {
            Ok(LogLine {
                star: Coord::from_u64(r.read_u64()?),
                time: r.read_u32()?,
                id: ImId::from_u16(r.read_u16()?),
                key: r.read_word()?,
                value: r.read_word()?,
            })
        })?;
        reader.expect_magic(Magic::Log)?;
        Ok(Self { ring, cap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded() {
        let mut log = Log::new(4);
        for i in 0..10 {
            log.push(LogLine { time: i, ..LogLine::default() });
        }
        assert_eq!(log.len(), 4);
        let times: Vec<u32> = log.iter().map(|line| line.time).collect();
        assert_eq!(times, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_save_round_trip() {
        let mut log = Log::new(CHUNK_LOG_CAP);
        log.push(LogLine {
            star: Coord::new(3, 4),
            time: 7,
            id: ImId::from_u16(0x2201),
            key: 11,
            value: -2,
        });

        let mut writer = SaveWriter::new();
        log.save(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        assert_eq!(Log::load(&mut reader).unwrap(), log);
    }
}
