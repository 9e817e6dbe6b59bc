//! # Save Stream
//!
//! Append-only little-endian byte stream used both for save files and for
//! the shard → world effect bus. Every composite opens and closes with the
//! same one-byte magic so corruption is caught at the record boundary; the
//! top-level file frame opens with a 64-bit magic and is sealed in place
//! once the body is complete.

use bytemuck::Pod;
use thiserror::Error;

use crate::ring::Ring;
use crate::symbol::{Symbol, SYMBOL_CAP};
use crate::Word;

/// Top-of-file magic, written first.
pub const SAVE_MAGIC_OPEN: u64 = 0xFF4E_4F49_4745_4CFF;
/// Seal magic, written into the header last. A file without it was cut
/// short mid-save.
pub const SAVE_MAGIC_SEAL: u64 = 0xFF4C_4547_494F_4EFF;

/// Current save format version.
pub const SAVE_VERSION: u8 = 1;

/// Record magics. Each composite writes its magic before and after its
/// payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Magic {
    /// Vector of 64-bit words.
    Vec64 = 0x01,
    /// Ring buffer composite.
    Ring = 0x02,
    /// Per-kind item arena.
    Active = 0x03,
    /// One chunk.
    Chunk = 0x04,
    /// The lanes table.
    Lanes = 0x05,
    /// User-IO reply effect.
    Io = 0x06,
    /// Log-line effect.
    Log = 0x07,
    /// Tech learn-bit effect.
    Tech = 0x08,
    /// Probe registration effect.
    Probe = 0x09,
    /// Scan registration effect.
    Scan = 0x0A,
    /// Shards pool state.
    Shards = 0x0B,
    /// World envelope.
    World = 0x0C,
    /// Star descriptor.
    Star = 0x0D,
    /// Mods registry.
    Mods = 0x0E,
    /// One compiled mod.
    Mod = 0x0F,
    /// Atoms registry.
    Atoms = 0x10,
    /// Energy ledger.
    Energy = 0x11,
    /// Landed pills store.
    Pills = 0x12,
    /// Transmit listener set.
    Listen = 0x13,
    /// Worker accounting.
    Workers = 0x14,
    /// Per-user state.
    User = 0x15,
    /// Chunk delta frame.
    Delta = 0x16,
}

impl Magic {
    const TABLE: [Self; 22] = [
        Self::Vec64, Self::Ring, Self::Active, Self::Chunk, Self::Lanes, Self::Io, Self::Log,
        Self::Tech, Self::Probe, Self::Scan, Self::Shards, Self::World, Self::Star, Self::Mods,
        Self::Mod, Self::Atoms, Self::Energy, Self::Pills, Self::Listen, Self::Workers,
        Self::User, Self::Delta,
    ];

    fn from_u8(val: u8) -> Option<Self> {
        (val >= Self::Vec64 as u8 && val <= Self::Delta as u8)
            .then(|| Self::TABLE[usize::from(val) - 1])
    }
}

/// Errors surfaced while reading a stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    /// A record did not open or close with the expected magic.
    #[error("magic mismatch: expected {want:#x}, found {got:#x} at offset {at}")]
    Magic {
        /// Expected magic value.
        want: u64,
        /// Value actually read.
        got: u64,
        /// Stream offset of the mismatch.
        at: usize,
    },

    /// The stream ended mid-record.
    #[error("unexpected end of stream: needed {need} bytes, {have} left")]
    Eof {
        /// Bytes required by the read.
        need: usize,
        /// Bytes remaining.
        have: usize,
    },

    /// Symbol length prefix out of range.
    #[error("symbol length {0} exceeds cap {SYMBOL_CAP}")]
    Symbol(usize),

    /// Unknown format version.
    #[error("unsupported save version {0}")]
    Version(u8),

    /// The header seal was never written; the save was interrupted.
    #[error("save is unsealed")]
    Unsealed,
}

/// Result alias for stream reads.
pub type SaveResult<T> = Result<T, SaveError>;

// -----------------------------------------------------------------------------
// writer
// -----------------------------------------------------------------------------

/// Growable byte stream writer.
#[derive(Clone, Debug, Default)]
pub struct SaveWriter {
    buf: Vec<u8>,
}

impl SaveWriter {
    /// Empty stream, used for the shard bus and for composites.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream with the top-level file frame: open magic, zeroed seal
    /// placeholder, version byte. Call [`SaveWriter::seal`] once the body
    /// is written.
    #[must_use]
    pub fn with_header(version: u8) -> Self {
        let mut writer = Self::new();
        writer.write_u64(SAVE_MAGIC_OPEN);
        writer.write_u64(0);
        writer.write_u8(version);
        writer
    }

    /// Writes the seal magic into the header placeholder.
    pub fn seal(&mut self) {
        debug_assert!(self.buf.len() >= 17);
        self.buf[8..16].copy_from_slice(&SAVE_MAGIC_SEAL.to_le_bytes());
    }

    /// Bytes written so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Clears the stream for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// The written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[inline]
    pub fn write_u8(&mut self, val: u8) {
        self.buf.push(val);
    }

    #[inline]
    pub fn write_u16(&mut self, val: u16) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn write_u32(&mut self, val: u32) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn write_u64(&mut self, val: u64) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn write_u128(&mut self, val: u128) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    /// Writes a VM word.
    #[inline]
    pub fn write_word(&mut self, val: Word) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a `Pod` value as raw little-endian bytes.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, val: &T) {
        self.buf.extend_from_slice(bytemuck::bytes_of(val));
    }

    /// Writes a record magic byte.
    #[inline]
    pub fn write_magic(&mut self, magic: Magic) {
        self.write_u8(magic as u8);
    }

    /// Length-prefixed symbol.
    pub fn write_symbol(&mut self, sym: &Symbol) {
        self.write_u8(sym.len() as u8);
        self.write_bytes(sym.as_bytes());
    }

    /// Magic-bracketed vector of words.
    pub fn write_vec64(&mut self, vals: &[u64]) {
        self.write_magic(Magic::Vec64);
        self.write_u32(vals.len() as u32);
        for &val in vals {
            self.write_u64(val);
        }
        self.write_magic(Magic::Vec64);
    }

    /// Magic-bracketed ring: cursors plus raw storage, element writer
    /// supplied by the caller.
    pub fn write_ring<T, F>(&mut self, ring: &Ring<T>, mut elem: F)
    where
        T: Copy + Default + PartialEq,
        F: FnMut(&mut Self, &T),
    {
        self.write_magic(Magic::Ring);
        let (head, tail) = ring.cursors();
        self.write_u16(ring.capacity() as u16);
        self.write_u16(head);
        self.write_u16(tail);
        for val in ring.storage() {
            elem(self, val);
        }
        self.write_magic(Magic::Ring);
    }
}

// -----------------------------------------------------------------------------
// reader
// -----------------------------------------------------------------------------

/// Positioned reader over a saved stream.
#[derive(Clone, Debug)]
pub struct SaveReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SaveReader<'a> {
    /// Reader over a raw stream (no file frame).
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reader over a framed file: validates both top magics and returns
    /// the reader positioned on the body plus the version byte.
    pub fn with_header(buf: &'a [u8]) -> SaveResult<(Self, u8)> {
        let mut reader = Self::new(buf);

        let open = reader.read_u64()?;
        if open != SAVE_MAGIC_OPEN {
            return Err(SaveError::Magic { want: SAVE_MAGIC_OPEN, got: open, at: 0 });
        }

        let seal = reader.read_u64()?;
        if seal == 0 {
            return Err(SaveError::Unsealed);
        }
        if seal != SAVE_MAGIC_SEAL {
            return Err(SaveError::Magic { want: SAVE_MAGIC_SEAL, got: seal, at: 8 });
        }

        let version = reader.read_u8()?;
        if version != SAVE_VERSION {
            return Err(SaveError::Version(version));
        }

        Ok((reader, version))
    }

    /// Current offset.
    #[inline]
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True once the whole stream was consumed.
    #[inline]
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, len: usize) -> SaveResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(SaveError::Eof { need: len, have: self.remaining() });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> SaveResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> SaveResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> SaveResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    pub fn read_u64(&mut self) -> SaveResult<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    pub fn read_u128(&mut self) -> SaveResult<u128> {
        let bytes = self.take(16)?;
        Ok(u128::from_le_bytes(bytes.try_into().expect("16 bytes")))
    }

    /// Reads a VM word.
    pub fn read_word(&mut self) -> SaveResult<Word> {
        let bytes = self.take(8)?;
        Ok(Word::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    pub fn read_bytes(&mut self, len: usize) -> SaveResult<&'a [u8]> {
        self.take(len)
    }

    /// Reads a `Pod` value written with [`SaveWriter::write_pod`].
    pub fn read_pod<T: Pod>(&mut self) -> SaveResult<T> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(bytes).map_err(|_| SaveError::Eof {
            need: std::mem::size_of::<T>(),
            have: 0,
        })
    }

    /// Reads and decodes the next record magic.
    pub fn read_magic(&mut self) -> SaveResult<Magic> {
        let at = self.pos;
        let val = self.read_u8()?;
        Magic::from_u8(val).ok_or(SaveError::Magic { want: 0, got: u64::from(val), at })
    }

    /// Reads one magic byte and checks it against `want`.
    pub fn expect_magic(&mut self, want: Magic) -> SaveResult<()> {
        let at = self.pos;
        let got = self.read_u8()?;
        if got != want as u8 {
            return Err(SaveError::Magic { want: u64::from(want as u8), got: u64::from(got), at });
        }
        Ok(())
    }

    /// Length-prefixed symbol.
    pub fn read_symbol(&mut self) -> SaveResult<Symbol> {
        let len = usize::from(self.read_u8()?);
        if len > SYMBOL_CAP {
            return Err(SaveError::Symbol(len));
        }
        Ok(Symbol::from_bytes(self.take(len)?))
    }

    /// Magic-bracketed vector of words.
    pub fn read_vec64(&mut self) -> SaveResult<Vec<u64>> {
        self.expect_magic(Magic::Vec64)?;
        let len = self.read_u32()? as usize;
        let mut vals = Vec::with_capacity(len);
        for _ in 0..len {
            vals.push(self.read_u64()?);
        }
        self.expect_magic(Magic::Vec64)?;
        Ok(vals)
    }

    /// Magic-bracketed ring, element reader supplied by the caller.
    pub fn read_ring<T, F>(&mut self, mut elem: F) -> SaveResult<Ring<T>>
    where
        T: Copy + Default + PartialEq,
        F: FnMut(&mut Self) -> SaveResult<T>,
    {
        self.expect_magic(Magic::Ring)?;
        let cap = usize::from(self.read_u16()?);
        let head = self.read_u16()?;
        let tail = self.read_u16()?;
        let mut vals = Vec::with_capacity(cap);
        for _ in 0..cap {
            vals.push(elem(self)?);
        }
        self.expect_magic(Magic::Ring)?;
        Ok(Ring::from_parts(head, tail, vals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_round_trip() {
        let mut writer = SaveWriter::new();
        writer.write_u8(0xAB);
        writer.write_u16(0x1234);
        writer.write_u32(0xDEAD_BEEF);
        writer.write_u64(0x0123_4567_89AB_CDEF);
        writer.write_word(-42);
        writer.write_symbol(&Symbol::new("tape"));

        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(reader.read_word().unwrap(), -42);
        assert_eq!(reader.read_symbol().unwrap(), Symbol::new("tape"));
        assert!(reader.is_eof());
    }

    #[test]
    fn test_header_seal() {
        let mut writer = SaveWriter::with_header(SAVE_VERSION);
        writer.write_u32(7);

        // Unsealed streams must not load.
        let unsealed = writer.clone().into_bytes();
        assert_eq!(SaveReader::with_header(&unsealed).unwrap_err(), SaveError::Unsealed);

        writer.seal();
        let bytes = writer.into_bytes();
        let (mut reader, version) = SaveReader::with_header(&bytes).unwrap();
        assert_eq!(version, SAVE_VERSION);
        assert_eq!(reader.read_u32().unwrap(), 7);
    }

    #[test]
    fn test_magic_mismatch() {
        let mut writer = SaveWriter::new();
        writer.write_magic(Magic::Chunk);
        let bytes = writer.into_bytes();

        let mut reader = SaveReader::new(&bytes);
        let err = reader.expect_magic(Magic::Lanes).unwrap_err();
        assert!(matches!(err, SaveError::Magic { .. }));
    }

    #[test]
    fn test_vec64_and_ring_round_trip() {
        let mut ring = crate::ring::Ring::with_capacity(4);
        ring.push(10u16);
        ring.push(20);
        ring.pop();
        ring.push(30);

        let mut writer = SaveWriter::new();
        writer.write_vec64(&[1, 2, 3]);
        writer.write_ring(&ring, |w, v| w.write_u16(*v));

        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        assert_eq!(reader.read_vec64().unwrap(), vec![1, 2, 3]);
        let loaded = reader.read_ring(SaveReader::read_u16).unwrap();
        assert_eq!(loaded, ring);
        assert!(reader.is_eof());
    }
}
