//! # Mods
//!
//! A mod is a compiled program: bytecode plus a public-symbol index.
//! Mods are immutable once registered and identified by `(major,
//! version)`; registering new code under an existing major mints the next
//! version. Version zero in a lookup means "latest".

use std::collections::BTreeMap;
use std::sync::Arc;

use helion_core::save::{Magic, SaveError, SaveReader, SaveResult, SaveWriter};
use helion_core::symbol::Symbol;
use helion_core::Word;

/// Mod identity: major in the high half, version in the low half.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModId(u32);

impl ModId {
    /// The nil id.
    pub const NIL: Self = Self(0);

    /// Packs `(major, version)`.
    #[inline]
    #[must_use]
    pub const fn new(major: u16, version: u16) -> Self {
        Self(((major as u32) << 16) | version as u32)
    }

    /// Raw wire value.
    #[inline]
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        self.0
    }

    /// Rebuilds from the wire value.
    #[inline]
    #[must_use]
    pub const fn from_u32(val: u32) -> Self {
        Self(val)
    }

    /// Major half.
    #[inline]
    #[must_use]
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Version half; zero addresses the latest version.
    #[inline]
    #[must_use]
    pub const fn version(self) -> u16 {
        self.0 as u16
    }

    #[inline]
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Whether a VM word is a well-formed mod id.
    #[inline]
    #[must_use]
    pub const fn validate(word: Word) -> bool {
        word > 0 && word <= u32::MAX as Word && (word as u32 >> 16) != 0
    }
}

/// A compiled program. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mod {
    id: ModId,
    code: Vec<u8>,
    symbols: Vec<(Symbol, u32)>,
}

impl Mod {
    /// Wraps compiled bytecode. `symbols` maps public names to entry
    /// instruction pointers.
    #[must_use]
    pub fn new(id: ModId, code: Vec<u8>, symbols: Vec<(Symbol, u32)>) -> Self {
        Self { id, code, symbols }
    }

    /// Identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ModId {
        self.id
    }

    /// The bytecode.
    #[inline]
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Public symbol index.
    #[inline]
    #[must_use]
    pub fn symbols(&self) -> &[(Symbol, u32)] {
        &self.symbols
    }

    /// Entry point for a public symbol.
    #[must_use]
    pub fn symbol(&self, name: &Symbol) -> Option<u32> {
        self.symbols.iter().find(|(sym, _)| sym == name).map(|&(_, ip)| ip)
    }

    fn save(&self, writer: &mut SaveWriter) {
        writer.write_magic(Magic::Mod);
        writer.write_u32(self.id.to_u32());
        writer.write_u32(self.code.len() as u32);
        writer.write_bytes(&self.code);
        writer.write_u16(self.symbols.len() as u16);
        for (sym, ip) in &self.symbols {
            writer.write_symbol(sym);
            writer.write_u32(*ip);
        }
        writer.write_magic(Magic::Mod);
    }

    fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        reader.expect_magic(Magic::Mod)?;
        let id = ModId::from_u32(reader.read_u32()?);
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?.to_vec();
        let sym_len = usize::from(reader.read_u16()?);
        let mut symbols = Vec::with_capacity(sym_len);
        for _ in 0..sym_len {
            let sym = reader.read_symbol()?;
            let ip = reader.read_u32()?;
            symbols.push((sym, ip));
        }
        reader.expect_magic(Magic::Mod)?;
        Ok(Self { id, code, symbols })
    }
}

// -----------------------------------------------------------------------------
// registry
// -----------------------------------------------------------------------------

/// The mods registry. Owned by the world; brains hold `Arc` handles into
/// it so the exec phase never touches the registry itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mods {
    by_major: BTreeMap<u16, Vec<Arc<Mod>>>,
    next_major: u16,
}

impl Mods {
    /// Empty registry; majors start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self { by_major: BTreeMap::new(), next_major: 1 }
    }

    /// Registers a new program under a fresh major. Returns `(major, 1)`.
    pub fn register(&mut self, code: Vec<u8>, symbols: Vec<(Symbol, u32)>) -> ModId {
        let major = self.next_major;
        self.next_major += 1;

        let id = ModId::new(major, 1);
        self.by_major.insert(major, vec![Arc::new(Mod::new(id, code, symbols))]);
        tracing::debug!(major, "mod registered");
        id
    }

    /// Registers the next version of an existing major. `None` for an
    /// unknown major.
    pub fn update(&mut self, major: u16, code: Vec<u8>, symbols: Vec<(Symbol, u32)>) -> Option<ModId> {
        let versions = self.by_major.get_mut(&major)?;
        let id = ModId::new(major, versions.len() as u16 + 1);
        versions.push(Arc::new(Mod::new(id, code, symbols)));
        tracing::debug!(major, version = id.version(), "mod updated");
        Some(id)
    }

    /// Resolves an id; version zero resolves the latest version.
    #[must_use]
    pub fn get(&self, id: ModId) -> Option<Arc<Mod>> {
        let versions = self.by_major.get(&id.major())?;
        let ix = if id.version() == 0 { versions.len() } else { usize::from(id.version()) };
        versions.get(ix.checked_sub(1)?).cloned()
    }

    /// Latest id under a major.
    #[must_use]
    pub fn latest(&self, major: u16) -> Option<ModId> {
        let versions = self.by_major.get(&major)?;
        Some(ModId::new(major, versions.len() as u16))
    }

    /// Total mod count across versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_major.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_major.is_empty()
    }

    /// Serialises the registry.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_magic(Magic::Mods);
        writer.write_u16(self.next_major);
        writer.write_u32(self.len() as u32);
        for versions in self.by_major.values() {
            for module in versions {
                module.save(writer);
            }
        }
        writer.write_magic(Magic::Mods);
    }

    /// Deserialises the registry.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        reader.expect_magic(Magic::Mods)?;
        let next_major = reader.read_u16()?;
        let count = reader.read_u32()?;

        let mut mods = Self::new();
        mods.next_major = next_major;
        for _ in 0..count {
            let module = Mod::load(reader)?;
            let versions = mods.by_major.entry(module.id().major()).or_default();
            if usize::from(module.id().version()) != versions.len() + 1 {
                return Err(SaveError::Magic {
                    want: u64::from(versions.len() as u32 + 1),
                    got: u64::from(module.id().version()),
                    at: reader.pos(),
                });
            }
            versions.push(Arc::new(module));
        }
        reader.expect_magic(Magic::Mods)?;
        Ok(mods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_versions() {
        let mut mods = Mods::new();
        let a = mods.register(vec![0x51], Vec::new());
        assert_eq!(a, ModId::new(1, 1));

        let b = mods.update(a.major(), vec![0x51, 0x51], Vec::new()).unwrap();
        assert_eq!(b, ModId::new(1, 2));
        assert_eq!(mods.latest(1), Some(b));

        // Version 0 resolves the latest.
        assert_eq!(mods.get(ModId::new(1, 0)).unwrap().id(), b);
        assert_eq!(mods.get(a).unwrap().code(), &[0x51]);
        assert!(mods.get(ModId::new(9, 1)).is_none());
        assert!(mods.update(9, vec![], Vec::new()).is_none());
    }

    #[test]
    fn test_validate() {
        assert!(ModId::validate(Word::from(ModId::new(1, 1).to_u32())));
        assert!(!ModId::validate(0));
        assert!(!ModId::validate(-1));
        // Version-only words have no major and are invalid.
        assert!(!ModId::validate(0x0000_FFFF));
    }

    #[test]
    fn test_save_round_trip() {
        let mut mods = Mods::new();
        mods.register(vec![1, 2, 3], vec![(Symbol::new("main"), 0)]);
        let major = mods.register(vec![4], Vec::new()).major();
        mods.update(major, vec![5, 6], Vec::new());

        let mut writer = SaveWriter::new();
        mods.save(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        let loaded = Mods::load(&mut reader).unwrap();
        assert_eq!(mods, loaded);
        assert!(reader.is_eof());
    }
}
