//! # Tapes
//!
//! A tape is an immutable recipe: an ordered run of input, work and output
//! steps, the machine kind that can host it, and its energy draw per tick.
//! Tapes are keyed by the item they produce and parsed once at startup
//! from a TOML document; the runtime only ever reads them.
//!
//! The running position of a machine inside a tape is a single packed
//! word, [`TapePacked`]: `(item, position, registry-index cache)`. The
//! cache accelerates lookup and must be re-resolved on load; only the
//! `(item, position)` pair is canonical.

use serde::Deserialize;

use crate::items::{Item, ITEM_SYNTH_LAST};
use crate::ConfigError;

/// Element axis length for [`TapeInfo::elems`]; index = elem code - 1.
pub const ELEM_COUNT: usize = ITEM_SYNTH_LAST as usize;

/// One step of a tape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapeStep {
    /// Wait for one item of this kind on the input port.
    Input(Item),
    /// Burn one tick of work.
    Work,
    /// Emit one item of this kind on the output port.
    Output(Item),
}

/// Result of indexing a tape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapeRet {
    /// Position past the last step.
    Eof,
    /// Step at the position.
    Step(TapeStep),
}

/// An immutable recipe.
#[derive(Clone, Debug)]
pub struct Tape {
    id: Item,
    host: Item,
    energy: u32,
    work: u8,
    bits: u8,
    steps: Vec<TapeStep>,
}

impl Tape {
    /// The item this tape produces; also its registry key.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> Item {
        self.id
    }

    /// The machine kind that can run this tape.
    #[inline]
    #[must_use]
    pub const fn host(&self) -> Item {
        self.host
    }

    /// Energy drawn per running tick.
    #[inline]
    #[must_use]
    pub const fn energy(&self) -> u32 {
        self.energy
    }

    /// Number of work steps.
    #[inline]
    #[must_use]
    pub const fn work(&self) -> u8 {
        self.work
    }

    /// Tech bits gating this recipe.
    #[inline]
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    /// Step count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u8 {
        self.steps.len() as u8
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at position `it`, or [`TapeRet::Eof`] past the end.
    #[inline]
    #[must_use]
    pub fn at(&self, it: u8) -> TapeRet {
        match self.steps.get(usize::from(it)) {
            Some(&step) => TapeRet::Step(step),
            None => TapeRet::Eof,
        }
    }

    /// Input steps, in order.
    pub fn inputs(&self) -> impl Iterator<Item = Item> + '_ {
        self.steps.iter().filter_map(|step| match step {
            TapeStep::Input(item) => Some(*item),
            _ => None,
        })
    }
}

/// Derived recipe facts: transitive element cost and crafting depth.
#[derive(Clone, Debug, Default)]
pub struct TapeInfo {
    /// Crafting depth; elements are rank 1.
    pub rank: u8,
    /// Transitive element counts, indexed by `elem code - 1`.
    pub elems: [u16; ELEM_COUNT],
}

impl TapeInfo {
    fn elem(item: Item) -> Self {
        let mut info = Self { rank: 1, elems: [0; ELEM_COUNT] };
        info.elems[item as u8 as usize - 1] = 1;
        info
    }
}

// -----------------------------------------------------------------------------
// packed cursor
// -----------------------------------------------------------------------------

/// Packed tape cursor: `{item:8, position:8, cache+1:32}` in one word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TapePacked(u64);

impl TapePacked {
    /// The empty cursor.
    pub const NIL: Self = Self(0);

    /// Packs a cursor. `cache` is the tape's registry index.
    #[inline]
    #[must_use]
    pub fn new(item: Item, it: u8, cache: u32) -> Self {
        Self((u64::from(item as u8) << 56) | (u64::from(it) << 48) | u64::from(cache + 1))
    }

    #[inline]
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// The tape's item key.
    #[inline]
    #[must_use]
    pub const fn item(self) -> Item {
        match Item::from_u8((self.0 >> 56) as u8) {
            Some(item) => item,
            None => Item::Nil,
        }
    }

    /// Current position.
    #[inline]
    #[must_use]
    pub const fn it(self) -> u8 {
        (self.0 >> 48) as u8
    }

    /// Cached registry index; None when the cache was never resolved.
    #[inline]
    #[must_use]
    pub const fn cache(self) -> Option<u32> {
        let raw = self.0 as u32;
        if raw == 0 { None } else { Some(raw - 1) }
    }

    /// Cursor advanced one step.
    #[inline]
    #[must_use]
    pub const fn inc(self) -> Self {
        Self(self.0 + (1 << 48))
    }

    /// Cursor rewound to position zero.
    #[inline]
    #[must_use]
    pub const fn rewind(self) -> Self {
        Self(self.0 & !(0xFF << 48))
    }

    /// Raw word, as persisted. The cache bits travel with it but are
    /// meaningless in another process; re-resolve with
    /// [`Tapes::repack`].
    #[inline]
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Rebuilds from the persisted word.
    #[inline]
    #[must_use]
    pub const fn from_u64(val: u64) -> Self {
        Self(val)
    }
}

// -----------------------------------------------------------------------------
// registry
// -----------------------------------------------------------------------------

/// Immutable tape registry, keyed by produced item.
#[derive(Debug)]
pub struct Tapes {
    list: Vec<Tape>,
    infos: Vec<TapeInfo>,
    by_item: [u32; 256],
}

impl Default for Tapes {
    fn default() -> Self {
        Self {
            list: Vec::new(),
            infos: Vec::new(),
            by_item: [0u32; 256],
        }
    }
}

/// Embedded default recipe set.
pub const DEFAULT_TAPES_TOML: &str = include_str!("../tapes/default.toml");

#[derive(Deserialize)]
struct TapeDoc {
    tapes: Vec<TapeEntry>,
}

#[derive(Deserialize)]
struct TapeEntry {
    out: String,
    host: String,
    #[serde(default = "default_energy")]
    energy: u32,
    #[serde(default)]
    work: u8,
    #[serde(default)]
    inputs: Vec<String>,
}

fn default_energy() -> u32 {
    1
}

fn resolve(name: &str, ctx: &str) -> Result<Item, ConfigError> {
    Item::from_name(name)
        .ok_or_else(|| ConfigError::UnknownItem(name.to_owned(), ctx.to_owned()))
}

impl Tapes {
    /// Parses a TOML document into a registry and derives per-tape info.
    pub fn from_toml(doc: &str) -> Result<Self, ConfigError> {
        let doc: TapeDoc =
            toml::from_str(doc).map_err(|err| ConfigError::Toml(err.to_string()))?;

        let mut tapes = Self { list: Vec::new(), infos: Vec::new(), by_item: [0; 256] };

        for entry in &doc.tapes {
            let out = resolve(&entry.out, &entry.out)?;
            let host = resolve(&entry.host, &entry.out)?;
            if !matches!(
                host,
                Item::Extract | Item::Condenser | Item::Printer | Item::Assembly | Item::Collider
            ) {
                return Err(ConfigError::BadHost(entry.host.clone()));
            }
            if tapes.by_item[out as u8 as usize] != 0 {
                return Err(ConfigError::DuplicateTape(entry.out.clone()));
            }

            let mut steps = Vec::new();
            for input in &entry.inputs {
                steps.push(TapeStep::Input(resolve(input, &entry.out)?));
            }
            for _ in 0..entry.work {
                steps.push(TapeStep::Work);
            }
            steps.push(TapeStep::Output(out));

            tapes.list.push(Tape {
                id: out,
                host,
                energy: entry.energy,
                work: entry.work,
                bits: out.lab_bits(),
                steps,
            });
            tapes.by_item[out as u8 as usize] = tapes.list.len() as u32;
        }

        tapes.populate_infos()?;
        Ok(tapes)
    }

    /// Transitive element counts and ranks; also the cycle check.
    fn populate_infos(&mut self) -> Result<(), ConfigError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Visiting,
            Done,
        }

        fn visit(
            tapes: &Tapes,
            item: Item,
            marks: &mut [Mark; 256],
            memo: &mut [Option<TapeInfo>; 256],
        ) -> Result<TapeInfo, ConfigError> {
            let code = item as u8 as usize;
            if let Some(info) = &memo[code] {
                return Ok(info.clone());
            }
            if marks[code] == Mark::Visiting {
                return Err(ConfigError::Cycle(item.name().to_owned()));
            }
            marks[code] = Mark::Visiting;

            let info = match tapes.get(item) {
                None | Some(_) if item.is_elem() => TapeInfo::elem(item),
                None => TapeInfo::default(),
                Some(tape) => {
                    let mut info = TapeInfo::default();
                    for input in tape.inputs() {
                        let sub = visit(tapes, input, marks, memo)?;
                        info.rank = info.rank.max(sub.rank);
                        for (axis, count) in info.elems.iter_mut().zip(sub.elems.iter()) {
                            *axis = axis.saturating_add(*count);
                        }
                    }
                    info.rank = info.rank.saturating_add(1);
                    info
                }
            };

            marks[code] = Mark::Done;
            memo[code] = Some(info.clone());
            Ok(info)
        }

        let mut marks = [Mark::New; 256];
        let mut memo: [Option<TapeInfo>; 256] = std::array::from_fn(|_| None);

        let ids: Vec<Item> = self.list.iter().map(Tape::id).collect();
        let infos = ids
            .into_iter()
            .map(|id| visit(self, id, &mut marks, &mut memo))
            .collect::<Result<_, _>>()?;
        self.infos = infos;
        Ok(())
    }

    /// Number of registered tapes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// The tape producing `item`.
    #[inline]
    #[must_use]
    pub fn get(&self, item: Item) -> Option<&Tape> {
        let ix = self.by_item[item as u8 as usize];
        if ix == 0 { None } else { self.list.get(ix as usize - 1) }
    }

    /// Derived info for `item`. Elements have unit info even without a
    /// tape.
    #[must_use]
    pub fn info(&self, item: Item) -> Option<TapeInfo> {
        let ix = self.by_item[item as u8 as usize];
        if ix != 0 {
            return self.infos.get(ix as usize - 1).cloned();
        }
        item.is_elem().then(|| TapeInfo::elem(item))
    }

    /// Registry index for `item`, used as the packed-cursor cache.
    #[inline]
    #[must_use]
    pub fn index_of(&self, item: Item) -> Option<u32> {
        let ix = self.by_item[item as u8 as usize];
        if ix == 0 { None } else { Some(ix - 1) }
    }

    /// Tape at a cached registry index.
    #[inline]
    #[must_use]
    pub fn by_index(&self, ix: u32) -> Option<&Tape> {
        self.list.get(ix as usize)
    }

    /// Builds a fresh cursor for `item`.
    #[must_use]
    pub fn pack(&self, item: Item, it: u8) -> Option<TapePacked> {
        self.index_of(item).map(|ix| TapePacked::new(item, it, ix))
    }

    /// Re-resolves a loaded cursor's cache from its canonical
    /// `(item, position)` pair. Nil cursors pass through.
    #[must_use]
    pub fn repack(&self, packed: TapePacked) -> TapePacked {
        if packed.is_nil() {
            return packed;
        }
        self.pack(packed.item(), packed.it()).unwrap_or(TapePacked::NIL)
    }

    /// Resolves a cursor to its tape through the cache.
    #[must_use]
    pub fn resolve(&self, packed: TapePacked) -> Option<&Tape> {
        let tape = self.by_index(packed.cache()?)?;
        (tape.id() == packed.item()).then_some(tape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tapes() -> Tapes {
        Tapes::from_toml(DEFAULT_TAPES_TOML).expect("default tapes parse")
    }

    #[test]
    fn test_default_doc_parses() {
        let tapes = tapes();
        assert!(tapes.len() > 30);

        let tape = tapes.get(Item::Monobarex).expect("monobarex tape");
        assert_eq!(tape.host(), Item::Printer);
        assert_eq!(tape.at(0), TapeRet::Step(TapeStep::Input(Item::ElemA)));
        assert_eq!(tape.at(tape.len() - 1), TapeRet::Step(TapeStep::Output(Item::Monobarex)));
        assert_eq!(tape.at(tape.len()), TapeRet::Eof);
    }

    #[test]
    fn test_info_ranks_grow_with_depth() {
        let tapes = tapes();
        let base = tapes.info(Item::Monobarex).expect("info").rank;
        let deep = tapes.info(Item::Duochium).expect("info").rank;
        assert!(deep > base);

        let info = tapes.info(Item::ElemA).expect("elem info");
        assert_eq!(info.rank, 1);
        assert_eq!(info.elems[Item::ElemA as u8 as usize - 1], 1);
    }

    #[test]
    fn test_packed_cursor() {
        let tapes = tapes();
        let packed = tapes.pack(Item::Monobarex, 0).expect("pack");
        assert_eq!(packed.item(), Item::Monobarex);
        assert_eq!(packed.it(), 0);

        let stepped = packed.inc().inc();
        assert_eq!(stepped.it(), 2);
        assert_eq!(stepped.rewind().it(), 0);
        assert_eq!(stepped.item(), Item::Monobarex);

        // The cache survives the round-trip bit-exactly but must be
        // re-resolved before use.
        let reloaded = TapePacked::from_u64(stepped.to_u64());
        assert_eq!(tapes.repack(reloaded), stepped);
        assert!(tapes.resolve(stepped).is_some());
    }

    #[test]
    fn test_cycles_rejected() {
        let doc = r#"
            [[tapes]]
            out = "monobarex"
            host = "printer"
            inputs = ["monochate"]

            [[tapes]]
            out = "monochate"
            host = "printer"
            inputs = ["monobarex"]
        "#;
        assert!(matches!(Tapes::from_toml(doc), Err(ConfigError::Cycle(_))));
    }
}
