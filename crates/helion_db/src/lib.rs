//! # Helion DB
//!
//! The frozen content half of the simulation: item kinds and their
//! research parameters, the IO vocabulary, recipe tapes, the specs table
//! and star generation data. Everything here is built once at startup into
//! an immutable [`Db`] handle and then only read.

pub mod io;
pub mod items;
pub mod specs;
pub mod stars;
pub mod tape;

use thiserror::Error;

use helion_core::atom::Atoms;

/// Content loading errors. These abort startup; they can never occur
/// mid-tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML document failed to parse.
    #[error("invalid tapes document: {0}")]
    Toml(String),

    /// A tape references an unknown item name.
    #[error("unknown item '{0}' in tape for '{1}'")]
    UnknownItem(String, String),

    /// A tape names a host that is not a tape-running machine.
    #[error("item '{0}' cannot host tapes")]
    BadHost(String),

    /// Two tapes produce the same item.
    #[error("duplicate tape for item '{0}'")]
    DuplicateTape(String),

    /// The recipe graph contains a cycle.
    #[error("cycle detected in recipe graph at item '{0}'")]
    Cycle(String),
}

/// Immutable content handle passed to the simulation at startup.
#[derive(Debug)]
pub struct Db {
    /// Recipe registry.
    pub tapes: tape::Tapes,
}

impl Db {
    /// Builds the default content set (embedded tapes document).
    pub fn populate() -> Result<Self, ConfigError> {
        let tapes = tape::Tapes::from_toml(tape::DEFAULT_TAPES_TOML)?;
        tracing::debug!(tapes = tapes.len(), "content tables populated");
        Ok(Self { tapes })
    }

    /// Registers every fixed atom (items, IO verbs, errors, specs) into an
    /// atoms registry.
    pub fn populate_atoms(&self, atoms: &mut Atoms) {
        items::populate_atoms(atoms);
        io::populate_atoms(atoms);
        specs::populate_atoms(atoms);
    }
}
