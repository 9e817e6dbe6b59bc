//! # Helion Sim
//!
//! The simulation core: a deterministic tick-driven engine advancing
//! per-star chunks in parallel shards. Items move through worker-mediated
//! ports, machines run recipe tapes, brains execute VM mods, and every
//! cross-star effect (lane packets, tech unlocks, logs, user replies)
//! travels through the magic-tagged shard bus so world-visible mutation
//! stays serial and reproducible.

pub mod active;
pub mod cargo;
pub mod chunk;
pub mod effects;
pub mod energy;
pub mod items;
pub mod lanes;
pub mod log;
pub mod pool;
pub mod proxy;
pub mod shard;
pub mod tech;
pub mod world;

pub use chunk::{Chunk, ChunkApi};
pub use world::{World, WorldView};
