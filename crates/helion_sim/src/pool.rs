//! # Shards Pool
//!
//! Fixed worker threads, one shard each, synchronised by a single atomic
//! word: quit bit at the top, epoch in the middle bits, finished count in
//! the low byte. The main thread bumps the epoch to start an exec phase
//! and spins on the count to close it; workers sleep 1 ms between polls
//! while paused so an idle world costs nothing.
//!
//! Chunk placement is a consistent hash of the star coordinate with
//! fixed SipHash keys, so the same world always shards the same way.

use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use siphasher::sip::SipHasher13;

use helion_core::coord::Coord;

use crate::shard::Shard;
use crate::world::WorldView;

/// Hard cap on worker threads.
pub const POOL_SHARDS_CAP: usize = 64;

const SYNC_QUIT: u64 = 1 << 63;
const SYNC_EPOCH_BIT: u64 = 1 << 8;
const SYNC_COUNT_MASK: u64 = SYNC_EPOCH_BIT - 1;

/// The barrier word.
#[derive(Debug)]
pub struct SyncWord(AtomicU64);

impl SyncWord {
    fn new() -> Self {
        // A full count means "between epochs": wait_end is trivially
        // satisfied before the first start.
        Self(AtomicU64::new(SYNC_COUNT_MASK))
    }

    fn epoch(value: u64) -> u64 {
        value & !(SYNC_COUNT_MASK | SYNC_QUIT)
    }

    fn count(value: u64) -> u64 {
        value & SYNC_COUNT_MASK
    }

    /// Main thread: opens the next epoch with a zeroed count.
    fn start(&self) {
        let value = self.0.load(Ordering::Relaxed);
        self.0.store(Self::epoch(value) + SYNC_EPOCH_BIT, Ordering::Release);
    }

    /// Main thread: spins until `shards` workers finished the epoch.
    fn wait_end(&self, shards: u64) {
        loop {
            let value = self.0.load(Ordering::Acquire);
            if Self::count(value) >= shards {
                return;
            }
            std::hint::spin_loop();
        }
    }

    /// Main thread: flips the quit bit.
    fn quit(&self) {
        self.0.fetch_or(SYNC_QUIT, Ordering::Relaxed);
    }

    /// Worker: waits for an epoch newer than `epoch`. False on quit.
    /// The 1 ms sleep keeps paused worlds off the CPU; a futex would be
    /// more responsive but this is good enough.
    fn wait_start(&self, epoch: u64) -> bool {
        loop {
            let value = self.0.load(Ordering::Acquire);
            if value & SYNC_QUIT != 0 {
                return false;
            }
            if Self::epoch(value) > epoch {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Worker: reports the epoch done, returning the epoch it ran.
    fn end(&self) -> u64 {
        let prior = self.0.fetch_add(1, Ordering::Release);
        Self::epoch(prior)
    }
}

/// One shard slot shared between the pool and its worker thread. The
/// mutex is uncontended by construction - the sync word is the barrier -
/// it only exists to make the sharing safe.
#[derive(Debug)]
pub struct ShardSlot {
    /// The shard.
    pub shard: Mutex<Shard>,
    /// World view installed for the coming epoch.
    pub view: Mutex<Option<WorldView>>,
}

/// The pool: slots, threads, and the barrier.
#[derive(Debug)]
pub struct Pool {
    slots: Vec<Arc<ShardSlot>>,
    sync: Arc<SyncWord>,
    threads: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Pool with `shards` workers; zero picks the machine's parallelism.
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let shards = if shards == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            shards
        }
        .clamp(1, POOL_SHARDS_CAP);

        let sync = Arc::new(SyncWord::new());
        let slots: Vec<Arc<ShardSlot>> = (0..shards)
            .map(|_| {
                Arc::new(ShardSlot {
                    shard: Mutex::new(Shard::new()),
                    view: Mutex::new(None),
                })
            })
            .collect();

        let threads = slots
            .iter()
            .enumerate()
            .map(|(ix, slot)| {
                let slot = Arc::clone(slot);
                let sync = Arc::clone(&sync);
                std::thread::Builder::new()
                    .name(format!("helion-shard-{ix}"))
                    .spawn(move || worker(&slot, &sync))
                    .expect("shard thread spawn")
            })
            .collect();

        tracing::info!(shards, "shards pool up");
        Self { slots, sync, threads }
    }

    /// Worker count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Consistent placement: same coord, same shard, every run.
    #[must_use]
    pub fn shard_ix(&self, coord: Coord) -> usize {
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        hasher.write(&coord.to_u64().to_le_bytes());
        (hasher.finish() % self.slots.len() as u64) as usize
    }

    /// Slot owning `coord`.
    #[must_use]
    pub fn slot(&self, coord: Coord) -> &Arc<ShardSlot> {
        &self.slots[self.shard_ix(coord)]
    }

    /// All slots, in shard index order.
    #[must_use]
    pub fn slots(&self) -> &[Arc<ShardSlot>] {
        &self.slots
    }

    /// Runs one exec epoch across every worker and waits it out.
    pub fn run_epoch(&self) {
        self.sync.start();
        self.sync.wait_end(self.slots.len() as u64);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.sync.quit();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        tracing::info!("shards pool down");
    }
}

fn worker(slot: &ShardSlot, sync: &SyncWord) {
    let mut epoch = 0;
    while sync.wait_start(epoch) {
        let view = slot.view.lock().clone();
        if let Some(view) = view {
            slot.shard.lock().exec(&view);
        }
        epoch = sync.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_is_stable() {
        let pool = Pool::new(4);
        let coord = Coord::new(123, 456);
        let ix = pool.shard_ix(coord);
        for _ in 0..16 {
            assert_eq!(pool.shard_ix(coord), ix);
        }
        assert!(ix < 4);
    }

    #[test]
    fn test_empty_epochs_complete() {
        let pool = Pool::new(2);
        for _ in 0..8 {
            pool.run_epoch();
        }
    }
}
