//! Single-slot level channel from the audio thread to the meter
//!
//! The slot holds the loudest level of the current peak window. The reverse
//! direction carries one flag: the consumer asks for a new window and the
//! producer clears it when it re-arms. Level and flag share one `AtomicU64`
//! so a reading is never lost between the consumer's read and its reset, and
//! neither side can block.

use std::sync::atomic::{AtomicU64, Ordering};

use super::level::MIN_DB;

/// Set while a window reset is pending; the low 32 bits hold the level
const RESET_PENDING: u64 = 1 << 32;

#[inline]
fn pack(level_db: f32, reset: bool) -> u64 {
    let bits = level_db.to_bits() as u64;
    if reset {
        bits | RESET_PENDING
    } else {
        bits
    }
}

#[inline]
fn level_of(state: u64) -> f32 {
    f32::from_bits(state as u32)
}

#[derive(Debug)]
pub struct LevelChannel {
    state: AtomicU64,
}

impl LevelChannel {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(pack(MIN_DB, true)),
        }
    }

    /// Overwrite the slot and drop any pending reset (audio thread)
    #[inline]
    pub fn publish(&self, level_db: f32) {
        self.state.store(pack(level_db, false), Ordering::Release);
    }

    /// Fold a fresh reading into the window (audio thread)
    ///
    /// Starts a new window from `fresh` if a reset is pending, otherwise
    /// keeps the louder of the window maximum and `fresh`. Returns the
    /// published level.
    #[inline]
    pub fn accumulate(&self, fresh: f32) -> f32 {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let window = if current & RESET_PENDING != 0 {
                fresh
            } else {
                level_of(current).max(fresh)
            };
            match self.state.compare_exchange_weak(
                current,
                pack(window, false),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return window,
                Err(actual) => current = actual,
            }
        }
    }

    /// Most recently published level (control domain)
    #[inline]
    pub fn consume_latest(&self) -> f32 {
        level_of(self.state.load(Ordering::Acquire))
    }

    /// Read the window maximum and start a new window in one step
    /// (control domain)
    #[inline]
    pub fn take_window(&self) -> f32 {
        level_of(self.state.swap(pack(MIN_DB, true), Ordering::AcqRel))
    }

    /// Ask the producer to start a new peak window (control domain)
    #[inline]
    pub fn request_reset(&self) {
        self.state.fetch_or(RESET_PENDING, Ordering::AcqRel);
    }

    /// Consume a pending reset request (audio thread)
    ///
    /// Returns true exactly once per request.
    #[inline]
    pub fn take_reset(&self) -> bool {
        self.state.fetch_and(!RESET_PENDING, Ordering::AcqRel) & RESET_PENDING != 0
    }
}

impl Default for LevelChannel {
    fn default() -> Self {
        Self::new()
    }
}
