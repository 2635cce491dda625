//! Settable wall clock layered over the monotonic timer.

use core::sync::atomic::{AtomicU64, Ordering};

/// Epoch reference shared between the network stack and the job worker.
///
/// Reads return zero until someone calls [`WallClock::set`]; consumers treat
/// that as "clock never synced" and skip time-dependent work.
pub struct WallClock {
    /// `epoch_ms - monotonic_ms` at the moment of the last set; zero means
    /// unset.
    offset_ms: AtomicU64,
}

impl WallClock {
    pub const fn new() -> Self {
        Self {
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Anchor the clock: `epoch` seconds were current at monotonic `now_ms`.
    pub fn set(&self, epoch: u64, now_ms: u64) {
        let offset = (epoch * 1_000).saturating_sub(now_ms).max(1);
        self.offset_ms.store(offset, Ordering::Release);
        log::info!("wall clock set epoch={epoch}");
    }

    /// Current epoch seconds, or zero while unset.
    pub fn now_epoch(&self, now_ms: u64) -> u64 {
        let offset = self.offset_ms.load(Ordering::Acquire);
        if offset == 0 {
            return 0;
        }
        (offset + now_ms) / 1_000
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}
