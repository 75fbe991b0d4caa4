#![forbid(unsafe_code)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vaultgate_kernel_contracts::UnixTimeMs;

/// Wall-clock source for cache ages, refresh claims and rate windows.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> UnixTimeMs;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimeMs {
        UnixTimeMs::now()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn starting_at(at: UnixTimeMs) -> Self {
        Self {
            ms: Arc::new(AtomicU64::new(at.0)),
        }
    }

    pub fn set(&self, at: UnixTimeMs) {
        self.ms.store(at.0, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.ms
            .fetch_add(by.as_millis().min(u128::from(u64::MAX)) as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimeMs {
        UnixTimeMs(self.ms.load(Ordering::SeqCst))
    }
}
