//! Hand-off of created short codes from writer VUs to readers.

use arc_swap::ArcSwapOption;
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::Instant;

/// A short code made visible to other VUs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub short_code: String,
    pub original_url: String,

    /// 1-based publication sequence number
    pub seq: u64,

    pub at: Instant,
}

/// "Latest identifier" slot shared across VUs, optionally backed by an
/// append-only pool of every identifier published so far.
///
/// Readers always see either nothing or one complete [`Published`] value.
/// Publishing replaces the latest value; older values are never restored.
#[derive(Default)]
pub struct IdentifierSlot {
    latest: ArcSwapOption<Published>,
    seq: AtomicU64,

    /// Present only for slots created with [`IdentifierSlot::pooled`]
    pool: Option<RwLock<Vec<Arc<Published>>>>,
}

impl IdentifierSlot {
    /// Slot that keeps only the latest identifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot that also keeps every identifier for [`IdentifierSlot::random`].
    pub fn pooled() -> Self {
        Self {
            pool: Some(RwLock::new(Vec::new())),
            ..Self::default()
        }
    }

    pub fn publish(&self, short_code: String, original_url: String) -> u64 {
        let Some(pool) = &self.pool else {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            self.latest
                .store(Some(Arc::new(Published::new(short_code, original_url, seq))));
            return seq;
        };

        // seq, pool order and latest move together under the write lock
        let mut pool = pool.write().unwrap_or_else(PoisonError::into_inner);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let published = Arc::new(Published::new(short_code, original_url, seq));
        pool.push(published.clone());
        self.latest.store(Some(published));
        seq
    }

    pub fn latest(&self) -> Option<Arc<Published>> {
        self.latest.load_full()
    }

    /// Uniformly drawn identifier from the pool.
    ///
    /// Falls back to the latest identifier when the slot keeps no pool.
    pub fn random(&self, rng: &mut StdRng) -> Option<Arc<Published>> {
        let Some(pool) = &self.pool else {
            return self.latest();
        };

        let pool = pool.read().unwrap_or_else(PoisonError::into_inner);
        if pool.is_empty() {
            return None;
        }
        Some(pool[rng.gen_range(0..pool.len())].clone())
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Number of identifiers published so far.
    pub fn published_count(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

impl Published {
    fn new(short_code: String, original_url: String, seq: u64) -> Self {
        Self {
            short_code,
            original_url,
            seq,
            at: Instant::now(),
        }
    }
}
