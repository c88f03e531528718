use parking_lot::Mutex;

/// State of one cache slot.
///
/// A slot never degrades into a partially-valid record: it is either a
/// parsed record, a name awaiting reload, or a name whose reload already
/// failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry<T> {
    /// Parsed command output, authoritative until invalidated.
    Fresh(T),
    /// Marked invalid after a suspected mutation; must be reloaded.
    Stale(String),
    /// A reload was attempted and failed; the record is unavailable.
    Unreadable(String),
}

impl<T> CacheEntry<T> {
    pub fn is_stale(&self) -> bool {
        !matches!(self, CacheEntry::Fresh(_))
    }

    pub fn fresh(&self) -> Option<&T> {
        match self {
            CacheEntry::Fresh(record) => Some(record),
            _ => None,
        }
    }
}

/// Hit/miss counters for the engine's read API.
#[derive(Debug, Default)]
pub struct CacheStats {
    counters: Mutex<Counters>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
}

/// Snapshot returned by [`CacheStats::info`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheInfo {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

impl CacheStats {
    pub(crate) fn hit(&self) {
        self.counters.lock().hits += 1;
    }

    pub(crate) fn miss(&self) {
        self.counters.lock().misses += 1;
    }

    pub fn clear(&self) {
        *self.counters.lock() = Counters::default();
    }

    pub fn info(&self) -> CacheInfo {
        let counters = *self.counters.lock();
        let total = counters.hits + counters.misses;
        CacheInfo {
            hits: counters.hits,
            misses: counters.misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                counters.hits as f64 / total as f64
            },
        }
    }
}
