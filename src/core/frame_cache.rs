//! Bounded frame cache with LRU eviction by count and byte size.
//!
//! Keys are quantised timeline times (see [`cache_key_for`]), values are the
//! final composited frames.
//!
//! **Why**: Every mutation (put, remove, clear, eviction, config change) runs
//! under one mutex, so `total_bytes == sum(entry sizes)` and
//! `len <= max_frames` hold whenever the lock is free. Recency is tracked
//! with a monotonic access sequence rather than map iteration order.
//!
//! Evicted surfaces are dropped after the lock is released, so release hooks
//! never run inside the critical section.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use log::{debug, info, trace};

use crate::config::{FrameCacheConfig, FrameCacheConfigPatch};
use crate::entities::RenderedFrame;
use crate::error::{CompositorError, CompositorResult};

/// Keys carry 6 decimals; range checks allow for that rounding.
const KEY_TOLERANCE: f64 = 1e-6;

/// Deterministic cache key for `time` quantised to the nearest frame boundary.
///
/// Times within half a frame of the same boundary produce the same key.
pub fn cache_key_for(time: f64, frame_rate: f64) -> String {
    let quantized = if frame_rate.is_finite() && frame_rate > 0.0 {
        (time * frame_rate).round() / frame_rate
    } else {
        time
    };
    // -0.0 would format as "-0.000000"
    let quantized = if quantized == 0.0 { 0.0 } else { quantized };
    format!("{:.6}", quantized)
}

/// Hit/miss counters, lock-free
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Snapshot returned by [`FrameCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameCacheStats {
    pub entries: usize,
    pub size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0 before any request
    pub hit_rate: f64,
    pub max_size_bytes: u64,
    pub max_frames: u32,
}

/// Result of [`FrameCache::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheInsert {
    Inserted,
    /// Key existed; the old frame was released
    Replaced,
    /// Frame alone exceeds `max_size_bytes`; not stored
    Rejected { size_bytes: u64, max_size_bytes: u64 },
}

impl CacheInsert {
    pub fn is_stored(&self) -> bool {
        !matches!(self, CacheInsert::Rejected { .. })
    }

    /// `Err(CacheRejection)` for a rejected insert of `key`, otherwise `Ok(self)`.
    pub fn into_result(self, key: &str) -> CompositorResult<Self> {
        match self {
            CacheInsert::Rejected {
                size_bytes,
                max_size_bytes,
            } => Err(CompositorError::CacheRejection {
                key: key.to_string(),
                size_bytes,
                max_size_bytes,
            }),
            stored => Ok(stored),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    frame: RenderedFrame,
    size_bytes: u64,
    last_accessed: u64,
}

#[derive(Debug)]
struct CacheInner {
    entries: IndexMap<String, CacheEntry>,
    /// last_accessed -> key, oldest first
    by_access: BTreeMap<u64, String>,
    next_seq: u64,
    total_bytes: u64,
    config: FrameCacheConfig,
}

impl CacheInner {
    fn touch_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn take(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.by_access.remove(&entry.last_accessed);
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Evict least-recently-accessed entries until `incoming` bytes fit.
    ///
    /// With an incoming frame one slot must be free (`len < max_frames`);
    /// without one the cache only has to satisfy `len <= max_frames`.
    fn evict_for(&mut self, incoming: Option<u64>, evicted: &mut Vec<RenderedFrame>) {
        let new_size = incoming.unwrap_or(0);
        let max_frames = self.config.max_frames as usize;
        loop {
            let over_count = match incoming {
                Some(_) => self.entries.len() >= max_frames,
                None => self.entries.len() > max_frames,
            };
            let over_bytes = self.total_bytes + new_size > self.config.max_size_bytes;
            if self.entries.is_empty() || !(over_count || over_bytes) {
                break;
            }
            let Some((_, key)) = self.by_access.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.shift_remove(&key) {
                self.total_bytes -= entry.size_bytes;
                debug!("FrameCache evict '{}' ({} bytes)", key, entry.size_bytes);
                evicted.push(entry.frame);
            }
        }
    }
}

/// Key-addressed frame store shared by the interactive path and the preloader.
#[derive(Debug)]
pub struct FrameCache {
    inner: Mutex<CacheInner>,
    stats: CacheStats,
}

impl FrameCache {
    pub fn new(config: FrameCacheConfig) -> Self {
        debug!(
            "FrameCache created: max_frames={}, max_size={} MB",
            config.max_frames,
            config.max_size_bytes / 1024 / 1024
        );
        Self {
            inner: Mutex::new(CacheInner {
                entries: IndexMap::new(),
                by_access: BTreeMap::new(),
                next_seq: 0,
                total_bytes: 0,
                config,
            }),
            stats: CacheStats::default(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lookup; a hit refreshes the entry's recency.
    pub fn get(&self, key: &str) -> Option<RenderedFrame> {
        let mut inner = self.lock();
        let seq = inner.touch_seq();
        let (old_seq, frame) = match inner.entries.get_mut(key) {
            Some(entry) => {
                let old = entry.last_accessed;
                entry.last_accessed = seq;
                (old, entry.frame.clone())
            }
            None => {
                self.stats.record_miss();
                trace!("FrameCache miss '{}'", key);
                return None;
            }
        };
        inner.by_access.remove(&old_seq);
        inner.by_access.insert(seq, key.to_string());
        self.stats.record_hit();
        Some(frame)
    }

    /// Presence check; does not touch recency or hit/miss counters.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Insert or replace `key`. The cache takes ownership of `frame`.
    pub fn put(&self, key: impl Into<String>, frame: RenderedFrame) -> CacheInsert {
        let key = key.into();
        let size_bytes = frame.size_bytes();
        let mut released = Vec::new();

        let result = {
            let mut inner = self.lock();
            let max_size_bytes = inner.config.max_size_bytes;
            if size_bytes > max_size_bytes {
                debug!(
                    "FrameCache reject '{}': {} bytes > limit {}",
                    key, size_bytes, max_size_bytes
                );
                return CacheInsert::Rejected {
                    size_bytes,
                    max_size_bytes,
                };
            }

            let replaced = match inner.take(&key) {
                Some(old) => {
                    released.push(old.frame);
                    true
                }
                None => false,
            };
            inner.evict_for(Some(size_bytes), &mut released);

            let seq = inner.touch_seq();
            inner.by_access.insert(seq, key.clone());
            inner.total_bytes += size_bytes;
            inner.entries.insert(
                key.clone(),
                CacheEntry {
                    frame,
                    size_bytes,
                    last_accessed: seq,
                },
            );
            trace!(
                "FrameCache put '{}' ({} bytes), {} entries / {} bytes",
                key,
                size_bytes,
                inner.entries.len(),
                inner.total_bytes
            );

            if replaced { CacheInsert::Replaced } else { CacheInsert::Inserted }
        };

        drop(released);
        result
    }

    /// Remove and release one entry.
    pub fn remove(&self, key: &str) -> bool {
        let taken = self.lock().take(key);
        taken.is_some()
    }

    /// Release every frame and reset counters.
    pub fn clear(&self) {
        let entries = {
            let mut inner = self.lock();
            inner.by_access.clear();
            inner.total_bytes = 0;
            std::mem::take(&mut inner.entries)
        };
        self.stats.reset();
        debug!("FrameCache cleared ({} entries)", entries.len());
        drop(entries);
    }

    /// Remove every entry whose key time lies in `[start, end]`. Returns the count.
    pub fn invalidate_range(&self, start: f64, end: f64) -> usize {
        let released: Vec<CacheEntry> = {
            let mut inner = self.lock();
            let doomed: Vec<String> = inner
                .entries
                .keys()
                .filter(|k| {
                    k.parse::<f64>()
                        .is_ok_and(|t| t >= start - KEY_TOLERANCE && t <= end + KEY_TOLERANCE)
                })
                .cloned()
                .collect();
            doomed.iter().filter_map(|k| inner.take(k)).collect()
        };
        if !released.is_empty() {
            debug!(
                "FrameCache invalidated {} entries in [{:.4}, {:.4}]",
                released.len(),
                start,
                end
            );
        }
        released.len()
    }

    pub fn stats(&self) -> FrameCacheStats {
        let inner = self.lock();
        FrameCacheStats {
            entries: inner.entries.len(),
            size_bytes: inner.total_bytes,
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            hit_rate: self.stats.hit_rate(),
            max_size_bytes: inner.config.max_size_bytes,
            max_frames: inner.config.max_frames,
        }
    }

    pub fn config(&self) -> FrameCacheConfig {
        self.lock().config
    }

    /// Merge `patch` into the config and shrink to the new limits right away.
    ///
    /// Invalid patches leave the current config untouched.
    pub fn update_config(&self, patch: &FrameCacheConfigPatch) -> CompositorResult<()> {
        let mut released = Vec::new();
        {
            let mut inner = self.lock();
            let next = inner.config.merged(patch)?;
            info!(
                "FrameCache config: max_frames {} -> {}, max_size {} -> {} MB",
                inner.config.max_frames,
                next.max_frames,
                inner.config.max_size_bytes / 1024 / 1024,
                next.max_size_bytes / 1024 / 1024
            );
            inner.config = next;
            inner.evict_for(None, &mut released);
        }
        drop(released);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from least to most recently accessed.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.lock().by_access.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    const FRAME_BYTES: u64 = 2 * 2 * 4;

    fn cache(max_frames: u32, max_size_bytes: u64) -> FrameCache {
        FrameCache::new(FrameCacheConfig {
            max_frames,
            max_size_bytes,
            ..FrameCacheConfig::default()
        })
    }

    fn frame() -> RenderedFrame {
        RenderedFrame::solid(2, 2, [1, 2, 3, 255]).unwrap()
    }

    fn counted_frame(released: &Arc<AtomicUsize>) -> RenderedFrame {
        let counter = Arc::clone(released);
        RenderedFrame::with_release_hook(
            vec![0u8; FRAME_BYTES as usize],
            2,
            2,
            Some(Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap()
    }

    #[test]
    fn test_cache_key_stability() {
        for fps in [24.0, 25.0, 29.97, 30.0, 60.0] {
            let step = 1.0 / fps;
            for i in 0..50 {
                let t = i as f64 * step;
                let k = cache_key_for(t, fps);
                assert_eq!(k, cache_key_for(t + 0.49 * step, fps));
                assert_eq!(k, cache_key_for(t - 0.49 * step, fps));
                assert_ne!(k, cache_key_for(t + step, fps));
            }
        }
    }

    #[test]
    fn test_cache_key_no_negative_zero() {
        assert_eq!(cache_key_for(-0.001, 30.0), "0.000000");
        assert_eq!(cache_key_for(0.0, 30.0), cache_key_for(-0.0, 30.0));
    }

    #[test]
    fn test_hit_miss_stats() {
        let cache = cache(10, 1 << 20);
        assert_eq!(cache.stats().hit_rate, 0.0);
        cache.put("a", frame());
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert!(!cache.contains("b"));
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_lru_evicts_oldest() {
        let cache = cache(3, 1 << 20);
        for k in ["0", "1", "2", "3"] {
            cache.put(k, frame());
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("0"));
        assert_eq!(cache.keys_by_recency(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache = cache(3, 1 << 20);
        cache.put("A", frame());
        cache.put("B", frame());
        cache.put("C", frame());
        assert!(cache.get("A").is_some());
        cache.put("D", frame());

        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
        assert!(cache.contains("C"));
        assert!(cache.contains("D"));
    }

    #[test]
    fn test_byte_limit_evicts() {
        let cache = cache(100, FRAME_BYTES * 2);
        cache.put("a", frame());
        cache.put("b", frame());
        cache.put("c", frame());
        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.size_bytes, FRAME_BYTES * 2);
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_replace_does_not_double_count() {
        let cache = cache(10, 1 << 20);
        assert_eq!(cache.put("a", frame()), CacheInsert::Inserted);
        assert_eq!(cache.put("a", frame()), CacheInsert::Replaced);
        assert_eq!(cache.stats().size_bytes, FRAME_BYTES);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_byte_invariant_over_mixed_ops() {
        let cache = cache(4, 1 << 20);
        let big = RenderedFrame::solid(4, 4, [0; 4]).unwrap();
        cache.put("a", frame());
        cache.put("b", big.clone());
        cache.put("c", frame());
        cache.remove("a");
        cache.put("d", big);
        cache.put("e", frame());
        cache.put("c", frame());
        let expected = FRAME_BYTES * 2 + 2 * (4 * 4 * 4);
        assert_eq!(cache.stats().size_bytes, expected);
        cache.clear();
        assert_eq!(cache.stats().size_bytes, 0);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_oversized_rejected() {
        let cache = cache(10, FRAME_BYTES - 1);
        let res = cache.put("a", frame());
        assert!(!res.is_stored());
        assert!(!cache.contains("a"));
        assert_eq!(cache.stats().size_bytes, 0);

        match res.into_result("a") {
            Err(CompositorError::CacheRejection {
                key,
                size_bytes,
                max_size_bytes,
            }) => {
                assert_eq!(key, "a");
                assert_eq!(size_bytes, FRAME_BYTES);
                assert_eq!(max_size_bytes, FRAME_BYTES - 1);
            }
            other => panic!("expected CacheRejection, got {:?}", other),
        }
        assert_eq!(CacheInsert::Inserted.into_result("b").unwrap(), CacheInsert::Inserted);
    }

    #[test]
    fn test_release_exactly_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let cache = cache(2, 1 << 20);
        cache.put("a", counted_frame(&released));
        cache.put("b", counted_frame(&released));
        cache.put("c", counted_frame(&released)); // evicts a
        assert_eq!(released.load(Ordering::SeqCst), 1);
        cache.put("b", counted_frame(&released)); // replaces b
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(cache.remove("c"));
        assert!(!cache.remove("c"));
        assert_eq!(released.load(Ordering::SeqCst), 3);
        cache.clear();
        assert_eq!(released.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_update_config_shrinks_immediately() {
        let cache = cache(10, 1 << 20);
        for i in 0..6 {
            cache.put(i.to_string(), frame());
        }
        cache
            .update_config(&FrameCacheConfigPatch::default().max_frames(4))
            .unwrap();
        assert_eq!(cache.len(), 4);
        assert!(!cache.contains("0"));
        assert!(!cache.contains("1"));

        cache
            .update_config(&FrameCacheConfigPatch::default().max_size_bytes(FRAME_BYTES * 2))
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.config().max_frames, 4);
    }

    #[test]
    fn test_update_config_rejects_zero() {
        let cache = cache(10, 1 << 20);
        cache.put("a", frame());
        assert!(cache.update_config(&FrameCacheConfigPatch::default().max_frames(0)).is_err());
        assert_eq!(cache.config().max_frames, 10);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_range() {
        let cache = cache(100, 1 << 20);
        for i in 0..10 {
            cache.put(cache_key_for(i as f64 / 10.0, 10.0), frame());
        }
        assert_eq!(cache.invalidate_range(0.2, 0.4), 3);
        assert!(!cache.contains(&cache_key_for(0.3, 10.0)));
        assert!(cache.contains(&cache_key_for(0.5, 10.0)));
        assert_eq!(cache.stats().size_bytes, FRAME_BYTES * 7);
    }
}
