//! GC heap accounting

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Collection threshold in bytes (default: 8MB)
    pub threshold: usize,
    /// Threshold growth factor after a collection that reclaims little
    pub growth_factor: f64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            threshold: 8 * 1024 * 1024,
            growth_factor: 1.5,
        }
    }
}

/// Heap accounting shared by all allocation sites.
///
/// Values themselves are reference-counted; the heap tracks logical
/// allocation volume so the VM knows when to run a mark cycle.
pub struct GcHeap {
    config: GcConfig,
    /// Total live bytes (approximate)
    allocated: AtomicUsize,
    /// Live object count
    objects: AtomicUsize,
    /// Current collection threshold (grows under pressure)
    threshold: AtomicUsize,
}

impl GcHeap {
    /// Create new heap with default config
    pub fn new() -> Arc<Self> {
        Self::with_config(GcConfig::default())
    }

    /// Create new heap with custom config
    pub fn with_config(config: GcConfig) -> Arc<Self> {
        let threshold = config.threshold;
        Arc::new(Self {
            config,
            allocated: AtomicUsize::new(0),
            objects: AtomicUsize::new(0),
            threshold: AtomicUsize::new(threshold),
        })
    }

    /// Record an allocation of `size` bytes
    pub fn record_alloc(&self, size: usize) {
        self.allocated.fetch_add(size, Ordering::Relaxed);
        self.objects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a deallocation of `size` bytes
    pub fn record_free(&self, size: usize) {
        self.allocated.fetch_sub(size.min(self.allocated()), Ordering::Relaxed);
        self.objects.fetch_sub(1.min(self.object_count()), Ordering::Relaxed);
    }

    /// Get current allocated bytes
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Get live object count
    pub fn object_count(&self) -> usize {
        self.objects.load(Ordering::Relaxed)
    }

    /// Check if a collection should be triggered
    pub fn should_gc(&self) -> bool {
        self.allocated() >= self.threshold.load(Ordering::Relaxed)
    }

    /// Grow the threshold after a collection that kept most of the heap live
    pub fn grow_threshold(&self) {
        let current = self.threshold.load(Ordering::Relaxed);
        let next = (current as f64 * self.config.growth_factor) as usize;
        self.threshold.store(next, Ordering::Relaxed);
    }

    /// Get config
    pub fn config(&self) -> &GcConfig {
        &self.config
    }
}
