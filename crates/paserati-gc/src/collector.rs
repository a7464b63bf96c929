//! Mark-phase collector

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ephemeron::EphemeronTable;
use crate::heap::GcHeap;
use crate::object::{GcObject, advance_cycle};

/// Collection statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Number of collections performed
    pub collections: usize,
    /// Objects marked live in the last cycle
    pub last_marked: usize,
    /// Ephemeron entries dropped in the last cycle
    pub last_swept_ephemerons: usize,
    /// Total pause time across all collections
    pub total_pause: Duration,
    /// Pause time of the last collection
    pub last_pause: Duration,
}

/// Tracer driving the mark phase.
///
/// `mark` stamps an object as reached in the current cycle and recurses
/// into its references; already-stamped objects are skipped, which
/// terminates reference cycles in the object graph.
pub struct Tracer {
    marked: usize,
}

impl Tracer {
    fn new() -> Self {
        Self { marked: 0 }
    }

    /// Mark an object reachable and trace through it
    pub fn mark(&mut self, obj: &dyn GcObject) {
        let header = obj.header();
        if header.is_marked() {
            return;
        }
        header.mark_reached();
        self.marked += 1;
        obj.trace(self);
    }

    /// Number of objects marked so far in this cycle
    pub fn marked(&self) -> usize {
        self.marked
    }
}

/// The collector: marks the live graph from explicit roots, then lets
/// registered ephemeron tables drop entries whose keys died.
pub struct Collector {
    heap: Arc<GcHeap>,
    stats: GcStats,
}

impl Collector {
    /// Create a new collector over a heap
    pub fn new(heap: Arc<GcHeap>) -> Self {
        Self {
            heap,
            stats: GcStats::default(),
        }
    }

    /// Run a mark cycle from the given roots.
    ///
    /// Ephemeron tables participate in a fixpoint: an entry's value is only
    /// traced once its key is marked, and entries with unmarked keys are
    /// swept afterwards.
    pub fn collect(&mut self, roots: &[&dyn GcObject], ephemerons: &[&dyn EphemeronTable]) -> usize {
        let start = Instant::now();
        advance_cycle();

        let mut tracer = Tracer::new();
        for root in roots {
            tracer.mark(*root);
        }

        // Ephemeron fixpoint: tracing a value may make another table's key
        // reachable, so iterate until no new object is marked.
        if !ephemerons.is_empty() {
            let mut iterations = 0usize;
            loop {
                let before = tracer.marked();
                for table in ephemerons {
                    table.trace_live(&mut tracer);
                }
                iterations += 1;
                if tracer.marked() == before {
                    break;
                }
                if iterations > 1000 {
                    #[cfg(feature = "gc_logging")]
                    tracing::warn!(target: "paserati::gc", "ephemeron fixpoint iteration limit reached");
                    break;
                }
            }
        }

        let mut swept = 0;
        for table in ephemerons {
            swept += table.sweep_dead();
        }

        let elapsed = start.elapsed();
        self.stats.collections += 1;
        self.stats.last_marked = tracer.marked();
        self.stats.last_swept_ephemerons = swept;
        self.stats.total_pause += elapsed;
        self.stats.last_pause = elapsed;

        if self.heap.should_gc() {
            // Most of the heap survived; back off before the next cycle.
            self.heap.grow_threshold();
        }

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "paserati::gc",
            collection = self.stats.collections,
            marked = tracer.marked(),
            swept_ephemerons = swept,
            pause_us = elapsed.as_micros() as u64,
            "GC cycle complete"
        );

        tracer.marked()
    }

    /// Get collection statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Get the heap
    pub fn heap(&self) -> &Arc<GcHeap> {
        &self.heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{GcHeader, tags};

    struct Node {
        header: GcHeader,
        next: Option<Arc<Node>>,
    }

    impl GcObject for Node {
        fn header(&self) -> &GcHeader {
            &self.header
        }

        fn trace(&self, tracer: &mut Tracer) {
            if let Some(next) = &self.next {
                tracer.mark(next.as_ref());
            }
        }
    }

    #[test]
    fn test_mark_chain() {
        let c = Arc::new(Node {
            header: GcHeader::new(tags::OBJECT),
            next: None,
        });
        let b = Arc::new(Node {
            header: GcHeader::new(tags::OBJECT),
            next: Some(c.clone()),
        });
        let a = Arc::new(Node {
            header: GcHeader::new(tags::OBJECT),
            next: Some(b.clone()),
        });

        let mut collector = Collector::new(GcHeap::new());
        let marked = collector.collect(&[a.as_ref()], &[]);

        assert_eq!(marked, 3);
        assert!(a.header.is_marked());
        assert!(c.header.is_marked());
        assert_eq!(collector.stats().collections, 1);
    }

    #[test]
    fn test_unreachable_stays_white() {
        let orphan = Node {
            header: GcHeader::new(tags::OBJECT),
            next: None,
        };
        let root = Node {
            header: GcHeader::new(tags::OBJECT),
            next: None,
        };

        let mut collector = Collector::new(GcHeap::new());
        collector.collect(&[&root], &[]);

        assert!(root.header.is_marked());
        assert!(!orphan.header.is_marked());
    }
}
