//! Ephemeron tables (WeakMap/WeakSet backing)
//!
//! An ephemeron entry keeps its value alive only while its key is alive:
//! the value is traced during the mark fixpoint only after the key has
//! been marked, and entries with dead keys are swept after marking.

use crate::collector::Tracer;

/// Key-dependent reachability hook the collector drives during a cycle.
///
/// The concrete table (which knows the value representation) lives in the
/// VM core; the collector only needs these two phases.
pub trait EphemeronTable {
    /// Trace the values of entries whose keys are currently marked.
    /// Returns the number of entries whose values were traced.
    fn trace_live(&self, tracer: &mut Tracer) -> usize;

    /// Drop entries whose keys were left unmarked by the last mark phase.
    /// Returns the number of entries removed.
    fn sweep_dead(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::heap::GcHeap;
    use crate::object::{GcHeader, GcObject, tags};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Leaf {
        header: GcHeader,
    }

    impl GcObject for Leaf {
        fn header(&self) -> &GcHeader {
            &self.header
        }
        fn trace(&self, _tracer: &mut Tracer) {}
    }

    struct TestTable {
        entries: Mutex<Vec<(Arc<Leaf>, Arc<Leaf>)>>,
    }

    impl EphemeronTable for TestTable {
        fn trace_live(&self, tracer: &mut Tracer) -> usize {
            let mut traced = 0;
            for (key, value) in self.entries.lock().iter() {
                if key.header.is_marked() {
                    tracer.mark(value.as_ref());
                    traced += 1;
                }
            }
            traced
        }

        fn sweep_dead(&self) -> usize {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|(key, _)| key.header.is_marked());
            before - entries.len()
        }
    }

    #[test]
    fn test_dead_key_sweeps_entry() {
        let live_key = Arc::new(Leaf {
            header: GcHeader::new(tags::OBJECT),
        });
        let dead_key = Arc::new(Leaf {
            header: GcHeader::new(tags::OBJECT),
        });
        let v1 = Arc::new(Leaf {
            header: GcHeader::new(tags::OBJECT),
        });
        let v2 = Arc::new(Leaf {
            header: GcHeader::new(tags::OBJECT),
        });

        let table = TestTable {
            entries: Mutex::new(vec![(live_key.clone(), v1.clone()), (dead_key, v2.clone())]),
        };

        let mut collector = Collector::new(GcHeap::new());
        // Only live_key is a root; dead_key's entry must be swept and v2
        // must stay unmarked.
        collector.collect(&[live_key.as_ref()], &[&table]);

        assert_eq!(table.entries.lock().len(), 1);
        assert!(v1.header.is_marked());
        assert!(!v2.header.is_marked());
        assert_eq!(collector.stats().last_swept_ephemerons, 1);
    }
}
