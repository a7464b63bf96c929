//! Microtask queue
//!
//! The FIFO of deferred callbacks drained between bytecode turns: at
//! top-level turn completion, at await resumption, and at event-loop
//! idle points. This wraps the VM's job queue so host callbacks and
//! promise reactions interleave in one order.

use std::sync::Arc;

use paserati_core::context::{JobQueue, VmJob};
use paserati_core::{Interpreter, Value, VmContext, VmResult};

/// Handle to the shared microtask FIFO
#[derive(Clone)]
pub struct MicrotaskQueue {
    jobs: Arc<JobQueue>,
}

impl MicrotaskQueue {
    /// Wrap a VM job queue
    pub fn new(jobs: Arc<JobQueue>) -> Self {
        Self { jobs }
    }

    /// Enqueue a host callback with VM access
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce(&Interpreter, &mut VmContext) -> VmResult<()> + Send + 'static,
    {
        self.jobs.enqueue(VmJob::Native(Box::new(task)));
    }

    /// Enqueue a script-function call (promise-reaction style)
    pub fn enqueue_call(&self, func: Value, this: Value, args: Vec<Value>) {
        self.jobs.enqueue(VmJob::Call {
            func,
            this,
            args,
            target: None,
        });
    }

    /// Anything queued?
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of queued microtasks
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Drain the queue in FIFO order. Tasks enqueued while draining run
    /// in the same cycle.
    pub fn drain(&self, interpreter: &Interpreter, ctx: &mut VmContext) -> VmResult<()> {
        interpreter.drain_jobs(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_same_cycle() {
        let mut ctx = VmContext::new();
        let interpreter = Interpreter::new();
        let queue = MicrotaskQueue::new(ctx.jobs().clone());

        // Tasks append to a global so the order is observable, and the
        // first task enqueues a third: it must run in the same drain.
        ctx.set_global("order", Value::str(""));
        let inner_queue = queue.clone();
        queue.enqueue(move |_, ctx| {
            let so_far = ctx.get_global("order").unwrap();
            ctx.set_global(
                "order",
                Value::str(&format!("{}a", so_far.as_string().unwrap().as_str())),
            );
            inner_queue.enqueue(|_, ctx| {
                let so_far = ctx.get_global("order").unwrap();
                ctx.set_global(
                    "order",
                    Value::str(&format!("{}c", so_far.as_string().unwrap().as_str())),
                );
                Ok(())
            });
            Ok(())
        });
        queue.enqueue(|_, ctx| {
            let so_far = ctx.get_global("order").unwrap();
            ctx.set_global(
                "order",
                Value::str(&format!("{}b", so_far.as_string().unwrap().as_str())),
            );
            Ok(())
        });

        queue.drain(&interpreter, &mut ctx).unwrap();
        let order = ctx.get_global("order").unwrap();
        assert_eq!(order.as_string().unwrap().as_str(), "abc");
        assert!(queue.is_empty());
    }
}
