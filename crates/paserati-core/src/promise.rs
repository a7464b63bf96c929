//! Promise values
//!
//! The VM-side promise: a state machine plus a reaction list. Settlement
//! is idempotent; resolving with another promise adopts its eventual
//! state. Ordering is the caller's concern — reactions here are plain
//! callbacks, and the runtime routes them through the microtask queue.

use parking_lot::Mutex;
use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};
use std::sync::Arc;

use crate::value::Value;

/// Promise state
#[derive(Debug, Clone)]
pub enum PromiseState {
    /// Not yet settled
    Pending,
    /// Settled with a value
    Fulfilled(Value),
    /// Settled with a rejection reason
    Rejected(Value),
}

/// A settlement observer: receives `Ok(value)` or `Err(reason)`
pub type Reaction = Box<dyn FnOnce(Result<Value, Value>) + Send>;

/// A promise value
pub struct JsPromise {
    header: GcHeader,
    state: Mutex<PromiseState>,
    reactions: Mutex<Vec<Reaction>>,
}

impl std::fmt::Debug for JsPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.state.lock() {
            PromiseState::Pending => write!(f, "Promise {{ <pending> }}"),
            PromiseState::Fulfilled(v) => write!(f, "Promise {{ <fulfilled>: {:?} }}", v),
            PromiseState::Rejected(v) => write!(f, "Promise {{ <rejected>: {:?} }}", v),
        }
    }
}

impl JsPromise {
    /// Create a pending promise
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::PROMISE),
            state: Mutex::new(PromiseState::Pending),
            reactions: Mutex::new(Vec::new()),
        })
    }

    /// Create an already fulfilled promise
    pub fn fulfilled(value: Value) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::PROMISE),
            state: Mutex::new(PromiseState::Fulfilled(value)),
            reactions: Mutex::new(Vec::new()),
        })
    }

    /// Create an already rejected promise
    pub fn rejected(reason: Value) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::PROMISE),
            state: Mutex::new(PromiseState::Rejected(reason)),
            reactions: Mutex::new(Vec::new()),
        })
    }

    /// Resolve with a value. Resolving with a promise adopts its state;
    /// settlement is idempotent.
    pub fn resolve(self: &Arc<Self>, value: Value) {
        if let Some(inner) = value.as_promise() {
            if Arc::ptr_eq(inner, self) {
                self.reject(Value::str("TypeError: chaining cycle detected"));
                return;
            }
            let outer = Arc::clone(self);
            inner.on_settled(Box::new(move |result| match result {
                Ok(v) => outer.fulfill_direct(v),
                Err(e) => outer.reject(e),
            }));
            return;
        }
        self.fulfill_direct(value);
    }

    fn fulfill_direct(&self, value: Value) {
        let mut state = self.state.lock();
        if !matches!(*state, PromiseState::Pending) {
            return;
        }
        *state = PromiseState::Fulfilled(value.clone());
        drop(state);

        let reactions = std::mem::take(&mut *self.reactions.lock());
        for reaction in reactions {
            reaction(Ok(value.clone()));
        }
    }

    /// Reject with a reason; idempotent
    pub fn reject(&self, reason: Value) {
        let mut state = self.state.lock();
        if !matches!(*state, PromiseState::Pending) {
            return;
        }
        *state = PromiseState::Rejected(reason.clone());
        drop(state);

        let reactions = std::mem::take(&mut *self.reactions.lock());
        for reaction in reactions {
            reaction(Err(reason.clone()));
        }
    }

    /// Attach a settlement observer. Already-settled promises invoke it
    /// immediately (the observer is expected to defer, e.g. by enqueuing
    /// a microtask).
    pub fn on_settled(&self, reaction: Reaction) {
        let state = self.state.lock().clone();
        match state {
            PromiseState::Pending => self.reactions.lock().push(reaction),
            PromiseState::Fulfilled(v) => reaction(Ok(v)),
            PromiseState::Rejected(e) => reaction(Err(e)),
        }
    }

    /// Current state
    pub fn state(&self) -> PromiseState {
        self.state.lock().clone()
    }

    /// Pending?
    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), PromiseState::Pending)
    }

    /// Fulfilled?
    pub fn is_fulfilled(&self) -> bool {
        matches!(*self.state.lock(), PromiseState::Fulfilled(_))
    }

    /// Rejected?
    pub fn is_rejected(&self) -> bool {
        matches!(*self.state.lock(), PromiseState::Rejected(_))
    }

    /// Fulfillment value, if fulfilled
    pub fn value(&self) -> Option<Value> {
        match &*self.state.lock() {
            PromiseState::Fulfilled(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Rejection reason, if rejected
    pub fn reason(&self) -> Option<Value> {
        match &*self.state.lock() {
            PromiseState::Rejected(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl GcObject for JsPromise {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, tracer: &mut Tracer) {
        match &*self.state.lock() {
            PromiseState::Fulfilled(v) | PromiseState::Rejected(v) => v.trace(tracer),
            PromiseState::Pending => {}
        }
        // Reactions are opaque closures; the values they capture are kept
        // alive by the job queue roots.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_resolve_runs_reactions() {
        let promise = JsPromise::new();
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        promise.on_settled(Box::new(move |result| {
            assert_eq!(result.unwrap().as_int32(), Some(42));
            flag.store(true, Ordering::Relaxed);
        }));

        promise.resolve(Value::int32(42));
        assert!(called.load(Ordering::Relaxed));
        assert!(promise.is_fulfilled());
    }

    #[test]
    fn test_settlement_idempotent() {
        let promise = JsPromise::new();
        promise.resolve(Value::int32(1));
        promise.reject(Value::str("late"));
        promise.resolve(Value::int32(2));

        assert_eq!(promise.value(), Some(Value::int32(1)));
    }

    #[test]
    fn test_resolve_adopts_promise_state() {
        let inner = JsPromise::new();
        let outer = JsPromise::new();
        outer.resolve(Value::promise(inner.clone()));

        assert!(outer.is_pending());
        inner.resolve(Value::int32(5));
        assert_eq!(outer.value(), Some(Value::int32(5)));
    }

    #[test]
    fn test_already_settled_invokes_immediately() {
        let promise = JsPromise::rejected(Value::str("boom"));
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        promise.on_settled(Box::new(move |result| {
            assert!(result.is_err());
            flag.store(true, Ordering::Relaxed);
        }));
        assert!(called.load(Ordering::Relaxed));
    }
}
