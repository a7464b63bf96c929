//! Proxy values
//!
//! A proxy holds a target and a handler table. Fundamental operations
//! check the handler for the corresponding trap first; absent traps
//! forward to the target. Trap invocation is an ordinary VM call done by
//! the interpreter, so traps can throw and reenter.

use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::object::PropertyKey;
use crate::value::Value;

/// A proxy value
pub struct JsProxy {
    header: GcHeader,
    /// The proxied target
    pub(crate) target: Value,
    /// The handler holding traps
    pub(crate) handler: Value,
    /// Whether this proxy has been revoked
    revoked: AtomicBool,
}

impl std::fmt::Debug for JsProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_revoked() {
            write!(f, "Proxy {{ <revoked> }}")
        } else {
            write!(f, "Proxy {{ target: {:?} }}", self.target)
        }
    }
}

impl JsProxy {
    /// Create a new proxy
    pub fn new(target: Value, handler: Value) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::PROXY),
            target,
            handler,
            revoked: AtomicBool::new(false),
        })
    }

    /// The target, unless revoked
    pub fn target(&self) -> Option<Value> {
        if self.is_revoked() {
            None
        } else {
            Some(self.target.clone())
        }
    }

    /// The raw target without revocation checks
    pub fn target_raw(&self) -> &Value {
        &self.target
    }

    /// The handler, unless revoked
    pub fn handler(&self) -> Option<Value> {
        if self.is_revoked() {
            None
        } else {
            Some(self.handler.clone())
        }
    }

    /// Revoked?
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Revoke: all subsequent trap operations throw TypeError
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    /// Fetch a trap from the handler.
    ///
    /// Returns `None` when the proxy is revoked, the handler lacks the
    /// trap, or the trap is null/undefined (which means "forward").
    pub fn get_trap(&self, trap_name: &str) -> Option<Value> {
        if self.is_revoked() {
            return None;
        }
        let handler = self.handler.as_object()?;
        let trap = handler.get(&PropertyKey::string(trap_name))?;
        if trap.is_nullish() {
            return None;
        }
        Some(trap)
    }

    /// Does the handler define this trap?
    pub fn has_trap(&self, trap_name: &str) -> bool {
        self.get_trap(trap_name).is_some()
    }
}

impl GcObject for JsProxy {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, tracer: &mut Tracer) {
        self.target.trace(tracer);
        self.handler.trace(tracer);
    }
}
