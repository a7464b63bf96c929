//! Event loop
//!
//! Host-initiated wakeups (timers) feeding the VM between microtask
//! drains. Single-threaded and cooperative: callbacks run on the VM
//! thread when the loop decides, never concurrently with bytecode.

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use paserati_core::{Interpreter, VmContext, VmResult};

/// Identifies a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// A timer callback with VM access
pub type TimerCallback = Box<dyn FnOnce(&Interpreter, &mut VmContext) -> VmResult<()> + Send>;

struct Timer {
    deadline: Instant,
    id: TimerId,
    callback: TimerCallback,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.id.0).cmp(&(other.deadline, other.id.0))
    }
}

/// Timer storage and the blocking wait primitive
pub struct EventLoop {
    timers: Mutex<BinaryHeap<Reverse<Timer>>>,
    cancelled: Mutex<Vec<TimerId>>,
    next_id: Mutex<u64>,
    /// Single-threaded reactor used only to park until the next deadline
    sleeper: tokio::runtime::Runtime,
}

impl EventLoop {
    /// Create an event loop
    pub fn new() -> Self {
        let sleeper = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("tokio time driver");
        Self {
            timers: Mutex::new(BinaryHeap::new()),
            cancelled: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            sleeper,
        }
    }

    /// Schedule a callback after `delay`
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce(&Interpreter, &mut VmContext) -> VmResult<()> + Send + 'static,
    {
        let id = {
            let mut next = self.next_id.lock();
            let id = TimerId(*next);
            *next += 1;
            id
        };
        self.timers.lock().push(Reverse(Timer {
            deadline: Instant::now() + delay,
            id,
            callback: Box::new(callback),
        }));
        id
    }

    /// Cancel a pending timer. Cancellation is cooperative: an already
    /// fired callback is unaffected.
    pub fn clear_timeout(&self, id: TimerId) {
        self.cancelled.lock().push(id);
    }

    /// Any timers still scheduled?
    pub fn has_pending(&self) -> bool {
        !self.timers.lock().is_empty()
    }

    /// Deadline of the next live timer
    pub fn next_deadline(&self) -> Option<Instant> {
        let timers = self.timers.lock();
        let cancelled = self.cancelled.lock();
        timers
            .iter()
            .filter(|Reverse(t)| !cancelled.contains(&t.id))
            .map(|Reverse(t)| t.deadline)
            .min()
    }

    /// Take every timer due at `now`, in deadline order
    pub fn take_due(&self, now: Instant) -> Vec<TimerCallback> {
        let mut timers = self.timers.lock();
        let mut cancelled = self.cancelled.lock();
        let mut due = Vec::new();
        while let Some(Reverse(timer)) = timers.peek() {
            if timer.deadline > now {
                break;
            }
            let Reverse(timer) = timers.pop().expect("peeked timer");
            if let Some(pos) = cancelled.iter().position(|id| *id == timer.id) {
                cancelled.swap_remove(pos);
                continue;
            }
            due.push(timer.callback);
        }
        due
    }

    /// Park the thread until `deadline`
    pub fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline <= now {
            return;
        }
        let duration = deadline - now;
        self.sleeper
            .block_on(async move { tokio::time::sleep(duration).await });
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_timer_ordering() {
        let event_loop = EventLoop::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = fired.clone();
        event_loop.set_timeout(Duration::from_millis(5), move |_, _| {
            f1.store(1, Ordering::SeqCst);
            Ok(())
        });
        let f2 = fired.clone();
        event_loop.set_timeout(Duration::from_millis(1), move |_, _| {
            f2.store(2, Ordering::SeqCst);
            Ok(())
        });

        assert!(event_loop.has_pending());
        let deadline = event_loop.next_deadline().unwrap();
        event_loop.sleep_until(deadline + Duration::from_millis(1));

        let mut ctx = VmContext::new();
        let interpreter = Interpreter::new();
        // Only the 1ms timer is due
        for callback in event_loop.take_due(Instant::now()) {
            callback(&interpreter, &mut ctx).unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(event_loop.has_pending());
    }

    #[test]
    fn test_clear_timeout() {
        let event_loop = EventLoop::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = event_loop.set_timeout(Duration::from_millis(1), move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        event_loop.clear_timeout(id);

        std::thread::sleep(Duration::from_millis(3));
        let due = event_loop.take_due(Instant::now());
        assert!(due.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
