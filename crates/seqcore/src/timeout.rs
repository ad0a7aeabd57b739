//! Timeout wheel (§3 "Timeout", §4.6): a singly-linked list of callbacks
//! sorted by absolute expiry, advanced by wall-clock deltas from the
//! platform I/O driver.
//!
//! Expiry is a `u32` modulo counter. Ordering compares the *signed*
//! difference between two expiries rather than the raw values, so the
//! queue stays correctly ordered across the ~4300-second wrap period
//! (§4.6, §8 "Timeout monotonicity across wraps").

use crate::pool::{Pool, PoolIndex};

/// Opaque argument threaded through to a fired callback. A `u32` rather
/// than a trait object keeps `Timeout` `Copy` and out of the heap — callers
/// that need richer state stash an index of their own (e.g. a device
/// index) here.
pub type TimeoutArg = u32;

pub type Callback = fn(TimeoutArg);

#[derive(Clone, Copy)]
struct TimeoutNode {
    callback: Callback,
    arg: TimeoutArg,
    /// Absolute expiry, modulo 2^32.
    val: u32,
    set: bool,
    next: Option<PoolIndex>,
}

impl Default for TimeoutNode {
    fn default() -> Self {
        TimeoutNode {
            callback: |_| {},
            arg: 0,
            val: 0,
            set: false,
            next: None,
        }
    }
}

/// A handle to a scheduled timeout, returned by [`TimeoutWheel::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutId(PoolIndex);

/// Signed wrap-safe comparison: negative if `a` is earlier than `b`.
fn signed_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

pub struct TimeoutWheel {
    pool: Pool<TimeoutNode>,
    head: Option<PoolIndex>,
    abstime: u32,
}

impl TimeoutWheel {
    pub fn new(capacity: usize) -> Self {
        TimeoutWheel {
            pool: Pool::with_capacity(capacity),
            head: None,
            abstime: 0,
        }
    }

    pub fn abstime(&self) -> u32 {
        self.abstime
    }

    /// Sets the wheel's current absolute time without advancing it (test
    /// and wrap-boundary setup hook; production code drives `abstime`
    /// purely through [`update`](Self::update)).
    pub fn set_abstime(&mut self, abstime: u32) {
        self.abstime = abstime;
    }

    /// Schedules `callback(arg)` to fire `delta` ticks from now. `delta ==
    /// 0` is rejected (§4.6): a zero-delta timeout would race ordering
    /// against anything else already due at this exact instant.
    pub fn add(&mut self, callback: Callback, arg: TimeoutArg, delta: u32) -> TimeoutId {
        assert!(delta != 0, "timeout delta must be nonzero");
        let val = self.abstime.wrapping_add(delta);
        let node = TimeoutNode {
            callback,
            arg,
            val,
            set: true,
            next: None,
        };
        let idx = self.pool.acquire(node).expect("timeout pool exhausted");
        self.insert_sorted(idx);
        TimeoutId(idx)
    }

    fn insert_sorted(&mut self, idx: PoolIndex) {
        let val = self.pool.get(idx).val;
        let mut prev: Option<PoolIndex> = None;
        let mut cur = self.head;
        while let Some(cur_idx) = cur {
            let cur_val = self.pool.get(cur_idx).val;
            if signed_diff(cur_val, val) > 0 {
                break;
            }
            prev = cur;
            cur = self.pool.get(cur_idx).next;
        }
        self.pool.get_mut(idx).next = cur;
        match prev {
            Some(p) => self.pool.get_mut(p).next = Some(idx),
            None => self.head = Some(idx),
        }
    }

    /// Unlinks `id`. Removing an already-fired timeout is a no-op.
    pub fn del(&mut self, id: TimeoutId) {
        let idx = id.0;
        if self.pool.try_get(idx).is_none() {
            return; // already fired and its slot recycled
        }
        let mut prev: Option<PoolIndex> = None;
        let mut cur = self.head;
        while let Some(cur_idx) = cur {
            if cur_idx == idx {
                let next = self.pool.get(cur_idx).next;
                match prev {
                    Some(p) => self.pool.get_mut(p).next = next,
                    None => self.head = next,
                }
                self.pool.release(idx);
                return;
            }
            prev = cur;
            cur = self.pool.get(cur_idx).next;
        }
        // Already fired and released; nothing to do.
    }

    /// Advances `abstime` by `delta`, then pops and fires every timeout
    /// whose expiry is now due, in order. Callbacks may re-arm themselves
    /// via [`add`](Self::add) during the call.
    pub fn update(&mut self, delta: u32) {
        self.abstime = self.abstime.wrapping_add(delta);
        loop {
            let Some(idx) = self.head else { break };
            let val = self.pool.get(idx).val;
            if signed_diff(val, self.abstime) > 0 {
                break;
            }
            self.head = self.pool.get(idx).next;
            let node = *self.pool.get(idx);
            self.pool.release(idx);
            (node.callback)(node.arg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static FIRED: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
    }

    fn record(arg: TimeoutArg) {
        FIRED.with(|f| f.borrow_mut().push(arg));
    }

    fn drain_fired() -> Vec<u32> {
        FIRED.with(|f| f.borrow_mut().drain(..).collect())
    }

    #[test]
    fn fires_in_expiry_order() {
        drain_fired();
        let mut wheel = TimeoutWheel::new(4);
        wheel.add(record, 2, 20);
        wheel.add(record, 1, 10);
        wheel.update(25);
        assert_eq!(drain_fired(), vec![1, 2]);
    }

    #[test]
    fn del_before_fire_is_no_op_after() {
        drain_fired();
        let mut wheel = TimeoutWheel::new(4);
        let a = wheel.add(record, 1, 10);
        wheel.del(a);
        wheel.update(20);
        assert_eq!(drain_fired(), Vec::<u32>::new());
    }

    #[test]
    fn fires_in_order_across_wrap() {
        drain_fired();
        let mut wheel = TimeoutWheel::new(4);
        wheel.set_abstime(u32::MAX - 999);
        wheel.add(record, 1, 500);
        wheel.add(record, 2, 1500);
        wheel.update(2000);
        assert_eq!(drain_fired(), vec![1, 2]);
    }

    #[test]
    #[should_panic(expected = "nonzero")]
    fn zero_delta_is_forbidden() {
        let mut wheel = TimeoutWheel::new(4);
        wheel.add(record, 0, 0);
    }
}
