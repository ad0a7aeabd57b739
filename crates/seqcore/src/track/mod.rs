//! Track + seqev list (§3 "Track", §4.3): a doubly-linked, delta-timed event
//! list terminated by an end-of-track sentinel, realized as an
//! index-addressed [`Pool`] arena (Design Note (b)) rather than the
//! original's `struct Node **`-style intrusive pointers.
//!
//! Invariants maintained by every operation below:
//! - The sentinel (`sentinel_delta`) is always present and always last.
//! - `first` is the head; it is `None` (meaning "the sentinel") for an
//!   empty track.
//! - `sum(seqev deltas) + sentinel_delta == numtic()`.

use crate::event::Event;
use crate::pool::{Pool, PoolIndex};

#[derive(Debug, Clone, Copy)]
struct Seqev {
    delta: u32,
    event: Event,
    next: Option<PoolIndex>,
    prev: Option<PoolIndex>,
}

impl Default for Seqev {
    fn default() -> Self {
        Seqev {
            delta: 0,
            event: Event::new(crate::event::Command::Null, 0, 0, 0, 0),
            next: None,
            prev: None,
        }
    }
}

/// A position in a [`Track`]: either a real event (`Some`) or the sentinel
/// one-past-the-end (`None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(Option<PoolIndex>);

impl Cursor {
    pub fn end() -> Self {
        Cursor(None)
    }

    pub fn is_end(self) -> bool {
        self.0.is_none()
    }
}

pub struct Track {
    pool: Pool<Seqev>,
    first: Option<PoolIndex>,
    last: Option<PoolIndex>,
    /// The end-of-track sentinel's delta: trailing silence after the last
    /// real event. Inline, never pool-allocated.
    sentinel_delta: u32,
    count: usize,
}

impl Track {
    /// Creates an empty track backed by a pool sized for `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Track {
            pool: Pool::with_capacity(capacity),
            first: None,
            last: None,
            sentinel_delta: 0,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The track's total tick length: the sum of every seqev's delta plus
    /// the sentinel's trailing-silence delta.
    pub fn numtic(&self) -> u32 {
        let mut total: u32 = self.sentinel_delta;
        let mut cur = self.first;
        while let Some(idx) = cur {
            let node = self.pool.get(idx);
            total += node.delta;
            cur = node.next;
        }
        total
    }

    pub fn begin(&self) -> Cursor {
        Cursor(self.first)
    }

    pub fn end(&self) -> Cursor {
        Cursor(None)
    }

    pub fn next_cursor(&self, cur: Cursor) -> Cursor {
        match cur.0 {
            Some(idx) => Cursor(self.pool.get(idx).next),
            None => Cursor(None),
        }
    }

    /// Returns `(delta, event)` at `cur`, or `None` if `cur` is the sentinel.
    pub fn get(&self, cur: Cursor) -> Option<(u32, Event)> {
        cur.0.map(|idx| {
            let node = self.pool.get(idx);
            (node.delta, node.event)
        })
    }

    /// Inserts `event` immediately before `at`.
    ///
    /// Per §4.3: the new event inherits `at`'s current delta, and `at`'s
    /// delta is zeroed — the new event and `at` become simultaneous, and
    /// the track's total length is unchanged.
    pub fn insert_before(&mut self, at: Cursor, event: Event) -> Cursor {
        let inherited_delta = match at.0 {
            Some(idx) => {
                let node = self.pool.get_mut(idx);
                std::mem::replace(&mut node.delta, 0)
            }
            None => std::mem::replace(&mut self.sentinel_delta, 0),
        };

        let prev = match at.0 {
            Some(idx) => self.pool.get(idx).prev,
            None => self.last,
        };

        let new_idx = self
            .pool
            .acquire(Seqev {
                delta: inherited_delta,
                event,
                next: at.0,
                prev,
            })
            .expect("track pool exhausted");

        match prev {
            Some(p) => self.pool.get_mut(p).next = Some(new_idx),
            None => self.first = Some(new_idx),
        }
        match at.0 {
            Some(idx) => self.pool.get_mut(idx).prev = Some(new_idx),
            None => self.last = Some(new_idx),
        }
        self.count += 1;
        Cursor(Some(new_idx))
    }

    pub fn push_back(&mut self, delta: u32, event: Event) -> Cursor {
        let cur = self.insert_before(Cursor(None), event);
        // insert_before always zeroes the *target*'s delta and gives the new
        // node the old sentinel delta; overwrite with the caller's intended
        // gap since there is no "next" node whose delta needs preserving.
        let idx = cur.0.unwrap();
        self.pool.get_mut(idx).delta = delta;
        cur
    }

    /// Removes the event at `at`. Its delta is folded into the following
    /// event's delta (or the sentinel's, if it was the last real event).
    pub fn remove(&mut self, at: Cursor) {
        let Some(idx) = at.0 else {
            return; // removing the sentinel is a no-op
        };
        let node = *self.pool.get(idx);
        match node.next {
            Some(next_idx) => self.pool.get_mut(next_idx).delta += node.delta,
            None => self.sentinel_delta += node.delta,
        }
        match node.prev {
            Some(prev_idx) => self.pool.get_mut(prev_idx).next = node.next,
            None => self.first = node.next,
        }
        match node.next {
            Some(next_idx) => self.pool.get_mut(next_idx).prev = node.prev,
            None => self.last = node.prev,
        }
        self.pool.release(idx);
        self.count -= 1;
    }

    /// Discards trailing silence: zeroes the sentinel's delta.
    pub fn chomp(&mut self) {
        self.sentinel_delta = 0;
    }

    /// Shifts the track's origin forward by `amount` ticks.
    pub fn shift(&mut self, amount: u32) {
        match self.first {
            Some(idx) => self.pool.get_mut(idx).delta += amount,
            None => self.sentinel_delta += amount,
        }
    }

    pub fn clear(&mut self) {
        while let Some(idx) = self.first {
            let next = self.pool.get(idx).next;
            self.pool.release(idx);
            self.first = next;
        }
        self.last = None;
        self.sentinel_delta = 0;
        self.count = 0;
    }

    /// Exchanges the entire contents of `self` and `other`.
    ///
    /// The original's pointer-based list stores each sentinel as `prev:
    /// struct Node **` into the owning track header, so a raw swap of list
    /// bodies needs a follow-up pass fixing those back-pointers. This
    /// arena's sentinel is just an inline `u32`, owned by value, so swapping
    /// the whole `Track` (pool included) already leaves both tracks
    /// internally consistent with no fixup needed.
    pub fn swap(&mut self, other: &mut Track) {
        std::mem::swap(self, other);
    }

    pub fn iter(&self) -> TrackIter<'_> {
        TrackIter {
            track: self,
            cur: self.first,
        }
    }

    /// Merges `other` into `self`, interleaving both by absolute tick. On
    /// ties, `self`'s event sorts first.
    pub fn merge(&mut self, other: Track) {
        let capacity = self.pool.capacity() + other.pool.capacity();
        let a = self.absolute_events();
        let a_trailing = self.sentinel_delta;
        let b_trailing = other.sentinel_delta;
        let b = other.absolute_events();

        let mut merged = Vec::with_capacity(a.len() + b.len());
        let (mut ai, mut bi) = (0, 0);
        while ai < a.len() && bi < b.len() {
            if a[ai].0 <= b[bi].0 {
                merged.push(a[ai]);
                ai += 1;
            } else {
                merged.push(b[bi]);
                bi += 1;
            }
        }
        merged.extend_from_slice(&a[ai..]);
        merged.extend_from_slice(&b[bi..]);

        let end_of_a = a.last().map(|(t, _)| *t).unwrap_or(0) + a_trailing;
        let end_of_b = b.last().map(|(t, _)| *t).unwrap_or(0) + b_trailing;
        let trailing = end_of_a.max(end_of_b) - merged.last().map(|(t, _)| *t).unwrap_or(0);

        self.rebuild(capacity, merged, trailing);
    }

    /// Extracts the slice `[at_tick, at_tick + length)` into a new track,
    /// closing the gap left behind (later events shift back by `length`).
    pub fn cut(&mut self, at_tick: u32, length: u32) -> Track {
        let trailing = self.sentinel_delta;
        let events = self.absolute_events();
        let cut_end = at_tick + length;

        let mut kept = Vec::new();
        let mut extracted = Vec::new();
        for (tick, event) in events {
            if tick >= at_tick && tick < cut_end {
                extracted.push((tick - at_tick, event));
            } else if tick >= cut_end {
                kept.push((tick - length, event));
            } else {
                kept.push((tick, event));
            }
        }

        let capacity = self.pool.capacity();
        self.rebuild(capacity, kept, trailing);

        let mut cut_track = Track::new(extracted.len().max(1));
        cut_track.rebuild(extracted.len().max(1), extracted, 0);
        cut_track
    }

    /// Inserts `other` at `at_tick`, shifting everything at or after that
    /// point forward by `other.numtic()`.
    pub fn paste(&mut self, at_tick: u32, other: Track) {
        let trailing = self.sentinel_delta;
        let pushed = other.numtic();
        let inserted = other.absolute_events();
        let events = self.absolute_events();

        let mut merged = Vec::with_capacity(events.len() + inserted.len());
        for (tick, event) in &events {
            if *tick < at_tick {
                merged.push((*tick, *event));
            }
        }
        for (tick, event) in inserted {
            merged.push((at_tick + tick, event));
        }
        for (tick, event) in &events {
            if *tick >= at_tick {
                merged.push((*tick + pushed, *event));
            }
        }

        let capacity = self.pool.capacity() + other.pool.capacity();
        self.rebuild(capacity, merged, trailing);
    }

    fn absolute_events(&self) -> Vec<(u32, Event)> {
        let mut out = Vec::with_capacity(self.count);
        let mut abs = 0u32;
        let mut cur = self.first;
        while let Some(idx) = cur {
            let node = self.pool.get(idx);
            abs += node.delta;
            out.push((abs, node.event));
            cur = node.next;
        }
        out
    }

    fn rebuild(&mut self, capacity: usize, events: Vec<(u32, Event)>, trailing: u32) {
        self.pool = Pool::with_capacity(capacity.max(events.len()).max(1));
        self.first = None;
        self.last = None;
        self.count = 0;
        self.sentinel_delta = 0;
        let mut prev_tick = 0u32;
        for (tick, event) in events {
            let delta = tick - prev_tick;
            prev_tick = tick;
            self.push_back(delta, event);
        }
        self.sentinel_delta = trailing;
    }
}

pub struct TrackIter<'a> {
    track: &'a Track,
    cur: Option<PoolIndex>,
}

impl Iterator for TrackIter<'_> {
    type Item = (u32, Event);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let node = self.track.pool.get(idx);
        self.cur = node.next;
        Some((node.delta, node.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Command;

    fn ev(v0: i32) -> Event {
        Event::new(Command::NoteOn, 0, 0, v0, 100)
    }

    #[test]
    fn empty_track_first_is_sentinel() {
        let t = Track::new(4);
        assert!(t.begin().is_end());
        assert_eq!(t.numtic(), 0);
    }

    #[test]
    fn push_back_accumulates_numtic() {
        let mut t = Track::new(4);
        t.push_back(10, ev(60));
        t.push_back(5, ev(62));
        assert_eq!(t.numtic(), 15);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn remove_folds_delta_into_next() {
        let mut t = Track::new(4);
        t.push_back(10, ev(60));
        let middle = t.push_back(5, ev(62));
        t.push_back(7, ev(64));
        let before = t.numtic();
        t.remove(middle);
        assert_eq!(t.numtic(), before, "removing must preserve total length");
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn insert_before_preserves_total_length() {
        let mut t = Track::new(4);
        t.push_back(10, ev(60));
        let target = t.push_back(5, ev(62));
        let before = t.numtic();
        t.insert_before(target, ev(61));
        assert_eq!(t.numtic(), before);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn chomp_zeroes_trailing_silence() {
        let mut t = Track::new(4);
        t.push_back(10, ev(60));
        t.sentinel_delta = 50;
        t.chomp();
        assert_eq!(t.numtic(), 10);
    }

    #[test]
    fn shift_moves_origin_forward() {
        let mut t = Track::new(4);
        t.push_back(10, ev(60));
        t.shift(3);
        assert_eq!(t.numtic(), 13);
        let (delta, _) = t.get(t.begin()).unwrap();
        assert_eq!(delta, 13);
    }

    #[test]
    fn swap_twice_is_identity() {
        let mut a = Track::new(4);
        a.push_back(1, ev(1));
        let mut b = Track::new(4);
        b.push_back(2, ev(2));
        b.push_back(3, ev(3));

        let a_events: Vec<_> = a.iter().collect();
        let b_events: Vec<_> = b.iter().collect();

        a.swap(&mut b);
        a.swap(&mut b);

        assert_eq!(a.iter().collect::<Vec<_>>(), a_events);
        assert_eq!(b.iter().collect::<Vec<_>>(), b_events);
    }

    #[test]
    fn merge_interleaves_by_absolute_tick() {
        let mut a = Track::new(4);
        a.push_back(10, ev(1)); // at 10
        a.push_back(10, ev(2)); // at 20
        let mut b = Track::new(4);
        b.push_back(5, ev(9)); // at 5
        b.push_back(10, ev(8)); // at 15

        a.merge(b);
        let ticks: Vec<u32> = {
            let mut abs = 0;
            a.iter()
                .map(|(d, _)| {
                    abs += d;
                    abs
                })
                .collect()
        };
        assert_eq!(ticks, vec![5, 10, 15, 20]);
    }

    #[test]
    fn cut_then_paste_round_trips() {
        let mut t = Track::new(8);
        t.push_back(10, ev(1)); // 10
        t.push_back(10, ev(2)); // 20
        t.push_back(10, ev(3)); // 30
        let total_before = t.numtic();

        let cut = t.cut(15, 10); // extracts the event at 20
        assert_eq!(cut.len(), 1);
        assert_eq!(t.numtic(), total_before - 10);

        t.paste(15, cut);
        assert_eq!(t.numtic(), total_before);
        assert_eq!(t.len(), 3);
    }
}
