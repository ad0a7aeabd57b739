//! Statelist: the frame tracker (§3 "State", §4.4).
//!
//! A *state* is the live projection of one note, controller, or other
//! continuous parameter: its command, last values, current [`Phase`], and a
//! handful of bookkeeping flags. A [`Statelist`] is a singly-linked,
//! most-recently-used-first list of states, arena-backed like [`Track`] for
//! the same reasons (Design Note (b)).
//!
//! [`Track`]: crate::track::Track

use crate::event::{Command, Event, EventKey, Phase, PhaseSignature, info_of};
use crate::pool::{Pool, PoolIndex};
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u8 {
        /// Just allocated; not yet touched by a second update.
        const NEW    = 0b0001;
        /// Written during the current tick.
        const CHANGED = 0b0010;
        /// The frame was opened in mid-stream: a NEXT or LAST arrived with
        /// no matching FIRST.
        const BOGUS  = 0b0100;
        /// A new FIRST arrived while an identical frame was already open;
        /// this state is the re-entrant duplicate, stacked behind the head.
        const NESTED = 0b1000;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct State {
    pub key: EventKey,
    pub cmd: Command,
    pub dev: u8,
    pub chan: u8,
    pub v0: i32,
    pub v1: i32,
    pub phase: Phase,
    pub flags: StateFlags,
    /// Scratch field for higher layers (e.g. a track cursor tag).
    pub tag: i32,
    /// Scratch timestamp: the tick the frame first opened on.
    pub first_tick: u32,
    next: Option<PoolIndex>,
}

impl Default for State {
    fn default() -> Self {
        State {
            key: EventKey {
                cmd: Command::Null,
                dev: 0,
                chan: 0,
                discriminant: 0,
            },
            cmd: Command::Null,
            dev: 0,
            chan: 0,
            v0: 0,
            v1: 0,
            phase: Phase::empty(),
            flags: StateFlags::empty(),
            tag: 0,
            first_tick: 0,
            next: None,
        }
    }
}

impl State {
    fn signature(&self) -> PhaseSignature {
        info_of(self.cmd).phase_signature
    }

    fn is_terminated_or_bogus(&self) -> bool {
        self.phase == Phase::LAST || self.flags.contains(StateFlags::BOGUS)
    }

    fn apply(&mut self, ev: Event, phase: Phase) {
        self.key = ev.key();
        self.cmd = ev.cmd;
        self.dev = ev.dev;
        self.chan = ev.chan;
        self.v0 = ev.v0;
        self.v1 = ev.v1;
        self.phase = phase;
        self.flags.insert(StateFlags::CHANGED);
    }
}

/// A handle into a [`Statelist`], returned by [`Statelist::lookup`] and
/// [`Statelist::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateId(PoolIndex);

pub struct Statelist {
    pool: Pool<State>,
    head: Option<PoolIndex>,
    /// Set by every `update`; consulted (and cleared) by `outdate`.
    changed: bool,
}

impl Statelist {
    pub fn new(capacity: usize) -> Self {
        Statelist {
            pool: Pool::with_capacity(capacity),
            head: None,
            changed: false,
        }
    }

    pub fn get(&self, id: StateId) -> &State {
        self.pool.get(id.0)
    }

    pub fn iter(&self) -> StateIter<'_> {
        StateIter {
            list: self,
            cur: self.head,
        }
    }

    fn find_index(&self, key: EventKey) -> Option<PoolIndex> {
        let mut cur = self.head;
        while let Some(idx) = cur {
            let node = self.pool.get(idx);
            if node.key == key {
                return Some(idx);
            }
            cur = node.next;
        }
        None
    }

    /// Returns the first state whose event-key matches `ev`.
    pub fn lookup(&self, ev: &Event) -> Option<StateId> {
        self.find_index(ev.key()).map(StateId)
    }

    fn unlink(&mut self, idx: PoolIndex) {
        if self.head == Some(idx) {
            self.head = self.pool.get(idx).next;
            return;
        }
        let mut cur = self.head;
        while let Some(cur_idx) = cur {
            let next = self.pool.get(cur_idx).next;
            if next == Some(idx) {
                self.pool.get_mut(cur_idx).next = self.pool.get(idx).next;
                return;
            }
            cur = next;
        }
    }

    fn push_head(&mut self, idx: PoolIndex) {
        self.pool.get_mut(idx).next = self.head;
        self.head = Some(idx);
    }

    fn move_to_head(&mut self, idx: PoolIndex) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_head(idx);
        }
    }

    fn remove(&mut self, idx: PoolIndex) {
        self.unlink(idx);
        self.pool.release(idx);
    }

    fn allocate(&mut self, ev: Event, phase: Phase, flags: StateFlags) -> PoolIndex {
        let mut state = State {
            tag: 0,
            first_tick: 0,
            ..Default::default()
        };
        state.apply(ev, phase);
        state.flags.insert(flags);
        let idx = self.pool.acquire(state).expect("statelist pool exhausted");
        self.push_head(idx);
        idx
    }

    /// Classifies `ev`'s phase against any existing matching state and
    /// updates the list accordingly (§4.4's central algorithm).
    pub fn update(&mut self, ev: Event) -> StateId {
        let ev = ev.normalized();
        let phase = ev.phase();
        let key = ev.key();
        let matched = self.find_index(key);

        let touched = match (
            phase.contains(Phase::FIRST),
            phase.contains(Phase::NEXT),
            phase.contains(Phase::LAST),
        ) {
            (true, false, false) => self.update_first(ev, phase, matched),
            (false, true, false) => self.update_next_or_last(ev, phase, matched),
            (false, false, true) => self.update_next_or_last(ev, phase, matched),
            (true, false, true) => self.update_stateless(ev, phase, matched),
            // FIRST|NEXT — a continuously-live frame with no natural LAST —
            // has no producer in the current evinfo table: every Framed
            // command resolves to a bare FIRST, NEXT, or LAST, and every
            // Stateless command resolves to FIRST|LAST. Nothing reaches this
            // arm through the public `update` API today.
            _ => self.update_stateless(ev, phase, matched),
        };

        self.changed = true;
        StateId(touched)
    }

    fn update_first(&mut self, ev: Event, phase: Phase, matched: Option<PoolIndex>) -> PoolIndex {
        match matched {
            Some(idx) if !self.pool.get(idx).is_terminated_or_bogus() => {
                // A new FIRST arrives while an identical frame is still
                // open: the old state stays put, the new one is pushed at
                // head and marked NESTED.
                self.allocate(ev, phase, StateFlags::NEW | StateFlags::NESTED)
            }
            Some(idx) => {
                self.remove(idx);
                self.allocate(ev, phase, StateFlags::NEW)
            }
            None => self.allocate(ev, phase, StateFlags::NEW),
        }
    }

    fn update_next_or_last(
        &mut self,
        ev: Event,
        phase: Phase,
        matched: Option<PoolIndex>,
    ) -> PoolIndex {
        match matched {
            Some(idx) if !self.pool.get(idx).is_terminated_or_bogus() => {
                let node = self.pool.get_mut(idx);
                node.apply(ev, phase);
                node.flags.remove(StateFlags::NEW);
                self.move_to_head(idx);
                idx
            }
            Some(idx) => {
                self.remove(idx);
                let bogus_phase = phase | Phase::FIRST;
                self.allocate(ev, bogus_phase, StateFlags::NEW | StateFlags::BOGUS)
            }
            None => {
                let bogus_phase = phase | Phase::FIRST;
                self.allocate(ev, bogus_phase, StateFlags::NEW | StateFlags::BOGUS)
            }
        }
    }

    fn update_stateless(&mut self, ev: Event, phase: Phase, matched: Option<PoolIndex>) -> PoolIndex {
        match matched {
            Some(idx) => {
                let node = self.pool.get_mut(idx);
                node.apply(ev, phase);
                node.flags.remove(StateFlags::NEW);
                self.move_to_head(idx);
                idx
            }
            None => self.allocate(ev, phase, StateFlags::NEW),
        }
    }

    /// End-of-tick housekeeping: clears `CHANGED` on every state and drops
    /// frames whose phase is exactly `{LAST}`.
    pub fn outdate(&mut self) {
        if !self.changed {
            return;
        }
        self.changed = false;

        let mut cur = self.head;
        let mut to_drop = Vec::new();
        while let Some(idx) = cur {
            let node = self.pool.get_mut(idx);
            node.flags.remove(StateFlags::CHANGED);
            cur = node.next;
            if self.pool.get(idx).phase == Phase::LAST {
                to_drop.push(idx);
            }
        }
        for idx in to_drop {
            self.remove(idx);
        }
    }

    /// Emits the event that would undo `id`'s open frame, or `None` if the
    /// frame is already terminated or has no defined undo.
    pub fn cancel(&mut self, id: StateId) -> Option<Event> {
        let node = *self.pool.get(id.0);
        if node.phase == Phase::LAST {
            return None;
        }
        match node.cmd {
            Command::NoteOn | Command::NoteOff | Command::KeyAftertouch => {
                Some(Event::new(Command::NoteOff, node.dev, node.chan, node.v0, 0))
            }
            Command::ChannelAftertouch => Some(Event::new(
                Command::ChannelAftertouch,
                node.dev,
                node.chan,
                0,
                0,
            )),
            Command::Xctl => Some(Event::new(Command::Xctl, node.dev, node.chan, node.v0, 0)),
            Command::Bend => Some(Event::new(Command::Bend, node.dev, node.chan, 0, 0)),
            _ => None,
        }
    }

    /// Cancels and drops every live state belonging to `dev`, regardless of
    /// channel (§7 "device failure recovery": the normalizer broadcasts "all
    /// notes off" / "reset all controllers" for every open frame on a device
    /// that just failed).
    pub fn cancel_device(&mut self, dev: u8) -> Vec<Event> {
        let mut cur = self.head;
        let mut matching = Vec::new();
        while let Some(idx) = cur {
            let node = self.pool.get(idx);
            if node.dev == dev {
                matching.push(idx);
            }
            cur = node.next;
        }

        let mut events = Vec::with_capacity(matching.len());
        for idx in matching {
            if let Some(ev) = self.cancel(StateId(idx)) {
                events.push(ev);
            }
            self.remove(idx);
        }
        events
    }

    /// Emits one event re-establishing `id`'s last-known value, or `None`
    /// where restoring silently makes no sense (note frames, bogus frames,
    /// terminated frames).
    pub fn restore(&self, id: StateId) -> Option<Event> {
        let node = self.pool.get(id.0);
        if node.signature() == PhaseSignature::Framed {
            return None;
        }
        if node.flags.contains(StateFlags::BOGUS) {
            return None;
        }
        if node.phase == Phase::LAST {
            return None;
        }
        Some(Event::new(node.cmd, node.dev, node.chan, node.v0, node.v1))
    }

    /// Returns a new statelist containing a copy of every state in `self`,
    /// in the same most-recent-use order.
    pub fn dup(&self) -> Statelist {
        let mut dst = Statelist::new(self.pool.capacity());
        let entries: Vec<State> = self.iter().copied().collect();
        for state in entries.into_iter().rev() {
            let idx = dst.pool.acquire(state).expect("dup pool exhausted");
            dst.push_head(idx);
        }
        dst
    }
}

pub struct StateIter<'a> {
    list: &'a Statelist,
    cur: Option<PoolIndex>,
}

impl<'a> Iterator for StateIter<'a> {
    type Item = &'a State;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let node = self.list.pool.get(idx);
        self.cur = node.next;
        Some(node)
    }
}
