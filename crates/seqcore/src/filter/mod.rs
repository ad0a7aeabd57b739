//! Filter / normalizer (§2 "filt, norm, mixout"): per-channel rewrite rules
//! applied to events in flight, plus output priority mixing across devices.
//!
//! This module is the one part of SPEC_FULL.md with no direct counterpart
//! in the distilled spec's component list — it's named there only as a
//! line item ("Filter / normalizer") and a collaborator in the ingress
//! path ("each raw event goes through conv_pack ... before being handed to
//! the filter"). The concrete rule set below (channel remap, transposition,
//! velocity scaling, passthrough) and the output mixing table are the
//! supplemented feature filling that gap.

use crate::event::{Command, Event};

/// One rewrite rule, matched against an incoming event's channel and
/// applied in order. The first matching rule wins; `Passthrough` is the
/// typical terminal rule in a chain.
#[derive(Debug, Clone, Copy)]
pub enum Rule {
    /// Rewrites `from_chan` to `to_chan`, leaving everything else alone.
    RemapChannel { from_chan: u8, to_chan: u8 },
    /// Adds `semitones` to every note-on/note-off/key-aftertouch note
    /// number on `chan`, clamping to the valid MIDI note range.
    Transpose { chan: u8, semitones: i32 },
    /// Scales note-on velocity by `percent / 100`, clamping to 1..=127 (a
    /// scaled-to-zero velocity would silently become a note-off).
    VelocityScale { chan: u8, percent: u32 },
    /// Drops every event on `chan` entirely.
    Mute { chan: u8 },
    /// Matches everything; leaves the event untouched.
    Passthrough,
}

impl Rule {
    fn matches(&self, ev: &Event) -> bool {
        match self {
            Rule::RemapChannel { from_chan, .. } => ev.chan == *from_chan,
            Rule::Transpose { chan, .. } => ev.chan == *chan,
            Rule::VelocityScale { chan, .. } => ev.chan == *chan,
            Rule::Mute { chan } => ev.chan == *chan,
            Rule::Passthrough => true,
        }
    }

    /// Applies the rule, returning `None` if the event should be dropped.
    fn apply(&self, mut ev: Event) -> Option<Event> {
        match self {
            Rule::RemapChannel { to_chan, .. } => {
                ev.chan = *to_chan;
                Some(ev)
            }
            Rule::Transpose { semitones, .. } => {
                if matches!(ev.cmd, Command::NoteOn | Command::NoteOff | Command::KeyAftertouch) {
                    ev.v0 = (ev.v0 + semitones).clamp(0, 127);
                }
                Some(ev)
            }
            Rule::VelocityScale { percent, .. } => {
                if ev.cmd == Command::NoteOn {
                    let scaled = (ev.v1 * *percent as i32) / 100;
                    ev.v1 = scaled.clamp(1, 127);
                }
                Some(ev)
            }
            Rule::Mute { .. } => None,
            Rule::Passthrough => Some(ev),
        }
    }
}

/// An ordered sequence of rules, applied first-match-wins.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    rules: Vec<Rule>,
}

impl Chain {
    pub fn new(rules: Vec<Rule>) -> Self {
        Chain { rules }
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Runs `ev` through the chain, returning the rewritten event or `None`
    /// if a rule dropped it.
    pub fn run(&self, ev: Event) -> Option<Event> {
        for rule in &self.rules {
            if rule.matches(&ev) {
                return rule.apply(ev);
            }
        }
        Some(ev)
    }
}

/// Output priority mixing (*mixout*, §2): when more than one logical source
/// wants to drive the same device/channel this tick, the later-armed source
/// wins — a temporal rule, not a static ranking. `offer` doesn't take a
/// priority at all: the most recent call for a given device always displaces
/// whatever claimed it before.
#[derive(Debug, Default)]
pub struct Mixout {
    /// The event currently claiming device `dev` this tick, if any.
    claimed: std::collections::HashMap<u8, Event>,
}

impl Mixout {
    pub fn new() -> Self {
        Mixout::default()
    }

    /// Offers `ev` for its target device, unconditionally displacing
    /// whatever offer claimed that device earlier this tick.
    pub fn offer(&mut self, ev: Event) {
        self.claimed.insert(ev.dev, ev);
    }

    /// Drains the winning event for every device claimed this tick.
    pub fn drain(&mut self) -> Vec<Event> {
        self.claimed.drain().map(|(_, ev)| ev).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(chan: u8, note: i32, vel: i32) -> Event {
        Event::new(Command::NoteOn, 0, chan, note, vel)
    }

    #[test]
    fn transpose_shifts_note_number_and_clamps() {
        let chain = Chain::new(vec![Rule::Transpose { chan: 0, semitones: 12 }]);
        let out = chain.run(note_on(0, 120, 100)).unwrap();
        assert_eq!(out.v0, 127);
    }

    #[test]
    fn mute_drops_matching_channel() {
        let chain = Chain::new(vec![Rule::Mute { chan: 2 }]);
        assert!(chain.run(note_on(2, 60, 100)).is_none());
        assert!(chain.run(note_on(3, 60, 100)).is_some());
    }

    #[test]
    fn velocity_scale_never_produces_a_silent_note_on() {
        let chain = Chain::new(vec![Rule::VelocityScale { chan: 0, percent: 1 }]);
        let out = chain.run(note_on(0, 60, 100)).unwrap();
        assert_eq!(out.v1, 1);
    }

    #[test]
    fn first_matching_rule_wins() {
        let chain = Chain::new(vec![
            Rule::RemapChannel { from_chan: 0, to_chan: 5 },
            Rule::Mute { chan: 0 },
        ]);
        let out = chain.run(note_on(0, 60, 100)).unwrap();
        assert_eq!(out.chan, 5);
    }

    #[test]
    fn mixout_last_offer_wins() {
        let mut mix = Mixout::new();
        mix.offer(Event::new(Command::Ctl, 1, 0, 7, 10));
        mix.offer(Event::new(Command::Ctl, 1, 0, 7, 99));
        let winners = mix.drain();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].v1, 99);
    }

    #[test]
    fn mixout_keeps_one_slot_per_device() {
        let mut mix = Mixout::new();
        mix.offer(Event::new(Command::Ctl, 0, 0, 7, 1));
        mix.offer(Event::new(Command::Ctl, 1, 0, 7, 2));
        let mut winners = mix.drain();
        winners.sort_by_key(|ev| ev.dev);
        assert_eq!(winners.len(), 2);
    }
}
