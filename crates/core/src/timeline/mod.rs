use std::{cell::Cell, cmp::Ordering, rc::Rc, time::Instant};

use serde::{Deserialize, Serialize};

use crate::Song;

/// Notes this far behind the playhead when listening begins are not replayed.
const LISTEN_SKIP_SECONDS: f64 = 0.1;

/// Monotonic wall-clock source, in milliseconds.
///
/// The engine derives song time from a stored reference reading instead of
/// summing frame deltas, so any monotonic source works.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven [`Clock`]. Clones share the same reading, so a test can keep
/// one handle and give another to the engine.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ms(&self, delta_ms: f64) {
        self.now.set(self.now.get() + delta_ms);
    }

    pub fn advance_secs(&self, delta_secs: f64) {
        self.advance_ms(delta_secs * 1000.0);
    }

    pub fn set_ms(&self, now_ms: f64) {
        self.now.set(now_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

/// Maps wall-clock readings onto song time.
///
/// `song_time = (now - start_ms) / 1000 * speed`. Pausing and re-anchoring
/// move `start_ms`; nothing is accumulated per frame.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    start_ms: f64,
    paused_at_ms: Option<f64>,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        self.start_ms = 0.0;
        self.paused_at_ms = None;
    }

    /// Song time zero is `now_ms`.
    pub fn start(&mut self, now_ms: f64) {
        self.start_ms = now_ms;
        self.paused_at_ms = None;
    }

    pub fn song_time(&self, now_ms: f64, speed: f64) -> f64 {
        (now_ms - self.start_ms) / 1000.0 * speed
    }

    pub fn pause(&mut self, now_ms: f64) {
        if self.paused_at_ms.is_none() {
            self.paused_at_ms = Some(now_ms);
        }
    }

    /// Shifts the anchor by the time spent paused.
    pub fn resume(&mut self, now_ms: f64) {
        if let Some(paused_at) = self.paused_at_ms.take() {
            self.start_ms += now_ms - paused_at;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at_ms.is_some()
    }

    /// Moves the anchor so that `song_time` is reported at `now_ms`, or at
    /// the pause moment while paused.
    pub fn anchor_to(&mut self, song_time: f64, now_ms: f64, speed: f64) {
        let reference = self.paused_at_ms.unwrap_or(now_ms);
        self.start_ms = reference - song_time / speed * 1000.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    NoteOn,
    NoteOff,
}

/// A note-on or note-off emitted by the listen-mode player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub time_seconds: f64,
    pub kind: EventKind,
    pub midi: u8,
    pub velocity: f32,
}

impl ScheduledEvent {
    pub fn new(time_seconds: f64, kind: EventKind, midi: u8, velocity: f32) -> Self {
        Self {
            time_seconds,
            kind,
            midi,
            velocity,
        }
    }
}

/// Plays a song back as input events, for listen/demo mode.
#[derive(Debug, Default)]
pub struct AutoPlayer {
    events: Vec<ScheduledEvent>,
    next_event: usize,
}

impl AutoPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the event list for `song`, skipping notes that started more
    /// than a moment before `from_time`.
    pub fn for_song(song: &Song, from_time: f64) -> Self {
        let mut events = Vec::with_capacity(song.len() * 2);
        for note in song.notes() {
            if note.start_time - from_time < -LISTEN_SKIP_SECONDS {
                continue;
            }
            events.push(ScheduledEvent::new(
                note.start_time,
                EventKind::NoteOn,
                note.midi,
                note.velocity,
            ));
            events.push(ScheduledEvent::new(
                note.end_time(),
                EventKind::NoteOff,
                note.midi,
                note.velocity,
            ));
        }

        let mut player = Self::new();
        player.set_events(events);
        player
    }

    pub fn set_events(&mut self, events: Vec<ScheduledEvent>) {
        self.events = events;
        // Releases go before attacks at the same instant so a repeated pitch retriggers.
        self.events.sort_by(|a, b| {
            a.time_seconds
                .partial_cmp(&b.time_seconds)
                .unwrap_or(Ordering::Equal)
                .then_with(|| match (a.kind, b.kind) {
                    (EventKind::NoteOff, EventKind::NoteOn) => Ordering::Less,
                    (EventKind::NoteOn, EventKind::NoteOff) => Ordering::Greater,
                    _ => Ordering::Equal,
                })
        });
        self.next_event = 0;
    }

    /// Returns every event due at or before `time_seconds` that has not been
    /// returned yet.
    pub fn poll(&mut self, time_seconds: f64) -> &[ScheduledEvent] {
        let first = self.next_event;
        while let Some(event) = self.events.get(self.next_event) {
            if event.time_seconds > time_seconds {
                break;
            }
            self.next_event += 1;
        }
        &self.events[first..self.next_event]
    }

    pub fn is_finished(&self) -> bool {
        self.next_event >= self.events.len()
    }

    pub fn remaining(&self) -> usize {
        self.events.len() - self.next_event
    }
}
