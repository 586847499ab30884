//! Sliding window of on-screen notes and hit testing against it.
//!
//! The scheduler is the only writer of judgment flags. Everything else sees
//! the active set through [`NoteScheduler::active_notes`] as a read-only slice
//! or through copies handed back from [`NoteScheduler::try_hit`] and
//! [`NoteScheduler::mark_missed_before`].

use std::fmt;

use serde::Serialize;

use crate::{
    config::{MISS_WINDOW_SECONDS, RETIRE_AFTER_SECONDS},
    SongNote,
};

/// Absorbs float error when a press lands exactly on the window edge.
const WINDOW_EPSILON_MS: f64 = 1e-6;

/// Identifier of an activated note, unique within one [`NoteScheduler::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NoteId(pub u64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "note_{}", self.0)
    }
}

/// A song note inside the look-ahead window together with its judgment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveNote {
    pub id: NoteId,
    #[serde(flatten)]
    pub note: SongNote,
    /// Matched by the player inside the hit window.
    pub hit: bool,
    /// Finalised as a miss; this is what scoring counts.
    pub missed: bool,
    /// Visibly past the hit line while still unjudged.
    pub passed: bool,
}

impl ActiveNote {
    fn new(id: NoteId, note: SongNote) -> Self {
        Self {
            id,
            note,
            hit: false,
            missed: false,
            passed: false,
        }
    }

    pub fn midi(&self) -> u8 {
        self.note.midi
    }

    pub fn start_time(&self) -> f64 {
        self.note.start_time
    }

    /// Neither hit nor finalised as missed.
    pub fn is_unresolved(&self) -> bool {
        !self.hit && !self.missed
    }
}

/// Outcome of a successful [`NoteScheduler::try_hit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub note: ActiveNote,
    /// Absolute distance from the note's start, in milliseconds.
    pub delta_ms: f64,
    /// Signed distance; positive means the press came late.
    pub offset_ms: f64,
}

#[derive(Debug)]
pub struct NoteScheduler {
    song_notes: Vec<SongNote>,
    active: Vec<ActiveNote>,
    /// Next song note to activate.
    next_index: usize,
    fall_time: f64,
    next_id: u64,
}

impl Default for NoteScheduler {
    fn default() -> Self {
        Self {
            song_notes: Vec::new(),
            active: Vec::new(),
            next_index: 0,
            fall_time: 3.0,
            next_id: 0,
        }
    }
}

impl NoteScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the song. `notes` must already be sorted by start time.
    pub fn load(&mut self, notes: &[SongNote], fall_time: f64) {
        self.song_notes = notes.to_vec();
        self.fall_time = fall_time;
        self.reset();
    }

    /// Clears the active set and rewinds to the first note, keeping the song.
    pub fn reset(&mut self) {
        self.active.clear();
        self.next_index = 0;
        self.next_id = 0;
    }

    /// Changes the look-ahead for notes not yet activated.
    pub fn set_fall_time(&mut self, fall_time: f64) {
        self.fall_time = fall_time;
    }

    /// Advances the window to `current_time`.
    ///
    /// Activates every pending note starting within the look-ahead, flags
    /// unresolved notes more than the miss window behind as passed, then drops
    /// notes that ended long enough ago.
    pub fn update(&mut self, current_time: f64) {
        let activation_time = current_time + self.fall_time;
        while let Some(note) = self.song_notes.get(self.next_index) {
            if note.start_time > activation_time {
                break;
            }
            self.next_id += 1;
            self.active.push(ActiveNote::new(NoteId(self.next_id), *note));
            self.next_index += 1;
        }

        for note in &mut self.active {
            if note.is_unresolved() && current_time > note.note.start_time + MISS_WINDOW_SECONDS {
                note.passed = true;
            }
        }

        self.active
            .retain(|note| current_time - note.note.end_time() < RETIRE_AFTER_SECONDS);
    }

    pub fn active_notes(&self) -> &[ActiveNote] {
        &self.active
    }

    /// Marks the unresolved `midi` note closest to `current_time` as hit, if
    /// one lies within `window_ms`. A miss here is routine and changes nothing.
    pub fn try_hit(&mut self, midi: u8, current_time: f64, window_ms: f64) -> Option<HitResult> {
        let mut best: Option<(usize, f64)> = None;

        for (index, note) in self.active.iter().enumerate() {
            if note.note.midi != midi || !note.is_unresolved() {
                continue;
            }
            let delta_ms = (current_time - note.note.start_time).abs() * 1000.0;
            if delta_ms > window_ms + WINDOW_EPSILON_MS {
                continue;
            }
            if best.map_or(true, |(_, best_delta)| delta_ms < best_delta) {
                best = Some((index, delta_ms));
            }
        }

        let (index, delta_ms) = best?;
        let note = &mut self.active[index];
        note.hit = true;
        Some(HitResult {
            note: *note,
            delta_ms,
            offset_ms: (current_time - note.note.start_time) * 1000.0,
        })
    }

    /// First unresolved note in activation order.
    pub fn next_expected_note(&self) -> Option<&ActiveNote> {
        self.active.iter().find(|note| note.is_unresolved())
    }

    /// Finalises as missed every unresolved note whose miss window closed
    /// before `time` and returns them, so each is scored exactly once.
    pub fn mark_missed_before(&mut self, time: f64) -> Vec<ActiveNote> {
        let mut missed = Vec::new();
        for note in &mut self.active {
            if note.is_unresolved() && note.note.start_time + MISS_WINDOW_SECONDS < time {
                note.missed = true;
                missed.push(*note);
            }
        }
        missed
    }

    /// Every song note has been activated and every active note is hit,
    /// missed or passed.
    pub fn is_complete(&self) -> bool {
        self.next_index >= self.song_notes.len()
            && self
                .active
                .iter()
                .all(|note| note.hit || note.missed || note.passed)
    }
}
