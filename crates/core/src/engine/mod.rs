//! Session state machine that turns wall-clock time into judged song time.
//!
//! The host owns the real event loop and calls back into the engine through
//! two entry points: [`GameEngine::on_frame`] once per video frame and
//! [`GameEngine::on_countdown_interval`] once per second during the countdown.
//! The engine records which of those callbacks it is currently waiting for and
//! ignores any that arrive after the request was cancelled, so a frame that
//! was already queued when [`GameEngine::pause`] ran cannot tick a paused
//! session.

use std::fmt;

use serde::Serialize;

use crate::{
    config::{
        GameConfig, GameConfigPatch, GameMode, COUNTDOWN_SECONDS, MISS_WINDOW_SECONDS,
        PRACTICE_WAIT_SECONDS,
    },
    timeline::{Clock, PlaybackClock, SystemClock},
    ActiveNote, HitTier, NoteScheduler, Result, ScoreData, ScoreTracker, Song,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Idle,
    Countdown,
    Playing,
    Paused,
    Completed,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Countdown => "countdown",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Everything a renderer or UI needs for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub state: GameState,
    /// Song time in seconds.
    pub current_time: f64,
    pub active_notes: Vec<ActiveNote>,
    pub score: ScoreData,
    /// Countdown steps remaining.
    pub countdown: u32,
}

/// Receives a [`Snapshot`] after every state-affecting step.
pub type SnapshotListener = Box<dyn FnMut(&Snapshot)>;

pub struct GameEngine<C: Clock = SystemClock> {
    clock: C,
    config: GameConfig,
    scheduler: NoteScheduler,
    tracker: ScoreTracker,
    state: GameState,
    song: Option<Song>,
    current_time: f64,
    playback: PlaybackClock,
    countdown: u32,
    /// A frame callback has been requested and not cancelled.
    frame_pending: bool,
    /// The countdown interval is running.
    countdown_pending: bool,
    practice_waiting: bool,
    listener: Option<SnapshotListener>,
}

impl GameEngine<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for GameEngine<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> GameEngine<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            config: GameConfig::default(),
            scheduler: NoteScheduler::new(),
            tracker: ScoreTracker::new(0),
            state: GameState::Idle,
            song: None,
            current_time: 0.0,
            playback: PlaybackClock::default(),
            countdown: 0,
            frame_pending: false,
            countdown_pending: false,
            practice_waiting: false,
            listener: None,
        }
    }

    /// Registers the snapshot listener, replacing any previous one.
    pub fn set_listener(&mut self, listener: impl FnMut(&Snapshot) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Applies a partial configuration update. Invalid updates are rejected
    /// as a whole and leave the current configuration in place.
    ///
    /// A speed change keeps the song time reported right now and only alters
    /// how fast it advances from here on.
    pub fn set_config(&mut self, patch: GameConfigPatch) -> Result<()> {
        let mut next = self.config;
        next.apply(patch);
        next.validate()?;

        if next.speed != self.config.speed
            && matches!(self.state, GameState::Playing | GameState::Paused)
        {
            self.playback
                .anchor_to(self.current_time, self.clock.now_ms(), next.speed);
        }
        if self.practice_waiting && next.mode != GameMode::Practice {
            // Only practice holds the timeline; continue from the held position.
            self.practice_waiting = false;
            self.playback
                .anchor_to(self.current_time, self.clock.now_ms(), next.speed);
            tracing::debug!(at = self.current_time, "practice wait dropped by mode change");
        }
        self.scheduler.set_fall_time(next.scheduler_fall_time());
        tracing::debug!(?next, "config updated");
        self.config = next;
        Ok(())
    }

    pub fn config(&self) -> GameConfig {
        self.config
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn score(&self) -> ScoreData {
        self.tracker.score()
    }

    pub fn active_notes(&self) -> &[ActiveNote] {
        self.scheduler.active_notes()
    }

    pub fn song(&self) -> Option<&Song> {
        self.song.as_ref()
    }

    pub fn is_practice_waiting(&self) -> bool {
        self.practice_waiting
    }

    /// Pitch the player should press next, shown as a hint in practice mode.
    pub fn next_expected_midi(&self) -> Option<u8> {
        self.scheduler.next_expected_note().map(ActiveNote::midi)
    }

    /// The host should call [`Self::on_frame`] on its next video frame.
    pub fn wants_frame(&self) -> bool {
        self.frame_pending
    }

    /// The host should call [`Self::on_countdown_interval`] once a second.
    pub fn countdown_pending(&self) -> bool {
        self.countdown_pending
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            current_time: self.current_time,
            active_notes: self.scheduler.active_notes().to_vec(),
            score: self.tracker.score(),
            countdown: self.countdown,
        }
    }

    /// Replaces the song and resets judgment and scoring. Leaves the engine idle.
    pub fn load_song(&mut self, song: Song) {
        self.cancel_callbacks();
        self.state = GameState::Idle;
        self.current_time = 0.0;
        self.practice_waiting = false;
        self.playback.reset();
        self.tracker.reset(note_count(&song));
        self.scheduler
            .load(song.notes(), self.config.scheduler_fall_time());
        tracing::debug!(song = %song.id, notes = song.len(), "song loaded");
        self.song = Some(song);
        self.emit();
    }

    /// Begins the countdown for a fresh playthrough of the loaded song.
    ///
    /// Ignored without a song, in freeplay, or while a playthrough is
    /// already counting down, playing or paused.
    pub fn start(&mut self) {
        if self.song.is_none() || self.config.mode == GameMode::Freeplay {
            tracing::trace!(state = %self.state, "start ignored");
            return;
        }
        if !matches!(self.state, GameState::Idle | GameState::Completed) {
            tracing::trace!(state = %self.state, "start ignored");
            return;
        }

        self.rewind();
        self.state = GameState::Countdown;
        self.countdown = COUNTDOWN_SECONDS;
        self.countdown_pending = true;
        tracing::debug!(countdown = self.countdown, "countdown started");
        self.emit();
    }

    /// Countdown timer callback.
    pub fn on_countdown_interval(&mut self) {
        if !self.countdown_pending || self.state != GameState::Countdown {
            return;
        }

        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown == 0 {
            self.countdown_pending = false;
            self.begin_playing();
        } else {
            self.emit();
        }
    }

    /// Animation-frame callback.
    pub fn on_frame(&mut self) {
        if !self.frame_pending {
            return;
        }
        self.frame_pending = false;
        self.tick();
    }

    /// Judges a key press. Returns the tier when it matched a note.
    pub fn note_on(&mut self, midi: u8) -> Option<HitTier> {
        if self.state != GameState::Playing {
            tracing::trace!(midi, state = %self.state, "note on ignored");
            return None;
        }

        let window_ms = self.hit_window_for(midi);
        let result = self.scheduler.try_hit(midi, self.current_time, window_ms)?;
        let tier = self.tracker.register_hit(result.delta_ms);
        tracing::trace!(
            midi,
            note = %result.note.id,
            offset_ms = result.offset_ms,
            ?tier,
            "hit"
        );

        if self.practice_waiting && self.config.mode == GameMode::Practice {
            // Continue from the note's nominal start, not from the key press,
            // so repeated stalls do not push the song later and later.
            self.practice_waiting = false;
            let resume_at = result.note.start_time();
            self.playback
                .anchor_to(resume_at, self.clock.now_ms(), self.config.speed);
            self.current_time = resume_at;
            tracing::debug!(resume_at, "practice wait released");
        }

        Some(tier)
    }

    /// Key release. Judgment only looks at presses, so this never changes
    /// engine state; it exists so hosts can route both edges uniformly.
    pub fn note_off(&mut self, midi: u8) {
        tracing::trace!(midi, "note off");
    }

    pub fn pause(&mut self) {
        if self.state != GameState::Playing {
            tracing::trace!(state = %self.state, "pause ignored");
            return;
        }
        self.state = GameState::Paused;
        self.playback.pause(self.clock.now_ms());
        self.frame_pending = false;
        tracing::debug!(at = self.current_time, "paused");
        self.emit();
    }

    pub fn resume(&mut self) {
        if self.state != GameState::Paused {
            tracing::trace!(state = %self.state, "resume ignored");
            return;
        }
        self.playback.resume(self.clock.now_ms());
        self.state = GameState::Playing;
        tracing::debug!(at = self.current_time, "resumed");
        self.tick();
    }

    /// Returns to idle from any state and cancels pending callbacks.
    pub fn stop(&mut self) {
        self.cancel_callbacks();
        self.state = GameState::Idle;
        self.current_time = 0.0;
        self.practice_waiting = false;
        self.playback.reset();
        tracing::debug!("stopped");
        self.emit();
    }

    /// Cancels outstanding callbacks and drops the listener. Safe to call
    /// more than once; the engine must not be used afterwards.
    pub fn destroy(&mut self) {
        self.cancel_callbacks();
        self.listener = None;
    }

    fn begin_playing(&mut self) {
        self.state = GameState::Playing;
        self.playback.start(self.clock.now_ms());
        self.current_time = 0.0;
        tracing::debug!("playing");
        self.tick();
    }

    /// One frame of play: advance time, activate, finalise misses, gate
    /// practice, check completion, emit, then request the next frame.
    fn tick(&mut self) {
        if self.state != GameState::Playing {
            return;
        }

        if !self.practice_waiting {
            self.current_time = self
                .playback
                .song_time(self.clock.now_ms(), self.config.speed);
        }

        self.scheduler.update(self.current_time);

        match self.config.mode {
            GameMode::Performance => {
                let missed = self
                    .scheduler
                    .mark_missed_before(self.current_time - MISS_WINDOW_SECONDS);
                self.register_misses(&missed);
            }
            GameMode::Practice => {
                if !self.practice_waiting {
                    if let Some(next) = self.scheduler.next_expected_note() {
                        let hold_at = next.start_time() + PRACTICE_WAIT_SECONDS;
                        if self.current_time > hold_at {
                            self.practice_waiting = true;
                            self.current_time = hold_at;
                            tracing::debug!(
                                midi = next.midi(),
                                at = self.current_time,
                                "practice waiting for input"
                            );
                        }
                    }
                }
            }
            GameMode::Freeplay => {}
        }

        let song_over = self
            .song
            .as_ref()
            .map_or(false, |song| self.current_time > song.duration_seconds());
        if self.scheduler.is_complete() && song_over {
            self.complete();
            return;
        }

        self.emit();
        self.frame_pending = true;
    }

    fn complete(&mut self) {
        self.state = GameState::Completed;
        self.frame_pending = false;
        if self.config.mode == GameMode::Performance {
            let missed = self.scheduler.mark_missed_before(f64::INFINITY);
            self.register_misses(&missed);
        }
        let score = self.tracker.score();
        tracing::debug!(
            score = score.score,
            accuracy = score.accuracy,
            "song completed"
        );
        self.emit();
    }

    fn register_misses(&mut self, missed: &[ActiveNote]) {
        for note in missed {
            tracing::trace!(midi = note.midi(), note = %note.id, "miss");
            self.tracker.register_miss();
        }
    }

    /// While practice is waiting on a note, its own pitch is accepted however
    /// late the frozen clock stands relative to it.
    fn hit_window_for(&self, midi: u8) -> f64 {
        let window = self.config.hit_window_ms;
        if !self.practice_waiting {
            return window;
        }
        match self.scheduler.next_expected_note() {
            Some(next) if next.midi() == midi => {
                let lateness_ms = (self.current_time - next.start_time()).abs() * 1000.0;
                window.max(lateness_ms)
            }
            _ => window,
        }
    }

    fn rewind(&mut self) {
        let total = self.song.as_ref().map_or(0, note_count);
        self.scheduler.reset();
        self.tracker.reset(total);
        self.current_time = 0.0;
        self.practice_waiting = false;
        self.playback.reset();
    }

    fn cancel_callbacks(&mut self) {
        self.frame_pending = false;
        self.countdown_pending = false;
    }

    fn emit(&mut self) {
        if self.listener.is_none() {
            return;
        }
        let snapshot = self.snapshot();
        if let Some(listener) = self.listener.as_mut() {
            listener(&snapshot);
        }
    }
}

impl<C: Clock> fmt::Debug for GameEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameEngine")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("song", &self.song.as_ref().map(|song| song.id.as_str()))
            .field("current_time", &self.current_time)
            .field("countdown", &self.countdown)
            .field("frame_pending", &self.frame_pending)
            .field("countdown_pending", &self.countdown_pending)
            .field("practice_waiting", &self.practice_waiting)
            .finish()
    }
}

fn note_count(song: &Song) -> u32 {
    u32::try_from(song.len()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{ManualClock, SongNote};

    const FRAME_MS: f64 = 1000.0 / 60.0;

    fn engine_with(mode: GameMode, notes: &[SongNote]) -> (GameEngine<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let mut engine = GameEngine::with_clock(clock.clone());
        engine.set_config(GameConfigPatch::mode(mode)).unwrap();
        engine.load_song(Song::from_notes("test", "Test", notes.iter().copied()).unwrap());
        (engine, clock)
    }

    fn finish_countdown(engine: &mut GameEngine<ManualClock>, clock: &ManualClock) {
        engine.start();
        for _ in 0..COUNTDOWN_SECONDS {
            clock.advance_ms(1000.0);
            engine.on_countdown_interval();
        }
        assert_eq!(engine.state(), GameState::Playing);
    }

    fn advance_frames(engine: &mut GameEngine<ManualClock>, clock: &ManualClock, frames: usize) {
        for _ in 0..frames {
            clock.advance_ms(FRAME_MS);
            engine.on_frame();
        }
    }

    /// Plays frames until `song_time`, completion, or a practice wait.
    fn run_until(engine: &mut GameEngine<ManualClock>, clock: &ManualClock, song_time: f64) {
        while engine.state() == GameState::Playing
            && !engine.is_practice_waiting()
            && engine.current_time() < song_time
        {
            clock.advance_ms(FRAME_MS);
            engine.on_frame();
        }
    }

    fn record_snapshots(engine: &mut GameEngine<ManualClock>) -> Rc<RefCell<Vec<Snapshot>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        engine.set_listener(move |snapshot| sink.borrow_mut().push(snapshot.clone()));
        log
    }

    #[test]
    fn start_without_song_is_ignored() {
        let mut engine = GameEngine::with_clock(ManualClock::new());
        engine.start();
        assert_eq!(engine.state(), GameState::Idle);
        assert!(!engine.countdown_pending());
    }

    #[test]
    fn countdown_steps_then_plays_from_zero() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 2.0, 0.5)]);
        let log = record_snapshots(&mut engine);

        engine.start();
        assert_eq!(engine.state(), GameState::Countdown);
        assert_eq!(engine.countdown(), 3);

        clock.advance_ms(1000.0);
        engine.on_countdown_interval();
        assert_eq!(engine.countdown(), 2);
        // Frames are not requested during the countdown.
        engine.on_frame();
        assert_eq!(engine.state(), GameState::Countdown);

        clock.advance_ms(1000.0);
        engine.on_countdown_interval();
        clock.advance_ms(1000.0);
        engine.on_countdown_interval();

        assert_eq!(engine.state(), GameState::Playing);
        assert_eq!(engine.current_time(), 0.0);
        assert!(engine.wants_frame());
        assert!(!engine.countdown_pending());

        let countdowns: Vec<_> = log.borrow().iter().map(|s| s.countdown).collect();
        assert_eq!(countdowns, vec![3, 2, 1, 0]);
    }

    #[test]
    fn song_time_follows_wall_clock_and_speed() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 9.0, 0.5)]);
        engine.set_config(GameConfigPatch::speed(0.5)).unwrap();
        finish_countdown(&mut engine, &clock);

        clock.advance_ms(2000.0);
        engine.on_frame();
        assert!((engine.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn speed_change_keeps_current_position() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 9.0, 0.5)]);
        finish_countdown(&mut engine, &clock);
        clock.advance_ms(2000.0);
        engine.on_frame();

        engine.set_config(GameConfigPatch::speed(2.0)).unwrap();
        clock.advance_ms(1000.0);
        engine.on_frame();
        assert!((engine.current_time() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn slower_speed_reveals_notes_earlier() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 5.0, 0.5)]);
        finish_countdown(&mut engine, &clock);
        assert!(engine.active_notes().is_empty());

        engine.set_config(GameConfigPatch::speed(0.5)).unwrap();
        clock.advance_ms(100.0);
        engine.on_frame();
        assert_eq!(engine.active_notes().len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected_whole() {
        let mut engine = GameEngine::with_clock(ManualClock::new());
        let patch = GameConfigPatch {
            mode: Some(GameMode::Practice),
            speed: Some(-1.0),
            ..GameConfigPatch::default()
        };
        assert!(engine.set_config(patch).is_err());
        assert_eq!(engine.config(), GameConfig::default());
    }

    #[test]
    fn note_on_outside_playing_is_ignored() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 0.0, 0.5)]);
        assert_eq!(engine.note_on(60), None);

        engine.start();
        clock.advance_ms(1000.0);
        engine.on_countdown_interval();
        assert_eq!(engine.note_on(60), None);
        assert_eq!(engine.score().hit_notes, 0);
    }

    #[test]
    fn hits_are_scored_through_the_tracker() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 1.0, 0.5)]);
        finish_countdown(&mut engine, &clock);

        clock.advance_ms(1020.0);
        engine.on_frame();
        assert_eq!(engine.note_on(60), Some(HitTier::Perfect));
        assert_eq!(engine.note_on(60), None);

        let score = engine.score();
        assert_eq!(score.hit_notes, 1);
        assert_eq!(score.score, 100);
    }

    #[test]
    fn performance_mode_finalises_late_notes() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[
            SongNote::new(60, 1.0, 0.5),
            SongNote::new(62, 5.0, 0.5),
        ]);
        finish_countdown(&mut engine, &clock);

        run_until(&mut engine, &clock, 1.45);
        assert_eq!(engine.score().missed_notes, 0);

        run_until(&mut engine, &clock, 1.65);
        let score = engine.score();
        assert_eq!(score.missed_notes, 1);
        assert_eq!(score.accuracy, 0);
        assert!(engine.active_notes()[0].missed);
    }

    #[test]
    fn practice_mode_freezes_until_correct_input() {
        let (mut engine, clock) = engine_with(GameMode::Practice, &[
            SongNote::new(60, 1.0, 0.5),
            SongNote::new(62, 2.0, 0.5),
        ]);
        finish_countdown(&mut engine, &clock);

        run_until(&mut engine, &clock, 1.2);
        assert!(engine.is_practice_waiting());
        let frozen = engine.current_time();
        assert_eq!(frozen, 1.0 + PRACTICE_WAIT_SECONDS);

        advance_frames(&mut engine, &clock, 120);
        assert_eq!(engine.current_time(), frozen);
        assert_eq!(engine.score().missed_notes, 0);
        assert_eq!(engine.next_expected_midi(), Some(60));

        assert_eq!(engine.note_on(62), None);
        assert!(engine.is_practice_waiting());

        assert!(engine.note_on(60).is_some());
        assert!(!engine.is_practice_waiting());
        assert_eq!(engine.current_time(), 1.0);

        clock.advance_ms(500.0);
        engine.on_frame();
        assert!((engine.current_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn practice_mode_does_not_drift_across_stalls() {
        let (mut engine, clock) = engine_with(GameMode::Practice, &[
            SongNote::new(60, 1.0, 0.25),
            SongNote::new(62, 2.0, 0.25),
            SongNote::new(64, 3.0, 0.25),
        ]);
        finish_countdown(&mut engine, &clock);

        for (midi, start) in [(60, 1.0), (62, 2.0), (64, 3.0)] {
            run_until(&mut engine, &clock, start + 0.2);
            assert!(engine.is_practice_waiting());
            advance_frames(&mut engine, &clock, 90);
            engine.note_on(midi).expect("expected note releases the wait");
            assert_eq!(engine.current_time(), start);
        }

        run_until(&mut engine, &clock, 10.0);
        assert_eq!(engine.state(), GameState::Completed);
        assert_eq!(engine.score().hit_notes, 3);
        assert_eq!(engine.score().missed_notes, 0);
    }

    #[test]
    fn leaving_practice_mid_wait_restarts_the_timeline() {
        let (mut engine, clock) = engine_with(GameMode::Practice, &[
            SongNote::new(60, 1.0, 0.5),
            SongNote::new(62, 3.0, 0.5),
        ]);
        finish_countdown(&mut engine, &clock);
        run_until(&mut engine, &clock, 1.2);
        assert!(engine.is_practice_waiting());
        let held = engine.current_time();

        clock.advance_ms(5000.0);
        engine.set_config(GameConfigPatch::mode(GameMode::Performance)).unwrap();
        assert!(!engine.is_practice_waiting());

        advance_frames(&mut engine, &clock, 1);
        assert!((engine.current_time() - (held + FRAME_MS / 1000.0)).abs() < 1e-9);

        run_until(&mut engine, &clock, 2.0);
        assert!(engine.current_time() >= 2.0);
        assert_eq!(engine.score().missed_notes, 1);
    }

    #[test]
    fn pause_and_resume_each_emit() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 9.0, 0.5)]);
        finish_countdown(&mut engine, &clock);
        let log = record_snapshots(&mut engine);

        engine.pause();
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].state, GameState::Paused);

        engine.resume();
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(log.borrow()[1].state, GameState::Playing);
    }

    #[test]
    fn frames_after_completion_do_nothing() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 0.5, 0.25)]);
        finish_countdown(&mut engine, &clock);
        run_until(&mut engine, &clock, 5.0);
        assert_eq!(engine.state(), GameState::Completed);

        let log = record_snapshots(&mut engine);
        let finished_at = engine.current_time();
        advance_frames(&mut engine, &clock, 10);

        assert_eq!(engine.state(), GameState::Completed);
        assert_eq!(engine.current_time(), finished_at);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn pause_resume_keeps_song_time() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 9.0, 0.5)]);
        finish_countdown(&mut engine, &clock);
        advance_frames(&mut engine, &clock, 60);

        engine.pause();
        let paused_at = engine.current_time();
        assert_eq!(engine.state(), GameState::Paused);
        assert!(!engine.wants_frame());

        // A frame queued before the pause must not tick.
        clock.advance_ms(7_250.0);
        engine.on_frame();
        assert_eq!(engine.current_time(), paused_at);

        engine.resume();
        assert_eq!(engine.state(), GameState::Playing);
        assert!((engine.current_time() - paused_at).abs() < 1e-9);
    }

    #[test]
    fn pause_and_resume_are_ignored_in_wrong_state() {
        let (mut engine, _clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 1.0, 0.5)]);
        engine.resume();
        assert_eq!(engine.state(), GameState::Idle);
        engine.pause();
        assert_eq!(engine.state(), GameState::Idle);
    }

    #[test]
    fn completes_once_and_finalises_leftovers() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 1.0, 0.5)]);
        let log = record_snapshots(&mut engine);
        finish_countdown(&mut engine, &clock);

        run_until(&mut engine, &clock, 5.0);
        assert_eq!(engine.state(), GameState::Completed);
        assert!(engine.current_time() > 1.5);
        assert!(!engine.wants_frame());

        let score = engine.score();
        assert_eq!(score.missed_notes, 1);
        assert_eq!(score.hit_notes, 0);

        let completed = log
            .borrow()
            .iter()
            .filter(|s| s.state == GameState::Completed)
            .count();
        assert_eq!(completed, 1);

        let last = log.borrow().last().cloned().unwrap();
        assert_eq!(last.score.missed_notes, 1);
    }

    #[test]
    fn completion_after_hit() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 1.0, 0.5)]);
        finish_countdown(&mut engine, &clock);

        run_until(&mut engine, &clock, 1.0);
        assert!(engine.note_on(60).is_some());
        run_until(&mut engine, &clock, 1.45);
        assert_eq!(engine.state(), GameState::Playing);

        run_until(&mut engine, &clock, 5.0);
        assert_eq!(engine.state(), GameState::Completed);
        assert_eq!(engine.score().hit_notes, 1);
        assert_eq!(engine.score().missed_notes, 0);
    }

    #[test]
    fn stop_cancels_countdown_and_frames() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 1.0, 0.5)]);
        engine.start();
        engine.stop();
        assert_eq!(engine.state(), GameState::Idle);
        assert!(!engine.countdown_pending());

        clock.advance_ms(1000.0);
        engine.on_countdown_interval();
        assert_eq!(engine.state(), GameState::Idle);

        finish_countdown(&mut engine, &clock);
        advance_frames(&mut engine, &clock, 10);
        engine.stop();
        engine.stop();
        assert_eq!(engine.current_time(), 0.0);
        assert!(!engine.wants_frame());
        engine.on_frame();
        assert_eq!(engine.state(), GameState::Idle);
    }

    #[test]
    fn restart_after_stop_begins_fresh() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 1.0, 0.5)]);
        finish_countdown(&mut engine, &clock);
        run_until(&mut engine, &clock, 1.0);
        engine.note_on(60).unwrap();
        engine.stop();

        finish_countdown(&mut engine, &clock);
        assert_eq!(engine.score().hit_notes, 0);
        run_until(&mut engine, &clock, 1.0);
        assert!(engine.note_on(60).is_some());
    }

    #[test]
    fn reloading_resets_previous_session() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[
            SongNote::new(60, 0.5, 0.5),
            SongNote::new(62, 0.6, 0.5),
        ]);
        finish_countdown(&mut engine, &clock);
        run_until(&mut engine, &clock, 0.5);
        engine.note_on(60).unwrap();
        run_until(&mut engine, &clock, 1.3);
        assert_eq!(engine.score().missed_notes, 1);

        engine.load_song(Song::from_notes("a", "A", [SongNote::new(64, 4.0, 0.5)]).unwrap());
        engine.load_song(Song::from_notes("b", "B", [SongNote::new(65, 4.0, 0.5)]).unwrap());

        assert_eq!(engine.state(), GameState::Idle);
        assert!(engine.active_notes().is_empty());
        assert_eq!(engine.score(), ScoreData::new(1));
        assert_eq!(engine.current_time(), 0.0);

        finish_countdown(&mut engine, &clock);
        run_until(&mut engine, &clock, 1.1);
        let midis: Vec<_> = engine.active_notes().iter().map(ActiveNote::midi).collect();
        assert_eq!(midis, vec![65]);
    }

    #[test]
    fn freeplay_never_starts() {
        let (mut engine, _clock) = engine_with(GameMode::Freeplay, &[SongNote::new(60, 1.0, 0.5)]);
        engine.start();
        assert_eq!(engine.state(), GameState::Idle);
        assert_eq!(engine.note_on(60), None);
    }

    #[test]
    fn only_latest_listener_is_notified() {
        let (mut engine, _clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 1.0, 0.5)]);
        let first = record_snapshots(&mut engine);
        let second = record_snapshots(&mut engine);

        engine.stop();
        assert!(first.borrow().is_empty());
        assert_eq!(second.borrow().len(), 1);
    }

    #[test]
    fn destroy_cancels_callbacks_and_is_repeatable() {
        let (mut engine, clock) = engine_with(GameMode::Performance, &[SongNote::new(60, 1.0, 0.5)]);
        let log = record_snapshots(&mut engine);
        finish_countdown(&mut engine, &clock);
        let emitted = log.borrow().len();

        engine.destroy();
        engine.destroy();
        assert!(!engine.wants_frame());
        clock.advance_ms(FRAME_MS);
        engine.on_frame();
        assert_eq!(log.borrow().len(), emitted);
    }
}
