//! Core library for the Pianofall falling-notes trainer.
//!
//! The crate owns everything between a loaded song and the score screen:
//! song import and validation, the playback clock, the note scheduler, hit
//! judgment, scoring and the game state machine. Presentation layers drive
//! [`GameEngine`] through its frame and countdown callbacks and read state
//! back through [`Snapshot`]s.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod scheduler;
pub mod score;
pub mod song;
pub mod timeline;

pub use audio::{AudioEngine, Instrument, InstrumentKind, PianoSampler, SynthInstrument};
pub use config::{AppConfig, GameConfig, GameConfigPatch, GameMode};
pub use engine::{GameEngine, GameState, Snapshot};
pub use error::{PianofallError, Result};
pub use input::{InputEvent, KeyboardInput, KeyboardMap};
pub use scheduler::{ActiveNote, HitResult, NoteId, NoteScheduler};
pub use score::{HitTier, LetterGrade, ScoreData, ScoreTracker};
pub use song::{Song, SongNote};
pub use timeline::{
    AutoPlayer, Clock, EventKind, ManualClock, PlaybackClock, ScheduledEvent, SystemClock,
};
