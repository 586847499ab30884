use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{InstrumentKind, PianofallError, Result};

/// Offsets within which a hit is graded perfect, in milliseconds.
pub const PERFECT_WINDOW_MS: f64 = 50.0;
/// Offsets within which a hit is graded great, in milliseconds.
pub const GREAT_WINDOW_MS: f64 = 100.0;
/// Nominal outer bound of the good tier. Acceptance is decided by the
/// configured hit window, so hits beyond this still grade as good.
pub const GOOD_WINDOW_MS: f64 = 150.0;

pub const PERFECT_POINTS: u64 = 100;
pub const GREAT_POINTS: u64 = 75;
pub const GOOD_POINTS: u64 = 50;

/// Grace after a note's start before it counts as passed or missable.
pub const MISS_WINDOW_SECONDS: f64 = 0.3;
/// How late the next note may get in practice mode before the timeline waits.
pub const PRACTICE_WAIT_SECONDS: f64 = 0.15;
/// Resolved notes stay in the active set this long after they end.
pub const RETIRE_AFTER_SECONDS: f64 = 2.0;

pub const COUNTDOWN_SECONDS: u32 = 3;
pub const COUNTDOWN_INTERVAL_MS: f64 = 1000.0;

/// Speeds offered to the player.
pub const SPEED_OPTIONS: [f64; 7] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0];

/// How the engine treats the player's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// No song is loaded; input goes straight to the audio layer.
    Freeplay,
    /// The timeline waits for the player at every late note.
    Practice,
    /// The timeline never stops and late notes are finalised as misses.
    #[default]
    Performance,
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Freeplay => "freeplay",
            Self::Practice => "practice",
            Self::Performance => "performance",
        })
    }
}

impl std::str::FromStr for GameMode {
    type Err = PianofallError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "freeplay" => Ok(Self::Freeplay),
            "practice" => Ok(Self::Practice),
            "performance" => Ok(Self::Performance),
            other => Err(PianofallError::InvalidConfig(format!(
                "unknown game mode `{other}`"
            ))),
        }
    }
}

/// Per-session gameplay settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    pub mode: GameMode,
    pub speed: f64,
    pub fall_time_seconds: f64,
    pub hit_window_ms: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            mode: GameMode::Performance,
            speed: 1.0,
            fall_time_seconds: 3.0,
            hit_window_ms: GOOD_WINDOW_MS,
        }
    }
}

impl GameConfig {
    /// Rejects values the timing engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        check_positive("speed", self.speed)?;
        check_positive("fallTimeSeconds", self.fall_time_seconds)?;
        check_positive("hitWindowMs", self.hit_window_ms)?;
        Ok(())
    }

    /// Overwrites every field present in `patch`.
    pub fn apply(&mut self, patch: GameConfigPatch) {
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(speed) = patch.speed {
            self.speed = speed;
        }
        if let Some(fall_time) = patch.fall_time_seconds {
            self.fall_time_seconds = fall_time;
        }
        if let Some(window) = patch.hit_window_ms {
            self.hit_window_ms = window;
        }
    }

    /// Look-ahead handed to the note scheduler.
    pub fn scheduler_fall_time(&self) -> f64 {
        self.fall_time_seconds / self.speed
    }
}

/// Partial update for [`GameConfig`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfigPatch {
    pub mode: Option<GameMode>,
    pub speed: Option<f64>,
    pub fall_time_seconds: Option<f64>,
    pub hit_window_ms: Option<f64>,
}

impl GameConfigPatch {
    pub fn speed(speed: f64) -> Self {
        Self {
            speed: Some(speed),
            ..Self::default()
        }
    }

    pub fn mode(mode: GameMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }
}

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub game: GameConfig,
    pub instrument: InstrumentKind,
}

impl AppConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.game.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_json_str(&source)
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PianofallError::InvalidConfig(format!(
            "`{name}` must be a positive number, got {value}"
        )))
    }
}
