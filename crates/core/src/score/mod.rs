use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{
    GOOD_POINTS, GREAT_POINTS, GREAT_WINDOW_MS, PERFECT_POINTS, PERFECT_WINDOW_MS,
};

const STREAK_BONUS_STEP: u32 = 10;
const STREAK_BONUS_POINTS: u64 = 10;

/// Timing quality of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitTier {
    Perfect,
    Great,
    Good,
}

impl HitTier {
    /// Grades an offset in milliseconds; the sign is ignored.
    pub fn classify(delta_ms: f64) -> Self {
        let delta = delta_ms.abs();
        if delta <= PERFECT_WINDOW_MS {
            Self::Perfect
        } else if delta <= GREAT_WINDOW_MS {
            Self::Great
        } else {
            Self::Good
        }
    }

    pub fn points(self) -> u64 {
        match self {
            Self::Perfect => PERFECT_POINTS,
            Self::Great => GREAT_POINTS,
            Self::Good => GOOD_POINTS,
        }
    }
}

/// Cumulative judgment counters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreData {
    /// Song length at load; informational only.
    pub total_notes: u32,
    pub hit_notes: u32,
    pub missed_notes: u32,
    /// Whole percent, 100 before any judgment.
    pub accuracy: u32,
    pub max_streak: u32,
    pub current_streak: u32,
    pub score: u64,
    pub perfect: u32,
    pub great: u32,
    pub good: u32,
}

impl ScoreData {
    pub fn new(total_notes: u32) -> Self {
        Self {
            total_notes,
            hit_notes: 0,
            missed_notes: 0,
            accuracy: 100,
            max_streak: 0,
            current_streak: 0,
            score: 0,
            perfect: 0,
            great: 0,
            good: 0,
        }
    }

    pub fn grade(&self) -> LetterGrade {
        LetterGrade::from_accuracy(self.accuracy)
    }
}

impl Default for ScoreData {
    fn default() -> Self {
        Self::new(0)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScoreTracker {
    data: ScoreData,
}

impl ScoreTracker {
    pub fn new(total_notes: u32) -> Self {
        Self {
            data: ScoreData::new(total_notes),
        }
    }

    pub fn reset(&mut self, total_notes: u32) {
        self.data = ScoreData::new(total_notes);
    }

    pub fn score(&self) -> ScoreData {
        self.data
    }

    pub fn register_hit(&mut self, timing_delta_ms: f64) -> HitTier {
        let tier = HitTier::classify(timing_delta_ms);
        match tier {
            HitTier::Perfect => self.data.perfect += 1,
            HitTier::Great => self.data.great += 1,
            HitTier::Good => self.data.good += 1,
        }
        self.data.score += tier.points();

        self.data.hit_notes += 1;
        self.data.current_streak += 1;
        self.data.max_streak = self.data.max_streak.max(self.data.current_streak);
        self.data.score += streak_bonus(self.data.current_streak);

        self.update_accuracy();
        tier
    }

    pub fn register_miss(&mut self) {
        self.data.missed_notes += 1;
        self.data.current_streak = 0;
        self.update_accuracy();
    }

    fn update_accuracy(&mut self) {
        self.data.accuracy = accuracy(self.data.hit_notes, self.data.missed_notes);
    }
}

/// `round(100 * hit / (hit + miss))`, or 100 with no judgments.
pub fn accuracy(hit_notes: u32, missed_notes: u32) -> u32 {
    let judged = u64::from(hit_notes) + u64::from(missed_notes);
    if judged == 0 {
        return 100;
    }
    (f64::from(hit_notes) / judged as f64 * 100.0).round() as u32
}

/// Bonus paid on the hit that brings the streak to a multiple of ten.
/// Derived from the current streak alone, so it never compounds.
fn streak_bonus(streak: u32) -> u64 {
    if streak >= STREAK_BONUS_STEP && streak % STREAK_BONUS_STEP == 0 {
        u64::from(streak / STREAK_BONUS_STEP) * STREAK_BONUS_POINTS
    } else {
        0
    }
}

/// Letter shown on the results screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LetterGrade {
    S,
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub fn from_accuracy(accuracy: u32) -> Self {
        match accuracy {
            95.. => Self::S,
            90..=94 => Self::A,
            80..=89 => Self::B,
            70..=79 => Self::C,
            60..=69 => Self::D,
            _ => Self::F,
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::S => "S",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.write_str(letter)
    }
}
