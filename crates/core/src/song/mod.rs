use std::{cmp::Ordering, fs, io::Read, path::Path};

use serde::{Deserialize, Serialize};

use crate::{PianofallError, Result};

/// Lowest playable pitch (C3).
pub const MIN_MIDI: u8 = 48;
/// Highest playable pitch (C5).
pub const MAX_MIDI: u8 = 72;
pub const TOTAL_KEYS: usize = (MAX_MIDI - MIN_MIDI + 1) as usize;

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const DEFAULT_VELOCITY: f32 = 0.8;

/// A single authored note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongNote {
    pub midi: u8,
    /// Seconds from the start of the song.
    pub start_time: f64,
    /// Seconds, strictly positive.
    pub duration: f64,
    #[serde(default = "default_velocity")]
    pub velocity: f32,
}

impl SongNote {
    pub fn new(midi: u8, start_time: f64, duration: f64) -> Self {
        Self {
            midi,
            start_time,
            duration,
            velocity: DEFAULT_VELOCITY,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn name(&self) -> String {
        midi_to_note_name(self.midi)
    }
}

fn default_velocity() -> f32 {
    DEFAULT_VELOCITY
}

/// A validated song: notes sorted by start time, all inside the pitch window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub bpm: Option<f64>,
    notes: Vec<SongNote>,
    duration_seconds: f64,
}

/// On-disk representation accepted by [`Song::from_json_reader`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SongFile {
    id: Option<String>,
    title: String,
    artist: Option<String>,
    bpm: Option<f64>,
    notes: Vec<SongNote>,
}

impl Song {
    /// Import boundary for note data.
    ///
    /// Notes outside [`MIN_MIDI`]..=[`MAX_MIDI`] are dropped. The song is
    /// rejected when nothing playable remains or when a note has a negative
    /// start or a non-positive duration.
    pub fn from_notes(
        id: impl Into<String>,
        title: impl Into<String>,
        notes: impl IntoIterator<Item = SongNote>,
    ) -> Result<Self> {
        let title = title.into();
        let mut playable = Vec::new();
        let mut dropped = 0usize;

        for mut note in notes {
            if !note.start_time.is_finite() || note.start_time < 0.0 {
                return Err(PianofallError::InvalidSong(format!(
                    "note {} starts at {} seconds",
                    note.name(),
                    note.start_time
                )));
            }
            if !note.duration.is_finite() || note.duration <= 0.0 {
                return Err(PianofallError::InvalidSong(format!(
                    "note {} at {:.3}s has non-positive duration {}",
                    note.name(),
                    note.start_time,
                    note.duration
                )));
            }
            if !is_in_range(note.midi) {
                dropped += 1;
                continue;
            }
            note.velocity = note.velocity.clamp(0.0, 1.0);
            playable.push(note);
        }

        if dropped > 0 {
            tracing::warn!(title = %title, dropped, "dropped notes outside the playable range");
        }

        if playable.is_empty() {
            return Err(PianofallError::InvalidSong(format!(
                "`{title}` has no playable notes (notes must be in the {}-{} range)",
                midi_to_note_name(MIN_MIDI),
                midi_to_note_name(MAX_MIDI)
            )));
        }

        playable.sort_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(Ordering::Equal)
        });
        let duration_seconds = calculate_duration(&playable);

        Ok(Self {
            id: id.into(),
            title,
            artist: None,
            bpm: None,
            notes: playable,
            duration_seconds,
        })
    }

    pub fn from_json_reader(reader: impl Read) -> Result<Self> {
        let file: SongFile = serde_json::from_reader(reader)?;
        let id = file
            .id
            .unwrap_or_else(|| file.title.to_ascii_lowercase().replace(' ', "-"));
        let mut song = Self::from_notes(id, file.title, file.notes)?;
        song.artist = file.artist;
        song.bpm = file.bpm;
        Ok(song)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path)?;
        Self::from_json_reader(file)
    }

    pub fn notes(&self) -> &[SongNote] {
        &self.notes
    }

    /// Latest end time over all notes.
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// "Twinkle Twinkle Little Star" in C, used when no song file is given.
    pub fn demo() -> Self {
        const PHRASES: [[u8; 7]; 6] = [
            [60, 60, 67, 67, 69, 69, 67],
            [65, 65, 64, 64, 62, 62, 60],
            [67, 67, 65, 65, 64, 64, 62],
            [67, 67, 65, 65, 64, 64, 62],
            [60, 60, 67, 67, 69, 69, 67],
            [65, 65, 64, 64, 62, 62, 60],
        ];

        let mut notes = Vec::with_capacity(PHRASES.len() * 7);
        for (phrase_index, phrase) in PHRASES.iter().enumerate() {
            let phrase_start = phrase_index as f64 * 4.0;
            for (beat, &midi) in phrase.iter().enumerate() {
                let duration = if beat == phrase.len() - 1 { 0.9 } else { 0.45 };
                notes.push(SongNote::new(
                    midi,
                    phrase_start + beat as f64 * 0.5,
                    duration,
                ));
            }
        }

        let mut song = Self::from_notes("twinkle", "Twinkle Twinkle Little Star", notes)
            .expect("built-in song is always playable");
        song.artist = Some("Traditional".to_string());
        song.bpm = Some(120.0);
        song
    }
}

pub fn calculate_duration(notes: &[SongNote]) -> f64 {
    notes.iter().map(SongNote::end_time).fold(0.0, f64::max)
}

pub fn is_in_range(midi: u8) -> bool {
    (MIN_MIDI..=MAX_MIDI).contains(&midi)
}

pub fn is_black_key(midi: u8) -> bool {
    matches!(midi % 12, 1 | 3 | 6 | 8 | 10)
}

/// `60` becomes `"C4"`.
pub fn midi_to_note_name(midi: u8) -> String {
    let octave = i32::from(midi / 12) - 1;
    format!("{}{}", NOTE_NAMES[usize::from(midi % 12)], octave)
}

/// Inverse of [`midi_to_note_name`]; only sharps are recognised.
pub fn note_name_to_midi(name: &str) -> Option<u8> {
    let split = name.find(|c: char| c.is_ascii_digit())?;
    let (pitch, octave) = name.split_at(split);
    let index = NOTE_NAMES.iter().position(|candidate| *candidate == pitch)?;
    let octave: i32 = octave.parse().ok()?;
    u8::try_from((octave + 1) * 12 + index as i32).ok()
}
