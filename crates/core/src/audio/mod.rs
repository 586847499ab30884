use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::song::midi_to_note_name;

/// Pitches with a recorded piano sample; other notes are resampled from the
/// nearest one.
const PIANO_SAMPLE_ROOTS: [u8; 9] = [48, 51, 54, 57, 60, 63, 66, 69, 72];

/// Instrument families selectable by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstrumentKind {
    #[default]
    Piano,
    Accordion,
    Organ,
    ElectricPiano,
    Harpsichord,
    MusicBox,
}

impl std::str::FromStr for InstrumentKind {
    type Err = crate::PianofallError;

    fn from_str(value: &str) -> crate::Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "piano" => Ok(Self::Piano),
            "accordion" => Ok(Self::Accordion),
            "organ" => Ok(Self::Organ),
            "electric-piano" => Ok(Self::ElectricPiano),
            "harpsichord" => Ok(Self::Harpsichord),
            "music-box" => Ok(Self::MusicBox),
            other => Err(crate::PianofallError::InvalidConfig(format!(
                "unknown instrument `{other}`"
            ))),
        }
    }
}

/// A note currently sounding on an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub velocity: f32,
    /// Oscillator frequency, or the playback rate for sampled instruments.
    pub pitch: f32,
    /// Set for notes triggered with a fixed length.
    pub duration: Option<f32>,
}

/// Capabilities every instrument backend offers. Triggers sent before
/// [`Instrument::load`] or after [`Instrument::dispose`] are ignored.
pub trait Instrument {
    fn kind(&self) -> InstrumentKind;
    fn load(&mut self);
    fn is_loaded(&self) -> bool;
    fn attack(&mut self, midi: u8, velocity: f32);
    fn release(&mut self, midi: u8);
    fn attack_release(&mut self, midi: u8, duration: f32, velocity: f32);
    fn dispose(&mut self);
    /// Notes currently held, lowest first.
    fn sounding(&self) -> Vec<u8>;
}

pub fn midi_to_frequency(midi: u8) -> f32 {
    440.0 * 2f32.powf((f32::from(midi) - 69.0) / 12.0)
}

/// Sampled grand piano.
#[derive(Debug, Default)]
pub struct PianoSampler {
    loaded: bool,
    voices: BTreeMap<u8, Voice>,
}

impl PianoSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nearest sampled pitch and the rate it must be played back at.
    pub fn sample_for(midi: u8) -> (u8, f32) {
        let root = PIANO_SAMPLE_ROOTS
            .iter()
            .copied()
            .min_by_key(|root| (i16::from(*root) - i16::from(midi)).abs())
            .unwrap_or(60);
        let rate = 2f32.powf((f32::from(midi) - f32::from(root)) / 12.0);
        (root, rate)
    }

    fn trigger(&mut self, midi: u8, velocity: f32, duration: Option<f32>) {
        if !self.loaded {
            tracing::trace!(midi, "piano not loaded, trigger dropped");
            return;
        }
        let (_, rate) = Self::sample_for(midi);
        self.voices.insert(
            midi,
            Voice {
                velocity: velocity.clamp(0.0, 1.0),
                pitch: rate,
                duration,
            },
        );
    }
}

impl Instrument for PianoSampler {
    fn kind(&self) -> InstrumentKind {
        InstrumentKind::Piano
    }

    fn load(&mut self) {
        if !self.loaded {
            tracing::debug!(samples = PIANO_SAMPLE_ROOTS.len(), "piano samples loaded");
            self.loaded = true;
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn attack(&mut self, midi: u8, velocity: f32) {
        self.trigger(midi, velocity, None);
    }

    fn release(&mut self, midi: u8) {
        if self.loaded {
            self.voices.remove(&midi);
        }
    }

    fn attack_release(&mut self, midi: u8, duration: f32, velocity: f32) {
        self.trigger(midi, velocity, Some(duration));
    }

    fn dispose(&mut self) {
        self.voices.clear();
        self.loaded = false;
    }

    fn sounding(&self) -> Vec<u8> {
        self.voices.keys().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

/// Voice settings for one synthesised family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthPatch {
    pub volume_db: f32,
    pub waveform: Waveform,
    pub envelope: Envelope,
    /// Modulator-to-carrier ratio for FM/AM patches.
    pub harmonicity: Option<f32>,
}

impl SynthPatch {
    pub fn for_kind(kind: InstrumentKind) -> Self {
        match kind {
            InstrumentKind::Accordion => Self {
                volume_db: -6.0,
                waveform: Waveform::Square,
                envelope: Envelope {
                    attack: 0.08,
                    decay: 0.3,
                    sustain: 0.9,
                    release: 0.3,
                },
                harmonicity: Some(3.01),
            },
            InstrumentKind::Organ => Self {
                volume_db: -8.0,
                waveform: Waveform::Sine,
                envelope: Envelope {
                    attack: 0.05,
                    decay: 0.1,
                    sustain: 1.0,
                    release: 0.05,
                },
                harmonicity: Some(2.0),
            },
            InstrumentKind::Harpsichord => Self {
                volume_db: -6.0,
                waveform: Waveform::Sawtooth,
                envelope: Envelope {
                    attack: 0.001,
                    decay: 0.8,
                    sustain: 0.0,
                    release: 0.4,
                },
                harmonicity: None,
            },
            InstrumentKind::MusicBox => Self {
                volume_db: -8.0,
                waveform: Waveform::Triangle,
                envelope: Envelope {
                    attack: 0.001,
                    decay: 1.2,
                    sustain: 0.0,
                    release: 0.8,
                },
                harmonicity: None,
            },
            // The piano is sampled; electric piano doubles as the synth fallback.
            InstrumentKind::ElectricPiano | InstrumentKind::Piano => Self {
                volume_db: -8.0,
                waveform: Waveform::Sine,
                envelope: Envelope {
                    attack: 0.01,
                    decay: 1.5,
                    sustain: 0.2,
                    release: 1.0,
                },
                harmonicity: Some(2.01),
            },
        }
    }
}

/// Polyphonic synthesiser used for every family except the piano.
#[derive(Debug)]
pub struct SynthInstrument {
    kind: InstrumentKind,
    patch: SynthPatch,
    loaded: bool,
    voices: BTreeMap<u8, Voice>,
}

impl SynthInstrument {
    pub fn new(kind: InstrumentKind) -> Self {
        Self {
            kind,
            patch: SynthPatch::for_kind(kind),
            loaded: false,
            voices: BTreeMap::new(),
        }
    }

    pub fn patch(&self) -> &SynthPatch {
        &self.patch
    }

    fn trigger(&mut self, midi: u8, velocity: f32, duration: Option<f32>) {
        if !self.loaded {
            tracing::trace!(midi, kind = ?self.kind, "synth not loaded, trigger dropped");
            return;
        }
        self.voices.insert(
            midi,
            Voice {
                velocity: velocity.clamp(0.0, 1.0),
                pitch: midi_to_frequency(midi),
                duration,
            },
        );
    }
}

impl Instrument for SynthInstrument {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    fn load(&mut self) {
        self.loaded = true;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn attack(&mut self, midi: u8, velocity: f32) {
        self.trigger(midi, velocity, None);
    }

    fn release(&mut self, midi: u8) {
        if self.loaded {
            self.voices.remove(&midi);
        }
    }

    fn attack_release(&mut self, midi: u8, duration: f32, velocity: f32) {
        self.trigger(midi, velocity, Some(duration));
    }

    fn dispose(&mut self) {
        self.voices.clear();
        self.loaded = false;
    }

    fn sounding(&self) -> Vec<u8> {
        self.voices.keys().copied().collect()
    }
}

pub fn create_instrument(kind: InstrumentKind) -> Box<dyn Instrument> {
    match kind {
        InstrumentKind::Piano => Box::new(PianoSampler::new()),
        other => Box::new(SynthInstrument::new(other)),
    }
}

/// High level audio façade that owns the active instrument. Consumes note
/// events from the keyboard, the listen-mode player or freeplay.
pub struct AudioEngine {
    instrument: Box<dyn Instrument>,
    started: bool,
}

impl AudioEngine {
    pub fn new(kind: InstrumentKind) -> Self {
        Self {
            instrument: create_instrument(kind),
            started: false,
        }
    }

    /// Starts the output and loads the current instrument.
    pub fn initialize(&mut self) {
        self.started = true;
        self.instrument.load();
    }

    pub fn is_ready(&self) -> bool {
        self.started && self.instrument.is_loaded()
    }

    pub fn instrument_kind(&self) -> InstrumentKind {
        self.instrument.kind()
    }

    /// Swaps the backend, disposing of the previous one.
    pub fn set_instrument(&mut self, kind: InstrumentKind) {
        if kind == self.instrument.kind() {
            return;
        }
        self.instrument.dispose();
        self.instrument = create_instrument(kind);
        if self.started {
            self.instrument.load();
        }
        tracing::debug!(?kind, "instrument changed");
    }

    pub fn play_note(&mut self, midi: u8, velocity: f32) {
        tracing::trace!(note = %midi_to_note_name(midi), velocity, "attack");
        self.instrument.attack(midi, velocity);
    }

    pub fn stop_note(&mut self, midi: u8) {
        tracing::trace!(note = %midi_to_note_name(midi), "release");
        self.instrument.release(midi);
    }

    pub fn play_note_for(&mut self, midi: u8, duration: f32, velocity: f32) {
        self.instrument.attack_release(midi, duration, velocity);
    }

    pub fn sounding(&self) -> Vec<u8> {
        self.instrument.sounding()
    }

    pub fn dispose(&mut self) {
        self.instrument.dispose();
        self.started = false;
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("instrument", &self.instrument.kind())
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_before_initialize_are_dropped() {
        let mut audio = AudioEngine::new(InstrumentKind::Piano);
        audio.play_note(60, 0.8);
        assert!(audio.sounding().is_empty());

        audio.initialize();
        assert!(audio.is_ready());
        audio.play_note(60, 0.8);
        audio.play_note(64, 0.8);
        audio.stop_note(60);
        assert_eq!(audio.sounding(), vec![64]);
    }

    #[test]
    fn switching_instrument_disposes_previous_voices() {
        let mut audio = AudioEngine::new(InstrumentKind::Piano);
        audio.initialize();
        audio.play_note(60, 0.8);

        audio.set_instrument(InstrumentKind::Organ);
        assert_eq!(audio.instrument_kind(), InstrumentKind::Organ);
        assert!(audio.is_ready());
        assert!(audio.sounding().is_empty());
    }

    #[test]
    fn piano_resamples_from_nearest_root() {
        assert_eq!(PianoSampler::sample_for(60), (60, 1.0));
        let (root, rate) = PianoSampler::sample_for(61);
        assert_eq!(root, 60);
        assert!((rate - 2f32.powf(1.0 / 12.0)).abs() < 1e-6);
        let (root, rate) = PianoSampler::sample_for(62);
        assert_eq!(root, 63);
        assert!(rate < 1.0);
    }

    #[test]
    fn synth_voices_use_equal_temperament() {
        let mut synth = SynthInstrument::new(InstrumentKind::MusicBox);
        synth.load();
        synth.attack_release(69, 0.5, 2.0);

        assert_eq!(synth.patch().waveform, Waveform::Triangle);
        let voice = synth.voices[&69];
        assert!((voice.pitch - 440.0).abs() < 1e-3);
        assert_eq!(voice.velocity, 1.0);
        assert_eq!(voice.duration, Some(0.5));
    }

    #[test]
    fn dispose_unloads_instrument() {
        let mut synth = SynthInstrument::new(InstrumentKind::Harpsichord);
        synth.load();
        synth.attack(60, 0.5);
        synth.dispose();
        assert!(!synth.is_loaded());
        synth.attack(60, 0.5);
        assert!(synth.sounding().is_empty());
    }

    #[test]
    fn parses_instrument_names() {
        assert_eq!(
            "electric-piano".parse::<InstrumentKind>().unwrap(),
            InstrumentKind::ElectricPiano
        );
        assert!("theremin".parse::<InstrumentKind>().is_err());
    }
}
