use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::song::{is_black_key, midi_to_note_name};

/// Binds one computer key to a piano key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMapping {
    pub key: char,
    pub midi: u8,
}

impl KeyMapping {
    pub fn new(key: char, midi: u8) -> Self {
        Self {
            key: key.to_ascii_lowercase(),
            midi,
        }
    }

    pub fn is_black(&self) -> bool {
        is_black_key(self.midi)
    }

    pub fn note_name(&self) -> String {
        midi_to_note_name(self.midi)
    }
}

/// Two octaves on a QWERTY keyboard: Z/S rows for C3-B3, Q/number rows for
/// C4-C5.
const DEFAULT_LAYOUT: [(char, u8); 25] = [
    ('z', 48),
    ('s', 49),
    ('x', 50),
    ('d', 51),
    ('c', 52),
    ('v', 53),
    ('g', 54),
    ('b', 55),
    ('h', 56),
    ('n', 57),
    ('j', 58),
    ('m', 59),
    ('q', 60),
    ('2', 61),
    ('w', 62),
    ('3', 63),
    ('e', 64),
    ('r', 65),
    ('5', 66),
    ('t', 67),
    ('6', 68),
    ('y', 69),
    ('7', 70),
    ('u', 71),
    ('i', 72),
];

/// Lookup in both directions between keys and pitches.
#[derive(Debug, Clone)]
pub struct KeyboardMap {
    mappings: Vec<KeyMapping>,
    by_key: HashMap<char, usize>,
    by_midi: HashMap<u8, usize>,
}

impl KeyboardMap {
    pub fn new(mappings: Vec<KeyMapping>) -> Self {
        let mut by_key = HashMap::with_capacity(mappings.len());
        let mut by_midi = HashMap::with_capacity(mappings.len());
        for (index, mapping) in mappings.iter().enumerate() {
            by_key.insert(mapping.key, index);
            by_midi.entry(mapping.midi).or_insert(index);
        }
        Self {
            mappings,
            by_key,
            by_midi,
        }
    }

    pub fn midi_for_key(&self, key: char) -> Option<u8> {
        self.by_key
            .get(&key.to_ascii_lowercase())
            .map(|&index| self.mappings[index].midi)
    }

    pub fn key_for_midi(&self, midi: u8) -> Option<char> {
        self.by_midi.get(&midi).map(|&index| self.mappings[index].key)
    }

    pub fn mappings(&self) -> &[KeyMapping] {
        &self.mappings
    }
}

impl Default for KeyboardMap {
    fn default() -> Self {
        Self::new(
            DEFAULT_LAYOUT
                .iter()
                .map(|&(key, midi)| KeyMapping::new(key, midi))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    NoteOn(u8),
    NoteOff(u8),
}

/// Turns raw key presses into note events, dropping auto-repeat.
#[derive(Debug, Clone, Default)]
pub struct KeyboardInput {
    map: KeyboardMap,
    pressed: BTreeSet<char>,
}

impl KeyboardInput {
    pub fn new(map: KeyboardMap) -> Self {
        Self {
            map,
            pressed: BTreeSet::new(),
        }
    }

    /// A note-on for the first press of a mapped key; repeats while the key
    /// is held produce nothing.
    pub fn key_down(&mut self, key: char) -> Option<InputEvent> {
        let key = key.to_ascii_lowercase();
        let midi = self.map.midi_for_key(key)?;
        if !self.pressed.insert(key) {
            return None;
        }
        Some(InputEvent::NoteOn(midi))
    }

    /// A note-off only for keys that were seen going down.
    pub fn key_up(&mut self, key: char) -> Option<InputEvent> {
        let key = key.to_ascii_lowercase();
        let midi = self.map.midi_for_key(key)?;
        if !self.pressed.remove(&key) {
            return None;
        }
        Some(InputEvent::NoteOff(midi))
    }

    /// Releases every held key, e.g. when the window loses focus.
    pub fn release_all(&mut self) -> Vec<InputEvent> {
        let pressed = std::mem::take(&mut self.pressed);
        pressed
            .into_iter()
            .filter_map(|key| self.map.midi_for_key(key))
            .map(InputEvent::NoteOff)
            .collect()
    }

    pub fn is_pressed(&self, key: char) -> bool {
        self.pressed.contains(&key.to_ascii_lowercase())
    }

    pub fn map(&self) -> &KeyboardMap {
        &self.map
    }
}
