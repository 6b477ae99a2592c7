//! Key identity types
//!
//! A key is a tonic pitch class plus a mode, compared by value.

use std::fmt;

/// Sharp spellings, index 0 = C
const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Pitch class (0-11, where 0=C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PitchClass(u8);

impl PitchClass {
    pub const C: PitchClass = PitchClass(0);
    pub const A: PitchClass = PitchClass(9);

    /// Create a pitch class, returning None outside 0-11
    pub fn new(value: u8) -> Option<Self> {
        (value < 12).then_some(Self(value))
    }

    /// Create a pitch class from any semitone offset, wrapping around the octave
    pub fn wrapping(semitones: i32) -> Self {
        Self(semitones.rem_euclid(12) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Transpose by a number of semitones
    pub fn transpose(self, semitones: i32) -> Self {
        Self::wrapping(self.0 as i32 + semitones)
    }

    pub fn name(self) -> &'static str {
        PITCH_NAMES[self.index()]
    }

    /// All twelve pitch classes in ascending order from C
    pub fn all() -> impl Iterator<Item = PitchClass> {
        (0..12u8).map(PitchClass)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tonal quality of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn is_major(self) -> bool {
        matches!(self, Mode::Major)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Major => f.write_str("Major"),
            Mode::Minor => f.write_str("Minor"),
        }
    }
}

/// Musical key (24 possible: 12 major + 12 minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub tonic: PitchClass,
    pub mode: Mode,
}

impl Key {
    pub fn new(tonic: PitchClass, mode: Mode) -> Self {
        Self { tonic, mode }
    }

    pub fn major(tonic: PitchClass) -> Self {
        Self::new(tonic, Mode::Major)
    }

    pub fn minor(tonic: PitchClass) -> Self {
        Self::new(tonic, Mode::Minor)
    }

    /// The key sharing this key's pitch content in the other mode
    ///
    /// The relative minor sits a minor third below its major (C -> A minor).
    pub fn relative(self) -> Self {
        match self.mode {
            Mode::Major => Self::minor(self.tonic.transpose(-3)),
            Mode::Minor => Self::major(self.tonic.transpose(3)),
        }
    }

    pub fn is_relative_of(self, other: Key) -> bool {
        self.relative() == other
    }

    /// All 24 keys, majors first
    pub fn all() -> impl Iterator<Item = Key> {
        PitchClass::all()
            .map(Key::major)
            .chain(PitchClass::all().map(Key::minor))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tonic, self.mode)
    }
}

/// One scored key hypothesis for a single tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyCandidate {
    pub key: Key,
    /// Weighted correlation score across profiles
    pub score: f32,
    /// Confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// Result of one detection tick
///
/// `key` is None when nothing is reported; the confidence is then the raw
/// tick confidence (or 0.0 for silence and failures).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Detection {
    pub key: Option<Key>,
    pub confidence: f32,
}

impl Detection {
    /// "No key detected", confidence 0
    pub fn none() -> Self {
        Self::default()
    }

    pub fn unreported(confidence: f32) -> Self {
        Self {
            key: None,
            confidence,
        }
    }

    pub fn reported(key: Key, confidence: f32) -> Self {
        Self {
            key: Some(key),
            confidence,
        }
    }

    pub fn pitch_class(&self) -> Option<PitchClass> {
        self.key.map(|k| k.tonic)
    }

    pub fn mode(&self) -> Option<Mode> {
        self.key.map(|k| k.mode)
    }

    pub fn is_none(&self) -> bool {
        self.key.is_none()
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "{} ({:.0}%)", key, self.confidence * 100.0),
            None => write!(f, "--- ({:.0}%)", self.confidence * 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_class_wrapping() {
        assert_eq!(PitchClass::wrapping(12), PitchClass::C);
        assert_eq!(PitchClass::wrapping(-3), PitchClass::A);
        assert_eq!(PitchClass::wrapping(-15), PitchClass::A);
        assert!(PitchClass::new(12).is_none());
    }

    #[test]
    fn test_relative_keys() {
        let c_major = Key::major(PitchClass::C);
        let a_minor = Key::minor(PitchClass::A);
        assert_eq!(c_major.relative(), a_minor);
        assert_eq!(a_minor.relative(), c_major);
        assert!(a_minor.is_relative_of(c_major));
        assert!(!c_major.is_relative_of(Key::minor(PitchClass::C)));
    }

    #[test]
    fn test_relative_is_involution() {
        for key in Key::all() {
            assert_eq!(key.relative().relative(), key);
            assert_ne!(key.relative().mode, key.mode);
        }
    }

    #[test]
    fn test_display() {
        let fs_minor = Key::minor(PitchClass::wrapping(6));
        assert_eq!(fs_minor.to_string(), "F# Minor");
        assert_eq!(Key::major(PitchClass::C).to_string(), "C Major");
    }

    #[test]
    fn test_detection_accessors() {
        let d = Detection::reported(Key::minor(PitchClass::A), 0.8);
        assert_eq!(d.pitch_class(), Some(PitchClass::A));
        assert_eq!(d.mode(), Some(Mode::Minor));

        let none = Detection::none();
        assert!(none.is_none());
        assert_eq!(none.mode(), None);
        assert_eq!(none.confidence, 0.0);
    }

    #[test]
    fn test_all_keys_unique() {
        let keys: std::collections::HashSet<Key> = Key::all().collect();
        assert_eq!(keys.len(), 24);
    }
}
