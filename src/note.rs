//! Notes and the musical vocabulary around them.

use crate::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A note with a channel, a pitch and a velocity.
///
/// There are 16 possible channels, 128 possible pitches, and 128 possible velocity values.
/// The restricted integer fields make an out-of-range note unrepresentable.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct Note {
    channel: u4,
    pitch: u7,
    velocity: u7,
}
impl Note {
    /// Create a note, failing with `Error::InvalidFieldRange` if any field is out of range.
    pub fn new(channel: u8, pitch: u8, velocity: u8) -> Result<Note> {
        Ok(Note {
            channel: u4::check("channel", channel.into())?,
            pitch: u7::check("pitch", pitch.into())?,
            velocity: u7::check("velocity", velocity.into())?,
        })
    }

    /// Create a note out of already range-checked fields.
    #[inline]
    pub const fn from_parts(channel: u4, pitch: u7, velocity: u7) -> Note {
        Note {
            channel,
            pitch,
            velocity,
        }
    }

    #[inline]
    pub fn channel(&self) -> u4 {
        self.channel
    }

    #[inline]
    pub fn pitch(&self) -> u7 {
        self.pitch
    }

    #[inline]
    pub fn velocity(&self) -> u7 {
        self.velocity
    }

    #[inline]
    pub fn set_channel(&mut self, channel: u4) {
        self.channel = channel;
    }

    #[inline]
    pub fn set_pitch(&mut self, pitch: u7) {
        self.pitch = pitch;
    }

    #[inline]
    pub fn set_velocity(&mut self, velocity: u7) {
        self.velocity = velocity;
    }

    /// A copy of this note moved by `semitones`.
    ///
    /// Fails with `Error::TransformApplication` if the resulting pitch falls outside `0..=127`.
    pub fn transpose(&self, semitones: i8) -> Result<Note> {
        let pitch = self.pitch.as_int() as i16 + semitones as i16;
        let pitch = u8::try_from(pitch)
            .ok()
            .and_then(u7::try_from)
            .ok_or_else(|| {
                Error::transform(
                    "transpose",
                    format!(
                        "pitch {} moved by {} semitones leaves the midi range",
                        self.pitch, semitones
                    ),
                )
            })?;
        Ok(Note { pitch, ..*self })
    }

    /// The scientific pitch name of this note, spelled with sharps.
    ///
    /// Middle C (pitch 60) is `C4`.
    pub fn name(&self) -> String {
        const NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        let pitch = self.pitch.as_int();
        let octave = (pitch / 12) as i8 - 1;
        format!("{}{}", NAMES[(pitch % 12) as usize], octave)
    }
}
impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "(Note {} {} ({}) {})",
            self.channel,
            self.pitch,
            self.name(),
            self.velocity
        )
    }
}

/// The twelve pitch classes of the chromatic scale.
///
/// Enharmonic spellings are not distinguished: every black key is named by its flat.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum Tonic {
    #[default]
    C = 0,
    Db = 1,
    D = 2,
    Eb = 3,
    E = 4,
    F = 5,
    Gb = 6,
    G = 7,
    Ab = 8,
    A = 9,
    Bb = 10,
    B = 11,
}
impl Tonic {
    /// Every tonic, in chromatic order starting at C.
    pub const ALL: [Tonic; 12] = [
        Tonic::C,
        Tonic::Db,
        Tonic::D,
        Tonic::Eb,
        Tonic::E,
        Tonic::F,
        Tonic::Gb,
        Tonic::G,
        Tonic::Ab,
        Tonic::A,
        Tonic::Bb,
        Tonic::B,
    ];

    /// The tonic of a pitch class, wrapping any integer onto the 12 semitones of an octave.
    #[inline]
    pub fn from_pitch_class(pc: i32) -> Tonic {
        Tonic::ALL[pc.rem_euclid(12) as usize]
    }

    /// Semitones above C.
    #[inline]
    pub fn pitch_class(self) -> u8 {
        self.into()
    }
}

/// The scales a key signature can be in.
///
/// The discriminants double as the mode byte of the key signature meta event.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum Scale {
    #[default]
    Major = 0,
    /// The natural minor scale.
    Minor = 1,
}

/// A key: a tonic center plus a scale.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct KeySignature {
    pub tonic: Tonic,
    pub scale: Scale,
}
impl KeySignature {
    #[inline]
    pub const fn new(tonic: Tonic, scale: Scale) -> KeySignature {
        KeySignature { tonic, scale }
    }

    /// Pitch class of the major key sharing this key's signature.
    ///
    /// A minor key's relative major sits 3 semitones above its tonic.
    pub fn relative_major(&self) -> Tonic {
        match self.scale {
            Scale::Major => self.tonic,
            Scale::Minor => Tonic::from_pitch_class(self.tonic.pitch_class() as i32 + 3),
        }
    }

    /// Semitones to move a melody in this key so that it lands in `target`.
    ///
    /// Always within `0..12`.
    pub fn offset_to(&self, target: &KeySignature) -> u8 {
        let from = self.relative_major().pitch_class() as i32;
        let to = target.relative_major().pitch_class() as i32;
        (to - from).rem_euclid(12) as u8
    }
}

/// Named intervals and their distance in semitones.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Interval {
    Unison = 0,
    MinorSecond = 1,
    MajorSecond = 2,
    MinorThird = 3,
    MajorThird = 4,
    Fourth = 5,
    Tritone = 6,
    Fifth = 7,
    MinorSixth = 8,
    MajorSixth = 9,
    MinorSeventh = 10,
    MajorSeventh = 11,
    Octave = 12,
}
impl Interval {
    pub const HALF_STEP: Interval = Interval::MinorSecond;
    pub const WHOLE_STEP: Interval = Interval::MajorSecond;

    #[inline]
    pub fn semitones(self) -> i8 {
        u8::from(self) as i8
    }
}
