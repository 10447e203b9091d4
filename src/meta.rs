//! Meta events and their fixed byte payloads.

use crate::{
    event::RawMessage,
    note::{KeySignature, Scale, Tonic},
    prelude::*,
    primitive::{read_varlen_slice, write_varlen_slice},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Meta event type codes with a meaning in this crate.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MetaType {
    /// Obligatory at track end.
    EndOfTrack = 0x2F,
    Tempo = 0x51,
    TimeSignature = 0x58,
    KeySignature = 0x59,
}

/// Amount of microseconds per beat (quarter note).
///
/// Stored as the 24-bit value found in the file, so the BPM view is derived and always
/// re-encodes to the same bytes.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct Tempo(u24);
impl Tempo {
    /// The slowest tempo the 3-byte payload can carry, about 3.58 BPM.
    pub const MIN_BPM: f64 = 60e6 / 0xFF_FFFF as f64;

    /// 120 BPM, the tempo a MIDI file plays at until told otherwise.
    pub const DEFAULT: Tempo = Tempo(u24::new(500_000));

    /// Create a tempo from beats per minute.
    ///
    /// Fails with `Error::TempoOutOfRange` for tempos slower than `MIN_BPM`, for tempos so fast
    /// that a beat rounds to zero microseconds, and for non-finite values.
    pub fn from_bpm(bpm: f64) -> Result<Tempo> {
        ensure!(
            bpm.is_finite() && bpm >= Self::MIN_BPM,
            Error::TempoOutOfRange(bpm)
        );
        let micros = (60e6 / bpm).round();
        ensure!(
            (1.0..=0xFF_FFFF as f64).contains(&micros),
            Error::TempoOutOfRange(bpm)
        );
        Ok(Tempo(u24::new(micros as u32)))
    }

    /// Create a tempo from its raw microseconds-per-beat value.
    pub fn from_micros(micros_per_beat: u32) -> Result<Tempo> {
        let micros = u24::try_from(micros_per_beat)
            .filter(|micros| micros.as_int() > 0)
            .ok_or(Error::TempoOutOfRange(60e6 / micros_per_beat as f64))?;
        Ok(Tempo(micros))
    }

    #[inline]
    pub fn micros_per_beat(&self) -> u24 {
        self.0
    }

    /// Beats per minute, as the exact inverse of the stored microseconds.
    #[inline]
    pub fn bpm(&self) -> f64 {
        60e6 / self.0.as_int() as f64
    }

    pub(crate) fn encode(&self) -> [u8; 3] {
        let bytes = self.0.as_int().to_be_bytes();
        [bytes[1], bytes[2], bytes[3]]
    }

    fn decode(data: &[u8]) -> Result<Tempo> {
        let [b0, b1, b2] = fixed::<3>(data)?;
        Tempo::from_micros(u32::from_be_bytes([0, b0, b1, b2]))
    }
}

/// A time signature, as carried by the `0x58` meta event.
///
/// The denominator is stored as its base-2 logarithm, the same way the file stores it.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct TimeSignature {
    numerator: u8,
    denominator_log2: u8,
    ticks_per_click: u8,
    thirty_seconds_per_quarter: u8,
}
impl TimeSignature {
    /// Build a time signature from a musical denominator.
    ///
    /// `denominator` must be one of 2, 4, 8, 16 or 32.
    pub fn new(
        numerator: u8,
        denominator: u32,
        ticks_per_click: u8,
        thirty_seconds_per_quarter: u8,
    ) -> Result<TimeSignature> {
        Ok(TimeSignature {
            numerator,
            denominator_log2: denominator_to_log2(denominator)?,
            ticks_per_click,
            thirty_seconds_per_quarter,
        })
    }

    /// Build a time signature from the stored base-2 logarithm of its denominator.
    pub fn from_log2(
        numerator: u8,
        denominator_log2: u8,
        ticks_per_click: u8,
        thirty_seconds_per_quarter: u8,
    ) -> Result<TimeSignature> {
        ensure!(
            (1..=5).contains(&denominator_log2),
            Error::InvalidDenominator(1u32.checked_shl(denominator_log2 as u32).unwrap_or(0))
        );
        Ok(TimeSignature {
            numerator,
            denominator_log2,
            ticks_per_click,
            thirty_seconds_per_quarter,
        })
    }

    #[inline]
    pub fn numerator(&self) -> u8 {
        self.numerator
    }

    /// The musical denominator, eg. `4` for 3/4.
    #[inline]
    pub fn denominator(&self) -> u32 {
        1 << self.denominator_log2
    }

    #[inline]
    pub fn denominator_log2(&self) -> u8 {
        self.denominator_log2
    }

    /// MIDI clocks per metronome click.
    #[inline]
    pub fn ticks_per_click(&self) -> u8 {
        self.ticks_per_click
    }

    #[inline]
    pub fn thirty_seconds_per_quarter(&self) -> u8 {
        self.thirty_seconds_per_quarter
    }

    pub(crate) fn encode(&self) -> [u8; 4] {
        [
            self.numerator,
            self.denominator_log2,
            self.ticks_per_click,
            self.thirty_seconds_per_quarter,
        ]
    }

    fn decode(data: &[u8]) -> Result<TimeSignature> {
        let [num, log2, clicks, thirty_seconds] = fixed::<4>(data)?;
        TimeSignature::from_log2(num, log2, clicks, thirty_seconds)
    }
}

pub(crate) fn denominator_to_log2(denominator: u32) -> Result<u8> {
    match denominator {
        2 | 4 | 8 | 16 | 32 => Ok(denominator.trailing_zeros() as u8),
        _ => Err(Error::InvalidDenominator(denominator)),
    }
}

/// Sharps (positive) or flats (negative) of each major key, indexed by pitch class.
///
/// Gb major is spelled as its enharmonic F# major (6 sharps), so the representable range is
/// `-5..=6`.
const MAJOR_SHARPS_FLATS: [i8; 12] = [0, -5, 2, -3, 4, -1, 6, 1, -4, 3, -2, 5];

/// Inverse of `MAJOR_SHARPS_FLATS`, indexed by `sharps_flats + 5`.
const MAJOR_BY_SHARPS_FLATS: [Tonic; 12] = [
    Tonic::Db,
    Tonic::Ab,
    Tonic::Eb,
    Tonic::Bb,
    Tonic::F,
    Tonic::C,
    Tonic::G,
    Tonic::D,
    Tonic::A,
    Tonic::E,
    Tonic::B,
    Tonic::Gb,
];

impl KeySignature {
    /// The signed sharps/flats count and the mode byte of this key, as stored in the `0x59` meta
    /// event.
    pub fn to_sharps_flats(&self) -> (i8, u8) {
        let major = self.relative_major();
        (
            MAJOR_SHARPS_FLATS[major.pitch_class() as usize],
            self.scale.into(),
        )
    }

    /// Look up the key for a sharps/flats count and a mode byte.
    ///
    /// Fails with `Error::InvalidKeySignature` if `sharps_flats` is outside `-5..=6` or the mode
    /// is neither `0` (major) nor `1` (minor).
    pub fn from_sharps_flats(sharps_flats: i8, mode: u8) -> Result<KeySignature> {
        let invalid = Error::InvalidKeySignature { sharps_flats, mode };
        let scale = Scale::try_from(mode).map_err(|_| invalid.clone())?;
        let major = usize::try_from(sharps_flats as i16 + 5)
            .ok()
            .and_then(|idx| MAJOR_BY_SHARPS_FLATS.get(idx))
            .copied()
            .ok_or(invalid)?;
        let tonic = match scale {
            Scale::Major => major,
            Scale::Minor => Tonic::from_pitch_class(major.pitch_class() as i32 - 3),
        };
        Ok(KeySignature::new(tonic, scale))
    }

    pub(crate) fn encode(&self) -> [u8; 2] {
        let (sharps_flats, mode) = self.to_sharps_flats();
        [sharps_flats as u8, mode]
    }

    fn decode(data: &[u8]) -> Result<KeySignature> {
        let [sharps_flats, mode] = fixed::<2>(data)?;
        KeySignature::from_sharps_flats(sharps_flats as i8, mode)
    }
}

/// Split a fixed-size payload out of meta event data.
fn fixed<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    match data.len() {
        len if len < N => Err(Error::TruncatedData("meta event payload too short")),
        len if len > N => Err(Error::MalformedChunk("meta event payload too long")),
        _ => {
            let mut out = [0; N];
            out.copy_from_slice(data);
            Ok(out)
        }
    }
}

/// A typed meta message.
///
/// These events carry metadata about the track rather than playable notes.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MetaMessage {
    /// Usually appears at the beginning of a track, before any notes are sent, but there are no
    /// guarantees.
    Tempo { tempo: Tempo, delta: u28 },
    TimeSignature { signature: TimeSignature, delta: u28 },
    KeySignature { key: KeySignature, delta: u28 },
}
impl MetaMessage {
    /// Ticks since the previous message in the stream.
    #[inline]
    pub fn delta(&self) -> u28 {
        match *self {
            MetaMessage::Tempo { delta, .. }
            | MetaMessage::TimeSignature { delta, .. }
            | MetaMessage::KeySignature { delta, .. } => delta,
        }
    }

    /// The same message, fired `delta` ticks after the previous one.
    pub fn with_delta(self, delta: u28) -> MetaMessage {
        match self {
            MetaMessage::Tempo { tempo, .. } => MetaMessage::Tempo { tempo, delta },
            MetaMessage::TimeSignature { signature, .. } => {
                MetaMessage::TimeSignature { signature, delta }
            }
            MetaMessage::KeySignature { key, .. } => MetaMessage::KeySignature { key, delta },
        }
    }

    #[inline]
    pub fn meta_type(&self) -> MetaType {
        match self {
            MetaMessage::Tempo { .. } => MetaType::Tempo,
            MetaMessage::TimeSignature { .. } => MetaType::TimeSignature,
            MetaMessage::KeySignature { .. } => MetaType::KeySignature,
        }
    }

    /// The generic byte-level form of this message.
    pub fn to_raw(&self) -> RawMetaMessage {
        let data = match self {
            MetaMessage::Tempo { tempo, .. } => tempo.encode().to_vec(),
            MetaMessage::TimeSignature { signature, .. } => signature.encode().to_vec(),
            MetaMessage::KeySignature { key, .. } => key.encode().to_vec(),
        };
        RawMetaMessage {
            type_code: self.meta_type().into(),
            data,
            delta: self.delta(),
        }
    }
}
impl TryFrom<&RawMetaMessage> for MetaMessage {
    type Error = Error;
    fn try_from(raw: &RawMetaMessage) -> Result<MetaMessage> {
        let delta = raw.delta;
        Ok(match MetaType::try_from(raw.type_code) {
            Ok(MetaType::Tempo) => MetaMessage::Tempo {
                tempo: Tempo::decode(&raw.data)?,
                delta,
            },
            Ok(MetaType::TimeSignature) => MetaMessage::TimeSignature {
                signature: TimeSignature::decode(&raw.data)?,
                delta,
            },
            Ok(MetaType::KeySignature) => MetaMessage::KeySignature {
                key: KeySignature::decode(&raw.data)?,
                delta,
            },
            Ok(MetaType::EndOfTrack) | Err(_) => {
                bail!(Error::UnrecognizedMetaType(raw.type_code))
            }
        })
    }
}
impl From<&MetaMessage> for RawMetaMessage {
    fn from(meta: &MetaMessage) -> RawMetaMessage {
        meta.to_raw()
    }
}

/// A meta message in its generic byte-level form: a type code plus an opaque payload.
///
/// This is the intermediate representation between the wire bytes and a typed
/// [`MetaMessage`](enum.MetaMessage.html).
/// Meta events without a typed form (track names, lyrics, ...) are kept in this form so that
/// they survive a decode/encode cycle byte for byte.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct RawMetaMessage {
    pub type_code: u8,
    pub data: Vec<u8>,
    pub delta: u28,
}
impl RawMetaMessage {
    pub fn new(type_code: u8, data: Vec<u8>, delta: u28) -> RawMetaMessage {
        RawMetaMessage {
            type_code,
            data,
            delta,
        }
    }

    /// The End-of-Track marker.
    pub fn end_of_track(delta: u28) -> RawMetaMessage {
        RawMetaMessage::new(MetaType::EndOfTrack.into(), Vec::new(), delta)
    }

    #[inline]
    pub fn is_end_of_track(&self) -> bool {
        self.type_code == u8::from(MetaType::EndOfTrack)
    }

    /// Read the part of a meta event after its `0xFF` status.
    pub(crate) fn read(raw: &mut &[u8], delta: u28) -> Result<RawMetaMessage> {
        let type_code = u8::read(raw)?;
        let data = read_varlen_slice(raw)?;
        Ok(RawMetaMessage::new(type_code, data.to_vec(), delta))
    }

    /// Write the status, type code, length and payload of this meta event.
    pub(crate) fn write<W: Write>(&self, out: &mut W) -> WriteResult<W> {
        out.write(&[0xFF, self.type_code])?;
        write_varlen_slice(&self.data, out)
    }

    /// The wire-level form: status `0xFF`, then the type code, the VLQ length and the payload.
    pub fn to_message(&self) -> StdResult<RawMessage, &'static str> {
        let mut data = Vec::with_capacity(self.data.len() + 5);
        data.push(self.type_code);
        write_varlen_slice(&self.data, &mut data)?;
        Ok(RawMessage {
            status: 0xFF,
            data,
            delta: self.delta,
        })
    }
}
impl TryFrom<&RawMessage> for RawMetaMessage {
    type Error = Error;
    fn try_from(msg: &RawMessage) -> Result<RawMetaMessage> {
        ensure!(msg.status == 0xFF, Error::UnrecognizedStatus(msg.status));
        let mut raw = &msg.data[..];
        let meta = RawMetaMessage::read(&mut raw, msg.delta)?;
        ensure!(
            raw.is_empty(),
            Error::MalformedChunk("trailing bytes after meta event payload")
        );
        Ok(meta)
    }
}
