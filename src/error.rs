use thiserror::Error as ThisError;

/// Represents an error while decoding, constructing or transforming MIDI data.
///
/// Errors are raised at the point of detection and abort the whole operation: decoders never
/// return partially built values, and a failing transform aborts the enclosing
/// `MetaMidiStream::push_buffer` call before anything reaches an instrument.
///
/// Variants carrying a `&'static str` give a non-normative hint on what exact part of the MIDI
/// format was not respected.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum Error {
    /// A value passed to a constructor is outside the range of its field.
    #[error("{field} out of range: {value}")]
    InvalidFieldRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// A tempo that the 24-bit microseconds-per-beat field cannot represent.
    #[error("tempo of {0} bpm cannot be represented")]
    TempoOutOfRange(f64),

    /// A time signature denominator that is not one of 2, 4, 8, 16 or 32.
    #[error("invalid time signature denominator {0}")]
    InvalidDenominator(u32),

    /// A key signature whose sharps/flats count or mode byte has no tonic.
    #[error("invalid key signature: {sharps_flats} sharps/flats, mode {mode}")]
    InvalidKeySignature {
        /// Positive numbers count sharps, negative numbers count flats.
        sharps_flats: i8,
        /// `0` for major, `1` for minor.
        mode: u8,
    },

    /// Chunk framing or fixed-size payload could not be interpreted.
    #[error("malformed midi: {0}")]
    MalformedChunk(&'static str),

    /// The input ended in the middle of a structure.
    #[error("truncated midi: {0}")]
    TruncatedData(&'static str),

    /// A variable-length quantity longer than 4 bytes.
    #[error("variable-length quantity exceeds 28 bits")]
    VarlenOverflow,

    /// A status byte this codec does not understand.
    #[error("unrecognized status byte {0:#04X}")]
    UnrecognizedStatus(u8),

    /// A meta event type that has no typed representation.
    #[error("unrecognized meta event type {0:#04X}")]
    UnrecognizedMetaType(u8),

    /// A transform could not be applied to a region.
    #[error("transform `{transform}` failed: {reason}")]
    TransformApplication {
        /// Name of the failing transform.
        transform: &'static str,
        /// What went wrong.
        reason: String,
    },
}

impl Error {
    pub(crate) fn field(field: &'static str, value: impl Into<i64>) -> Error {
        Error::InvalidFieldRange {
            field,
            value: value.into(),
        }
    }

    pub(crate) fn transform(transform: &'static str, reason: impl Into<String>) -> Error {
        Error::TransformApplication {
            transform,
            reason: reason.into(),
        }
    }

    /// Whether this error was caused by a failed transform rather than by bad input data.
    #[inline]
    pub fn is_transform(&self) -> bool {
        matches!(self, Error::TransformApplication { .. })
    }
}

/// The result type used throughout the crate.
pub type Result<T> = StdResult<T, Error>;
pub(crate) use std::result::Result as StdResult;
