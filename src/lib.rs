//! # Overview
//!
//! `midiweave` reads and writes Standard Midi Files (SMF) and rebuilds the *note interval* view
//! hidden inside a flat stream of Note-On/Note-Off events, so that musical transformations
//! (transposition, channel remapping, harmonization) can be applied to whole notes before the
//! result is flattened back into events and streamed to instrument sinks.
//!
//! Decoding a file is as simple as:
//!
//! ```rust
//! use midiweave::Smf;
//!
//! # let bytes = [
//! #     0x4D, 0x54, 0x68, 0x64, 0, 0, 0, 6, 0, 0, 0, 1, 0, 48,
//! #     0x4D, 0x54, 0x72, 0x6B, 0, 0, 0, 12,
//! #     0x00, 0x90, 60, 100, 0x18, 0x80, 60, 0, 0x00, 0xFF, 0x2F, 0x00,
//! # ];
//! let smf = Smf::parse(&bytes).unwrap();
//!
//! for (i, track) in smf.tracks.iter().enumerate() {
//!     println!("track {} has {} messages", i, track.len());
//! }
//! ```
//!
//! # Regions
//!
//! A [`Region`](struct.Region.html) is the interval view of a span of musical time: every
//! Note-On is paired with its Note-Off into a [`TimedNote`](struct.TimedNote.html) carrying an
//! absolute start and end tick.
//! Notes that were already sounding when the span began have no start, and notes that are still
//! sounding when it ends have no end.
//!
//! ```rust
//! use midiweave::{messages_to_region, region_to_messages, MetaState, Message, Note, ChannelMessage};
//! use midiweave::num::u28;
//!
//! let note = Note::new(0, 60, 100).unwrap();
//! let messages = [
//!     Message::Channel(ChannelMessage::NoteOn { note, delta: u28::new(0) }),
//!     Message::Channel(ChannelMessage::NoteOff { note, delta: u28::new(24) }),
//! ];
//! let region = messages_to_region(&messages, MetaState::default());
//! assert_eq!(region.notes()[0].start(), Some(0));
//! assert_eq!(region.notes()[0].end(), Some(24));
//!
//! let (flat, _state) = region_to_messages(&region).unwrap();
//! assert_eq!(flat.len(), 2);
//! ```
//!
//! # Streaming
//!
//! [`MetaMidiStream`](struct.MetaMidiStream.html) runs every pushed window of messages through
//! an ordered list of [`Transform`](trait.Transform.html)s and buffers the result inside a
//! [`MidiStream`](struct.MidiStream.html), which hands the whole buffer to every registered
//! instrument on `update()`.
//! [`MidiFile`](struct.MidiFile.html) slices a decoded file into fixed-size windows and feeds
//! them to its own `MetaMidiStream`.
//!
//! The pipeline is synchronous: nothing here spawns threads or keeps time.
//! Driving playback at wall-clock rate is left to the caller.
//!
//! # About features
//!
//! - The `parallel` feature
//!
//!   Decodes the track chunks of large multi-track files on the `rayon` thread pool.
//!   This feature is enabled by default.
//!
//! - The `strict` feature
//!
//!   By default `midiweave` keeps unknown meta events as opaque
//!   [`RawMetaMessage`](struct.RawMetaMessage.html)s and tolerates files whose header disagrees
//!   with their contents.
//!   By enabling the `strict` feature the parser rejects such SMF uncompliant files.

macro_rules! bail {
    ($err:expr) => {{
        return Err($err.into());
    }};
}
macro_rules! ensure {
    ($cond:expr, $err:expr) => {{
        if !$cond {
            bail!($err)
        }
    }};
}

/// All of the errors this crate produces.
mod error;

mod prelude {
    pub(crate) use crate::{
        error::{Error, Result, StdResult},
        io::{Write, WriteResult},
        primitive::{u15, u24, u28, u4, u7, IntRead, IntReadBottom7, SplitChecked},
    };
    pub(crate) use std::{convert::TryFrom, fmt, mem, ops};

    pub(crate) fn bit_range<T>(val: T, range: ops::Range<u32>) -> T
    where
        T: From<u8>
            + ops::Shr<u32, Output = T>
            + ops::Shl<u32, Output = T>
            + ops::Not<Output = T>
            + ops::BitAnd<Output = T>,
    {
        let mask = !((!T::from(0)) << (range.end - range.start));
        (val >> range.start) & mask
    }
}

mod event;
mod file;
pub mod io;
mod meta;
mod note;
mod primitive;
mod region;
mod smf;
mod stream;
mod transform;

pub use crate::{
    error::{Error, Result},
    event::{ChannelMessage, Message, RawMessage},
    file::{MidiFile, DEFAULT_BUFFER_SIZE},
    meta::{MetaMessage, MetaType, RawMetaMessage, Tempo, TimeSignature},
    note::{Interval, KeySignature, Note, Scale, Tonic},
    primitive::{Format, Fps, Timing},
    region::{combine_regions, messages_to_region, region_to_messages, Region, TimedNote},
    smf::{parse, write, EventIter, Header, Smf, TrackIter},
    stream::{
        Instrument, InstrumentHandle, MetaMidiStream, MetaState, MetaStateWatch, MidiClock,
        MidiStream, MidiStreamState, DEFAULT_TICKS_PER_BEAT,
    },
    transform::{
        HarmonizerTransform, KeySource, SetChannelTransform, Transform, TransformPipeline,
        TransposeTransform,
    },
};

/// Exotically-sized integers used by the MIDI standard.
pub mod num {
    pub use crate::primitive::{u15, u24, u28, u4, u7};
}

#[cfg(test)]
mod test;
