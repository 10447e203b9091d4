//! All sort of messages and their parsers.

use crate::{
    meta::{MetaMessage, MetaType, RawMetaMessage},
    note::Note,
    prelude::*,
};

/// A message carrying musical data.
///
/// Every message carries a delta time: how many MIDI ticks after the previous message in the
/// stream it should fire.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ChannelMessage {
    /// Start playing a note.
    ///
    /// Note that by convention a `NoteOn` message with a velocity of 0 is equivalent to a
    /// `NoteOff`, but it is kept as a `NoteOn` here.
    NoteOn { note: Note, delta: u28 },
    /// Stop playing a note.
    NoteOff { note: Note, delta: u28 },
    /// A MIDI timing clock pulse.
    TimingTick { delta: u28 },
}
impl ChannelMessage {
    #[inline]
    pub fn delta(&self) -> u28 {
        match *self {
            ChannelMessage::NoteOn { delta, .. }
            | ChannelMessage::NoteOff { delta, .. }
            | ChannelMessage::TimingTick { delta } => delta,
        }
    }

    /// The same message, fired `delta` ticks after the previous one.
    pub fn with_delta(self, delta: u28) -> ChannelMessage {
        match self {
            ChannelMessage::NoteOn { note, .. } => ChannelMessage::NoteOn { note, delta },
            ChannelMessage::NoteOff { note, .. } => ChannelMessage::NoteOff { note, delta },
            ChannelMessage::TimingTick { .. } => ChannelMessage::TimingTick { delta },
        }
    }

    /// The note this message starts or stops, if any.
    #[inline]
    pub fn note(&self) -> Option<Note> {
        match *self {
            ChannelMessage::NoteOn { note, .. } | ChannelMessage::NoteOff { note, .. } => {
                Some(note)
            }
            ChannelMessage::TimingTick { .. } => None,
        }
    }

    /// The raw status byte of this message.
    pub fn status(&self) -> u8 {
        match self {
            ChannelMessage::NoteOff { note, .. } => 0x80 | note.channel().as_int(),
            ChannelMessage::NoteOn { note, .. } => 0x90 | note.channel().as_int(),
            ChannelMessage::TimingTick { .. } => 0xF8,
        }
    }

    /// The wire-level form of this message.
    pub fn to_raw(&self) -> RawMessage {
        let data = match self.note() {
            Some(note) => vec![note.pitch().as_int(), note.velocity().as_int()],
            None => Vec::new(),
        };
        RawMessage {
            status: self.status(),
            data,
            delta: self.delta(),
        }
    }

    /// Decode the data bytes following `status`.
    fn read(status: u8, raw: &mut &[u8], delta: u28) -> Result<ChannelMessage> {
        let mut note = || -> Result<Note> {
            let pitch = u7::read(raw)?;
            let velocity = u7::read(raw)?;
            Ok(Note::from_parts(u4::new(status), pitch, velocity))
        };
        Ok(match status {
            0x80..=0x8F => ChannelMessage::NoteOff {
                note: note()?,
                delta,
            },
            0x90..=0x9F => ChannelMessage::NoteOn {
                note: note()?,
                delta,
            },
            0xF8 => ChannelMessage::TimingTick { delta },
            _ => bail!(Error::UnrecognizedStatus(status)),
        })
    }

    fn write<W: Write>(&self, out: &mut W) -> WriteResult<W> {
        out.write(&[self.status()])?;
        if let Some(note) = self.note() {
            out.write(&[note.pitch().as_int(), note.velocity().as_int()])?;
        }
        Ok(())
    }
}
impl From<&ChannelMessage> for RawMessage {
    fn from(msg: &ChannelMessage) -> RawMessage {
        msg.to_raw()
    }
}
impl TryFrom<&RawMessage> for ChannelMessage {
    type Error = Error;
    fn try_from(msg: &RawMessage) -> Result<ChannelMessage> {
        let mut raw = &msg.data[..];
        let parsed = ChannelMessage::read(msg.status, &mut raw, msg.delta)?;
        ensure!(
            raw.is_empty(),
            Error::MalformedChunk("trailing bytes after channel message")
        );
        Ok(parsed)
    }
}

/// A MIDI message as found on the wire: a status byte followed by its data bytes.
///
/// For meta events the data starts with the meta type code and the VLQ payload length.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct RawMessage {
    pub status: u8,
    pub data: Vec<u8>,
    pub delta: u28,
}

/// Any message that can appear in a decoded track.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub enum Message {
    Channel(ChannelMessage),
    Meta(MetaMessage),
    /// A meta event without a typed representation, kept as-is.
    ///
    /// Only produced when the `strict` feature is disabled.
    RawMeta(RawMetaMessage),
}
impl Message {
    #[inline]
    pub fn delta(&self) -> u28 {
        match self {
            Message::Channel(msg) => msg.delta(),
            Message::Meta(msg) => msg.delta(),
            Message::RawMeta(msg) => msg.delta,
        }
    }

    /// The same message, fired `delta` ticks after the previous one.
    pub fn with_delta(self, delta: u28) -> Message {
        match self {
            Message::Channel(msg) => Message::Channel(msg.with_delta(delta)),
            Message::Meta(msg) => Message::Meta(msg.with_delta(delta)),
            Message::RawMeta(msg) => Message::RawMeta(RawMetaMessage { delta, ..msg }),
        }
    }

    /// The channel message inside, if this is one.
    #[inline]
    pub fn as_channel(&self) -> Option<&ChannelMessage> {
        match self {
            Message::Channel(msg) => Some(msg),
            _ => None,
        }
    }

    pub(crate) fn is_end_of_track(&self) -> bool {
        matches!(self, Message::RawMeta(meta) if meta.is_end_of_track())
    }

    /// Advances the slice and updates `running_status`.
    ///
    /// In case of failure the slice might be left in the middle of an event!
    pub(crate) fn read(raw: &mut &[u8], running_status: &mut Option<u8>) -> Result<Message> {
        let delta = u28::read_u7(raw)?;
        //Read status
        let mut status = *raw
            .first()
            .ok_or(Error::TruncatedData("failed to read status"))?;
        if status < 0x80 {
            //Running status!
            status = running_status.ok_or(Error::UnrecognizedStatus(status))?;
        } else {
            *raw = &raw[1..];
        }
        //Delegate further parsing depending on status
        Ok(match status {
            0x80..=0x9F => {
                *running_status = Some(status);
                Message::Channel(ChannelMessage::read(status, raw, delta)?)
            }
            0xF8 => {
                *running_status = None;
                Message::Channel(ChannelMessage::TimingTick { delta })
            }
            0xFF => {
                *running_status = None;
                let meta = RawMetaMessage::read(raw, delta)?;
                match MetaType::try_from(meta.type_code) {
                    Ok(MetaType::EndOfTrack) => Message::RawMeta(meta),
                    Ok(_) => Message::Meta(MetaMessage::try_from(&meta)?),
                    Err(_) => {
                        if cfg!(feature = "strict") {
                            bail!(Error::UnrecognizedMetaType(meta.type_code));
                        }
                        tracing::debug!(
                            type_code = meta.type_code,
                            len = meta.data.len(),
                            "keeping unknown meta event opaque"
                        );
                        Message::RawMeta(meta)
                    }
                }
            }
            _ => bail!(Error::UnrecognizedStatus(status)),
        })
    }

    /// Writes a single event to the given output writer.
    ///
    /// Statuses are always written explicitly, running status is only understood when reading.
    pub(crate) fn write<W: Write>(&self, out: &mut W) -> WriteResult<W> {
        self.delta().write_varlen(out)?;
        match self {
            Message::Channel(msg) => msg.write(out),
            Message::Meta(msg) => msg.to_raw().write(out),
            Message::RawMeta(msg) => msg.write(out),
        }
    }
}
impl From<ChannelMessage> for Message {
    fn from(msg: ChannelMessage) -> Message {
        Message::Channel(msg)
    }
}
impl From<MetaMessage> for Message {
    fn from(msg: MetaMessage) -> Message {
        Message::Meta(msg)
    }
}
impl From<RawMetaMessage> for Message {
    fn from(msg: RawMetaMessage) -> Message {
        Message::RawMeta(msg)
    }
}
