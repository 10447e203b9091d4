//! Windowed playback of a whole message list.

use crate::{
    event::Message,
    prelude::*,
    primitive::{Format, Timing},
    region::{messages_to_region, Region},
    smf::{Header, Smf},
    stream::{MetaMidiStream, MetaState, DEFAULT_TICKS_PER_BEAT},
};

/// Messages handed to the stream per `push_next_buffer` call when no size is given.
pub const DEFAULT_BUFFER_SIZE: usize = 32;

/// A full message list played back through a `MetaMidiStream`, one window at a time.
///
/// Every `push_next_buffer` call slices the next `buffer_size` messages off the play head and
/// pushes them through the stream.
/// The last window may be shorter, and marks the end of the file.
#[derive(Debug)]
pub struct MidiFile {
    stream: MetaMidiStream,
    messages: Vec<Message>,
    initial_state: MetaState,
    play_head: usize,
    buffer_size: usize,
    end_of_file: bool,
}
impl MidiFile {
    /// Fails with `Error::InvalidFieldRange` if `buffer_size` is 0.
    pub fn new(
        messages: Vec<Message>,
        buffer_size: usize,
        stream: MetaMidiStream,
    ) -> Result<MidiFile> {
        ensure!(
            buffer_size > 0,
            Error::field("buffer_size", buffer_size as i64)
        );
        Ok(MidiFile {
            initial_state: stream.meta_state(),
            stream,
            messages,
            play_head: 0,
            buffer_size,
            end_of_file: false,
        })
    }

    /// Decode a Standard Midi File and prepare it for playback.
    ///
    /// All tracks are merged into a single list, see `Smf::merged`.
    /// Files with timecode timing have no notion of beats, and are played at
    /// `DEFAULT_TICKS_PER_BEAT` instead.
    pub fn parse(raw: &[u8], buffer_size: usize) -> Result<MidiFile> {
        let smf = Smf::parse(raw)?;
        let ticks_per_beat = match smf.ticks_per_beat() {
            Some(tpb) => tpb as u32,
            None => {
                tracing::warn!(
                    timing = ?smf.header.timing,
                    fallback = DEFAULT_TICKS_PER_BEAT,
                    "timecode timing has no ticks per beat, using the default"
                );
                DEFAULT_TICKS_PER_BEAT
            }
        };
        let stream = MetaMidiStream::new(ticks_per_beat, MetaState::default())?;
        MidiFile::new(smf.merged(), buffer_size, stream)
    }

    /// Push the next window of messages through the stream.
    ///
    /// Once the end of the file was reached this does nothing until `reset` is called or more
    /// messages are added.
    /// If the stream rejects the window the play head stays where it was.
    pub fn push_next_buffer(&mut self) -> Result<()> {
        if self.end_of_file {
            return Ok(());
        }
        let end = self
            .play_head
            .saturating_add(self.buffer_size)
            .min(self.messages.len());
        self.stream
            .push_buffer(&self.messages[self.play_head..end])?;
        self.play_head = end;
        if self.play_head == self.messages.len() {
            self.end_of_file = true;
            tracing::debug!(messages = self.messages.len(), "reached end of file");
        }
        Ok(())
    }

    /// Rewind to the first message, restoring the state the file started with.
    pub fn reset(&mut self) {
        self.play_head = 0;
        self.end_of_file = false;
        self.stream.set_meta_state(self.initial_state);
    }

    /// Append a message to the end of the list.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.refresh_end_of_file();
    }

    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.refresh_end_of_file();
    }

    fn refresh_end_of_file(&mut self) {
        if self.play_head < self.messages.len() {
            self.end_of_file = false;
        }
    }

    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[inline]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Index of the next message to be pushed.
    #[inline]
    pub fn play_head(&self) -> usize {
        self.play_head
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline]
    pub fn end_of_file(&self) -> bool {
        self.end_of_file
    }

    #[inline]
    pub fn stream(&self) -> &MetaMidiStream {
        &self.stream
    }

    #[inline]
    pub fn stream_mut(&mut self) -> &mut MetaMidiStream {
        &mut self.stream
    }

    /// Dispatch everything pushed so far to the instruments.
    #[inline]
    pub fn update(&mut self) {
        self.stream.update();
    }

    /// The whole file as a single region, under the state the file started with.
    pub fn to_region(&self) -> Region {
        messages_to_region(&self.messages, self.initial_state)
    }

    /// The whole message list as a single-track Standard Midi File.
    ///
    /// Fails with `Error::InvalidFieldRange` if the stream's ticks per beat do not fit the
    /// 15 bits of a metrical header.
    pub fn to_smf(&self) -> Result<Smf> {
        let ticks_per_beat = self.stream.stream().state().clock().ticks_per_beat();
        let timing = Timing::Metrical(u15::check("ticks_per_beat", ticks_per_beat.into())?);
        Ok(Smf::new(
            Header::new(Format::SingleTrack, timing),
            vec![self.messages.clone()],
        ))
    }
}
