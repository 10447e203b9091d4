//! Clocked, buffered delivery of messages to instrument sinks.
//!
//! [`MidiStream`](struct.MidiStream.html) collects messages and hands the whole batch to every
//! registered [`Instrument`](trait.Instrument.html) on `update()`.
//! [`MetaMidiStream`](struct.MetaMidiStream.html) sits in front of it and runs each pushed window
//! through the region transforms first.

use crate::{
    event::{ChannelMessage, Message},
    meta::{denominator_to_log2, MetaMessage, Tempo},
    note::KeySignature,
    prelude::*,
    region::{messages_to_region, region_to_messages},
    transform::{Transform, TransformPipeline},
};
use std::{
    cell::Cell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

/// Ticks per beat of a stream built without an explicit value.
pub const DEFAULT_TICKS_PER_BEAT: u32 = 48;

/// The musical parameters in effect at some point of a stream.
///
/// This is a small `Copy` value: it is replaced, never mutated behind a reader's back.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct MetaState {
    beats_per_measure: u8,
    subdivision: u8,
    tempo: Tempo,
    key: KeySignature,
}
impl MetaState {
    /// `denominator` is the musical one (eg. `8` for 6/8) and must be one of 2, 4, 8, 16 or 32.
    pub fn new(
        beats_per_measure: u8,
        denominator: u32,
        bpm: f64,
        key: KeySignature,
    ) -> Result<MetaState> {
        ensure!(
            beats_per_measure > 0,
            Error::field("beats_per_measure", beats_per_measure)
        );
        Ok(MetaState {
            beats_per_measure,
            subdivision: denominator_to_log2(denominator)?,
            tempo: Tempo::from_bpm(bpm)?,
            key,
        })
    }

    #[inline]
    pub fn beats_per_measure(&self) -> u8 {
        self.beats_per_measure
    }

    /// Base-2 logarithm of the time signature denominator.
    #[inline]
    pub fn subdivision(&self) -> u8 {
        self.subdivision
    }

    #[inline]
    pub fn denominator(&self) -> u32 {
        1 << self.subdivision
    }

    #[inline]
    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    #[inline]
    pub fn bpm(&self) -> f64 {
        self.tempo.bpm()
    }

    #[inline]
    pub fn key(&self) -> KeySignature {
        self.key
    }

    pub fn with_key(self, key: KeySignature) -> MetaState {
        MetaState { key, ..self }
    }

    pub fn with_tempo(self, tempo: Tempo) -> MetaState {
        MetaState { tempo, ..self }
    }

    /// The state after `meta` takes effect.
    pub fn apply(self, meta: &MetaMessage) -> MetaState {
        match *meta {
            MetaMessage::Tempo { tempo, .. } => self.with_tempo(tempo),
            MetaMessage::TimeSignature { signature, .. } => MetaState {
                beats_per_measure: signature.numerator().max(1),
                subdivision: signature.denominator_log2(),
                ..self
            },
            MetaMessage::KeySignature { key, .. } => self.with_key(key),
        }
    }
}
impl Default for MetaState {
    /// 4/4 at 120 BPM in C major.
    fn default() -> MetaState {
        MetaState {
            beats_per_measure: 4,
            subdivision: 2,
            tempo: Tempo::DEFAULT,
            key: KeySignature::default(),
        }
    }
}

/// A tick counter that only moves forward.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MidiClock {
    ticks_per_beat: u32,
    current_tick: i64,
}
impl MidiClock {
    /// Fails with `Error::InvalidFieldRange` if `ticks_per_beat` is 0.
    pub fn new(ticks_per_beat: u32) -> Result<MidiClock> {
        ensure!(
            ticks_per_beat > 0,
            Error::field("ticks_per_beat", ticks_per_beat)
        );
        Ok(MidiClock {
            ticks_per_beat,
            current_tick: 0,
        })
    }

    /// Move the clock `amount` ticks forward.
    ///
    /// Fails with `Error::InvalidFieldRange` if `amount` is negative or would overflow the tick
    /// counter, leaving the clock as it was.
    pub fn advance(&mut self, amount: i64) -> Result<()> {
        ensure!(amount >= 0, Error::field("amount", amount));
        self.current_tick = self
            .current_tick
            .checked_add(amount)
            .ok_or_else(|| Error::field("amount", amount))?;
        Ok(())
    }

    #[inline]
    pub fn ticks_per_beat(&self) -> u32 {
        self.ticks_per_beat
    }

    #[inline]
    pub fn current_tick(&self) -> i64 {
        self.current_tick
    }

    /// The current position in beats, fractional.
    #[inline]
    pub fn current_beat(&self) -> f64 {
        self.current_tick as f64 / self.ticks_per_beat as f64
    }

    /// The tick a beat position falls on, rounded down.
    #[inline]
    pub fn beat_to_tick(&self, beat: f64) -> i64 {
        (beat * self.ticks_per_beat as f64).floor() as i64
    }
}
impl Default for MidiClock {
    fn default() -> MidiClock {
        MidiClock {
            ticks_per_beat: DEFAULT_TICKS_PER_BEAT,
            current_tick: 0,
        }
    }
}

/// The clock of a stream plus the pitches sounding after its last dispatch.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct MidiStreamState {
    clock: MidiClock,
    notes_on: BTreeSet<u7>,
}
impl MidiStreamState {
    pub fn new(ticks_per_beat: u32) -> Result<MidiStreamState> {
        Ok(MidiStreamState {
            clock: MidiClock::new(ticks_per_beat)?,
            notes_on: BTreeSet::new(),
        })
    }

    #[inline]
    pub fn clock(&self) -> &MidiClock {
        &self.clock
    }

    /// The clock is advanced by whoever drives playback.
    #[inline]
    pub fn clock_mut(&mut self) -> &mut MidiClock {
        &mut self.clock
    }

    #[inline]
    pub fn notes_on(&self) -> &BTreeSet<u7> {
        &self.notes_on
    }

    #[inline]
    pub fn is_on(&self, pitch: u7) -> bool {
        self.notes_on.contains(&pitch)
    }

    fn track(&mut self, messages: &[ChannelMessage]) {
        for msg in messages {
            match *msg {
                ChannelMessage::NoteOn { note, .. } if note.velocity().as_int() > 0 => {
                    self.notes_on.insert(note.pitch());
                }
                ChannelMessage::NoteOn { note, .. } | ChannelMessage::NoteOff { note, .. } => {
                    self.notes_on.remove(&note.pitch());
                }
                ChannelMessage::TimingTick { .. } => {}
            }
        }
    }
}

/// A sink for dispatched message batches, typically a synthesizer.
///
/// Any `FnMut(&[ChannelMessage])` closure is an instrument.
pub trait Instrument {
    /// Called once per `MidiStream::update` with the whole dispatched batch.
    fn process_midi(&mut self, messages: &[ChannelMessage]);
}
impl<F: FnMut(&[ChannelMessage])> Instrument for F {
    fn process_midi(&mut self, messages: &[ChannelMessage]) {
        self(messages)
    }
}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies an instrument registered with a `MidiStream`.
///
/// Handles remember the stream that issued them, which is the stream the instrument is bound to.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct InstrumentHandle {
    stream: u64,
    slot: u64,
}
impl InstrumentHandle {
    /// Id of the stream this instrument is bound to.
    #[inline]
    pub fn stream_id(&self) -> u64 {
        self.stream
    }
}

/// Buffers messages and dispatches them to instruments in batches.
pub struct MidiStream {
    id: u64,
    state: MidiStreamState,
    instruments: BTreeMap<u64, Box<dyn Instrument>>,
    next_slot: u64,
    buffer: Vec<ChannelMessage>,
}
impl MidiStream {
    pub fn new(ticks_per_beat: u32) -> Result<MidiStream> {
        Ok(MidiStream::with_state(MidiStreamState::new(ticks_per_beat)?))
    }

    fn with_state(state: MidiStreamState) -> MidiStream {
        MidiStream {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            state,
            instruments: BTreeMap::new(),
            next_slot: 0,
            buffer: Vec::new(),
        }
    }

    /// Unique among the streams of this process.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn state(&self) -> &MidiStreamState {
        &self.state
    }

    #[inline]
    pub fn state_mut(&mut self) -> &mut MidiStreamState {
        &mut self.state
    }

    pub fn add_instrument(&mut self, instrument: impl Instrument + 'static) -> InstrumentHandle {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.instruments.insert(slot, Box::new(instrument));
        InstrumentHandle {
            stream: self.id,
            slot,
        }
    }

    /// Unregister an instrument, handing it back.
    ///
    /// Returns `None` if the handle was issued by another stream or was already removed.
    pub fn remove_instrument(&mut self, handle: InstrumentHandle) -> Option<Box<dyn Instrument>> {
        if handle.stream != self.id {
            return None;
        }
        self.instruments.remove(&handle.slot)
    }

    #[inline]
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    /// Queue messages for the next `update`, without dispatching them.
    pub fn push_buffer(&mut self, messages: &[ChannelMessage]) {
        self.buffer.extend_from_slice(messages);
    }

    /// Messages queued since the last `update`.
    #[inline]
    pub fn pending(&self) -> &[ChannelMessage] {
        &self.buffer
    }

    /// Hand the whole queued buffer to every instrument, then clear it.
    pub fn update(&mut self) {
        tracing::trace!(
            stream = self.id,
            messages = self.buffer.len(),
            instruments = self.instruments.len(),
            "dispatching buffer"
        );
        for instrument in self.instruments.values_mut() {
            instrument.process_midi(&self.buffer);
        }
        self.state.track(&self.buffer);
        self.buffer.clear();
    }
}
impl Default for MidiStream {
    fn default() -> MidiStream {
        MidiStream::with_state(MidiStreamState::default())
    }
}
impl fmt::Debug for MidiStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MidiStream")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("instruments", &self.instruments.len())
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// A read-only, always current view of a `MetaMidiStream`'s state.
#[derive(Clone, Debug)]
pub struct MetaStateWatch(Rc<Cell<MetaState>>);
impl MetaStateWatch {
    #[inline]
    pub fn get(&self) -> MetaState {
        self.0.get()
    }
}

/// A `MidiStream` fronted by an ordered list of region transforms.
pub struct MetaMidiStream {
    meta_state: Rc<Cell<MetaState>>,
    stream: MidiStream,
    transforms: TransformPipeline,
}
impl MetaMidiStream {
    pub fn new(ticks_per_beat: u32, meta_state: MetaState) -> Result<MetaMidiStream> {
        Ok(MetaMidiStream {
            meta_state: Rc::new(Cell::new(meta_state)),
            stream: MidiStream::new(ticks_per_beat)?,
            transforms: TransformPipeline::new(),
        })
    }

    #[inline]
    pub fn meta_state(&self) -> MetaState {
        self.meta_state.get()
    }

    pub fn set_meta_state(&mut self, meta_state: MetaState) {
        self.meta_state.set(meta_state);
    }

    /// A view of this stream's state that stays current across `push_buffer` calls.
    pub fn watch(&self) -> MetaStateWatch {
        MetaStateWatch(Rc::clone(&self.meta_state))
    }

    #[inline]
    pub fn stream(&self) -> &MidiStream {
        &self.stream
    }

    #[inline]
    pub fn stream_mut(&mut self) -> &mut MidiStream {
        &mut self.stream
    }

    #[inline]
    pub fn transforms(&self) -> &TransformPipeline {
        &self.transforms
    }

    #[inline]
    pub fn transforms_mut(&mut self) -> &mut TransformPipeline {
        &mut self.transforms
    }

    /// Append a transform to the end of the pipeline.
    pub fn add_transform(&mut self, transform: impl Transform + 'static) {
        self.transforms.push(transform);
    }

    /// Run a window of messages through the transforms and queue the result.
    ///
    /// The messages are paired into a region under the current state, transformed in pipeline
    /// order, flattened back and queued on the inner `MidiStream`.
    /// The state the region ends up with becomes the stream's new state.
    ///
    /// Each window is flattened on its own, starting at tick 0, so ticks after the last note event
    /// of a window are not carried over: trailing timing ticks and meta deltas are lost.
    ///
    /// On error nothing is queued and the state is left untouched.
    pub fn push_buffer(&mut self, messages: &[Message]) -> Result<()> {
        let region = messages_to_region(messages, self.meta_state.get());
        let region = self.transforms.apply(region).map_err(|err| {
            tracing::debug!(error = %err, "transform failed, dropping window");
            err
        })?;
        let (flat, meta_state) = region_to_messages(&region)?;
        tracing::trace!(
            messages_in = messages.len(),
            notes = region.len(),
            messages_out = flat.len(),
            "window transformed"
        );
        self.meta_state.set(meta_state);
        self.stream.push_buffer(&flat);
        Ok(())
    }

    /// Dispatch everything queued so far, see `MidiStream::update`.
    #[inline]
    pub fn update(&mut self) {
        self.stream.update();
    }
}
impl fmt::Debug for MetaMidiStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MetaMidiStream")
            .field("meta_state", &self.meta_state.get())
            .field("stream", &self.stream)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}
