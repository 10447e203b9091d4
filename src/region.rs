//! The note interval view of a span of musical time.
//!
//! A flat message stream tells when keys go down and when they come back up.
//! A [`Region`](struct.Region.html) pairs those events into [`TimedNote`](struct.TimedNote.html)s
//! so that whole notes can be moved around, and flattens them back into messages afterwards.

use crate::{
    event::{ChannelMessage, Message},
    note::Note,
    prelude::*,
    stream::MetaState,
};
use std::collections::{BTreeMap, HashMap};

/// A note with an absolute start and end tick.
///
/// A `None` start means the note was already sounding when the observed window began, and a
/// `None` end means it has not been released yet.
/// When both are present, `start <= end`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct TimedNote {
    note: Note,
    start: Option<i64>,
    end: Option<i64>,
}
impl TimedNote {
    /// Fails with `Error::InvalidFieldRange` if the note ends before it starts.
    pub fn new(note: Note, start: Option<i64>, end: Option<i64>) -> Result<TimedNote> {
        if let (Some(start), Some(end)) = (start, end) {
            ensure!(start <= end, Error::field("end", end));
        }
        Ok(TimedNote { note, start, end })
    }

    #[inline]
    pub fn note(&self) -> &Note {
        &self.note
    }

    /// Transforms rewrite notes in place through this.
    #[inline]
    pub fn note_mut(&mut self) -> &mut Note {
        &mut self.note
    }

    #[inline]
    pub fn start(&self) -> Option<i64> {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Option<i64> {
        self.end
    }

    /// Whether this note sounds at tick `t`, bounds included.
    ///
    /// A missing start extends to minus infinity and a missing end to plus infinity.
    pub fn is_on_at(&self, t: i64) -> bool {
        self.start.map_or(true, |start| start <= t) && self.end.map_or(true, |end| t <= end)
    }
}

/// An ordered collection of `TimedNote`s paired with the `MetaState` in effect.
///
/// Notes are kept sorted by start tick, notes without a start first.
/// Notes sharing a start keep the order they were added in.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Region {
    notes: Vec<TimedNote>,
    state: MetaState,
}
impl Region {
    /// Build a region, sorting `notes` by start tick.
    pub fn new(mut notes: Vec<TimedNote>, state: MetaState) -> Region {
        //`None < Some(_)`, and the sort is stable
        notes.sort_by_key(|note| note.start);
        Region { notes, state }
    }

    pub fn empty(state: MetaState) -> Region {
        Region {
            notes: Vec::new(),
            state,
        }
    }

    #[inline]
    pub fn notes(&self) -> &[TimedNote] {
        &self.notes
    }

    pub fn into_notes(self) -> Vec<TimedNote> {
        self.notes
    }

    #[inline]
    pub fn state(&self) -> &MetaState {
        &self.state
    }

    /// Replace the musical state wholesale.
    #[inline]
    pub fn set_state(&mut self, state: MetaState) {
        self.state = state;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimedNote> {
        self.notes.iter()
    }

    /// Notes can be rewritten in place, but their timing cannot, which keeps the order intact.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Note> {
        self.notes.iter_mut().map(TimedNote::note_mut)
    }

    /// Insert a note at its sorted position, after any note with the same start.
    pub fn insert(&mut self, note: TimedNote) {
        let idx = self.notes.partition_point(|other| other.start <= note.start);
        self.notes.insert(idx, note);
    }

    /// Remove the first note equal to `note`, returning whether there was one.
    pub fn remove(&mut self, note: &TimedNote) -> bool {
        match self.notes.iter().position(|other| other == note) {
            Some(idx) => {
                self.notes.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, note: &TimedNote) -> bool {
        self.notes.contains(note)
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    /// Every note sounding at tick `t`, bounds included.
    pub fn notes_on_at(&self, t: i64) -> Vec<&TimedNote> {
        self.notes.iter().filter(|note| note.is_on_at(t)).collect()
    }
}
impl IntoIterator for Region {
    type Item = TimedNote;
    type IntoIter = std::vec::IntoIter<TimedNote>;
    fn into_iter(self) -> Self::IntoIter {
        self.notes.into_iter()
    }
}
impl<'a> IntoIterator for &'a Region {
    type Item = &'a TimedNote;
    type IntoIter = std::slice::Iter<'a, TimedNote>;
    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}

/// Merge the notes of several regions under one shared state.
///
/// The concatenated notes go through `Region::new`, so the result is sorted by start tick, with
/// notes of earlier regions first among equal starts.
pub fn combine_regions(regions: impl IntoIterator<Item = Region>, state: MetaState) -> Region {
    let notes = regions.into_iter().flat_map(Region::into_notes).collect();
    Region::new(notes, state)
}

/// Pair the Note-On and Note-Off events of a delta-timed message stream into a `Region`.
///
/// Ticks are counted from the start of `messages`.
/// Meta messages move the running tick like any other message and fold into the region's
/// state, which starts out as `state`.
///
/// Only one open note per pitch is tracked: a Note-On for a pitch that is already sounding
/// takes over the pitch, and the earlier note is left without an end.
pub fn messages_to_region(messages: &[Message], state: MetaState) -> Region {
    let mut notes: Vec<TimedNote> = Vec::with_capacity(messages.len());
    let mut open: HashMap<u7, usize> = HashMap::new();
    let mut state = state;
    let mut tick: i64 = 0;
    for msg in messages {
        tick += msg.delta().as_int() as i64;
        match msg {
            Message::Channel(ChannelMessage::NoteOn { note, .. }) => {
                if let Some(prev) = open.insert(note.pitch(), notes.len()) {
                    tracing::debug!(
                        pitch = note.pitch().as_int(),
                        tick,
                        previous_start = ?notes[prev].start,
                        "note retriggered before release, previous note left open"
                    );
                }
                notes.push(TimedNote {
                    note: *note,
                    start: Some(tick),
                    end: None,
                });
            }
            Message::Channel(ChannelMessage::NoteOff { note, .. }) => {
                match open.remove(&note.pitch()) {
                    Some(idx) => notes[idx].end = Some(tick),
                    None => notes.push(TimedNote {
                        note: *note,
                        start: None,
                        end: Some(tick),
                    }),
                }
            }
            Message::Channel(ChannelMessage::TimingTick { .. }) => {}
            Message::Meta(meta) => state = state.apply(meta),
            Message::RawMeta(_) => {}
        }
    }
    Region::new(notes, state)
}

/// Flatten a `Region` back into a delta-timed message stream.
///
/// At each instant Note-Ons come before Note-Offs, each group in region order, except that a note
/// released on the same pitch another note starts on is released first, so repeated notes pair
/// up again when the messages are read back.
/// Only the first message of an instant carries the distance to the previous instant, so the
/// running sum of deltas lands exactly on every start and end tick.
/// Ticks are counted from 0, which is where the first delta is measured from.
///
/// Fails with `Error::TransformApplication` if a note lies before tick 0 or two consecutive
/// instants are too far apart for a delta time.
pub fn region_to_messages(region: &Region) -> Result<(Vec<ChannelMessage>, MetaState)> {
    //Offs remember whether their note also starts at the same instant
    let mut instants: BTreeMap<i64, (Vec<Note>, Vec<(Note, bool)>)> = BTreeMap::new();
    for timed in region {
        if let Some(start) = timed.start {
            instants.entry(start).or_default().0.push(timed.note);
        }
        if let Some(end) = timed.end {
            let zero_length = timed.start == Some(end);
            instants
                .entry(end)
                .or_default()
                .1
                .push((timed.note, zero_length));
        }
    }

    let mut messages = Vec::with_capacity(region.len() * 2);
    let mut last_event: i64 = 0;
    for (instant, (ons, offs)) in instants {
        let delta = u32::try_from(instant - last_event)
            .ok()
            .and_then(u28::try_from)
            .ok_or_else(|| {
                Error::transform(
                    "region_to_messages",
                    format!("no delta time leads from tick {} to {}", last_event, instant),
                )
            })?;
        let (released, held): (Vec<_>, Vec<_>) =
            offs.into_iter().partition(|&(note, zero_length)| {
                !zero_length && ons.iter().any(|on| on.pitch() == note.pitch())
            });
        let ordered = released
            .into_iter()
            .map(|(note, _)| (false, note))
            .chain(ons.into_iter().map(|note| (true, note)))
            .chain(held.into_iter().map(|(note, _)| (false, note)));
        let mut delta = delta;
        for (is_on, note) in ordered {
            messages.push(if is_on {
                ChannelMessage::NoteOn { note, delta }
            } else {
                ChannelMessage::NoteOff { note, delta }
            });
            delta = u28::new(0);
        }
        last_event = instant;
    }
    Ok((messages, region.state))
}
