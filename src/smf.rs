//! Specific to the SMF packaging of MIDI streams.

use crate::{
    event::Message,
    meta::RawMetaMessage,
    prelude::*,
    primitive::{Format, Timing},
};
use std::{cmp::Reverse, collections::BinaryHeap};

/// Files smaller than this are always decoded on the calling thread.
#[cfg(feature = "parallel")]
const PARALLEL_ENABLE_THRESHOLD: usize = 3 * 1024;

/// A decoded Standard Midi File.
///
/// Each track is a list of messages whose deltas are relative to the previous message of the
/// same track.
/// The End-of-Track marker is implied: it is consumed when decoding and appended when encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Smf {
    pub header: Header,
    pub tracks: Vec<Vec<Message>>,
}
impl Smf {
    pub fn new(header: Header, tracks: Vec<Vec<Message>>) -> Smf {
        Smf { header, tracks }
    }

    /// Decode a whole file, track chunks included.
    pub fn parse(raw: &[u8]) -> Result<Smf> {
        let (header, tracks) = parse(raw)?;
        let track_count_hint = tracks.track_count_hint;
        let tracks = tracks.collect_tracks()?;
        validate_smf(&header, track_count_hint, tracks.len())?;
        tracing::debug!(
            format = ?header.format,
            timing = ?header.timing,
            tracks = tracks.len(),
            "decoded midi file"
        );
        Ok(Smf { header, tracks })
    }

    /// Encode this file into the given writer.
    pub fn write<W: Write>(&self, out: &mut W) -> WriteResult<W> {
        write(&self.header, self.tracks.iter(), out)
    }

    /// Encode this file into a fresh byte buffer.
    pub fn to_bytes(&self) -> StdResult<Vec<u8>, &'static str> {
        let mut out = Vec::with_capacity(8 * 1024);
        self.write(&mut out)?;
        Ok(out)
    }

    /// Ticks per beat, if the file uses metrical timing.
    #[inline]
    pub fn ticks_per_beat(&self) -> Option<u16> {
        self.header.timing.ticks_per_beat()
    }

    /// All tracks laid out as a single message list, in playback order.
    ///
    /// Tracks of a `Format::Parallel` file are merged by absolute tick, with deltas recomputed
    /// against the merged stream and ties resolved in track order.
    /// Tracks of the other formats are played one after the other.
    pub fn merged(&self) -> Vec<Message> {
        let total = self.tracks.iter().map(Vec::len).sum();
        let mut merged = Vec::with_capacity(total);
        match self.header.format {
            Format::Parallel => {
                let mut cursors = vec![0usize; self.tracks.len()];
                let mut ev_heap = BinaryHeap::with_capacity(self.tracks.len());
                for (track_idx, track) in self.tracks.iter().enumerate() {
                    if let Some(first) = track.first() {
                        ev_heap.push(Reverse((first.delta().as_int() as u64, track_idx)));
                    }
                }
                let mut last_tick = 0;
                while let Some(Reverse((time, track_idx))) = ev_heap.pop() {
                    let track = &self.tracks[track_idx];
                    let this_ev = &track[cursors[track_idx]];
                    cursors[track_idx] += 1;
                    if let Some(next) = track.get(cursors[track_idx]) {
                        ev_heap.push(Reverse((time + next.delta().as_int() as u64, track_idx)));
                    }
                    //Never larger than the delta of `this_ev` within its own track
                    let delta = u28::new((time - last_tick) as u32);
                    last_tick = time;
                    merged.push(this_ev.clone().with_delta(delta));
                }
            }
            Format::SingleTrack | Format::Sequential => {
                merged.extend(self.tracks.iter().flatten().cloned());
            }
        }
        merged
    }
}

fn validate_smf(header: &Header, track_count_hint: u16, track_count: usize) -> Result<()> {
    if cfg!(feature = "strict") {
        ensure!(
            track_count_hint as usize == track_count,
            Error::MalformedChunk("file has a different amount of tracks than declared")
        );
        ensure!(
            header.format != Format::SingleTrack || track_count == 1,
            Error::MalformedChunk("singletrack format file has multiple tracks")
        );
    }
    Ok(())
}

/// Decode the header of a file, leaving its tracks to be decoded lazily.
pub fn parse(raw: &[u8]) -> Result<(Header, TrackIter)> {
    let mut chunks = ChunkIter::read(raw);
    let (header, track_count) = match chunks.next() {
        Some(maybe_chunk) => match maybe_chunk? {
            Chunk::Header(header, track_count) => Ok((header, track_count)),
            Chunk::Track(_) => Err(Error::MalformedChunk("expected header, found track")),
        },
        None => Err(Error::MalformedChunk("no header chunk")),
    }?;
    let tracks = chunks.as_tracks(track_count);
    Ok((header, tracks))
}

/// Encode and write the MIDI file into the given generic writer.
///
/// This function will bubble up errors from the underlying writer and produce `invalid_input`
/// errors if the MIDI file is extremely large (like for example if there are more than 65535
/// tracks or chunk sizes are over 4GB).
pub fn write<'a, W: Write>(
    header: &Header,
    tracks: impl Iterator<Item = impl IntoIterator<Item = &'a Message>> + ExactSizeIterator,
    out: &mut W,
) -> WriteResult<W> {
    //Write the header first
    Chunk::write_header(header, tracks.len(), out)?;

    //Write tracks into a reusable buffer before writing them out
    let mut track_chunk = Vec::with_capacity(8 * 1024);
    for track in tracks {
        //Write tracks into a buffer first so that chunk lengths can be written
        Chunk::write_track(track, &mut track_chunk).map_err(W::invalid_input)?;
        out.write(&track_chunk[..])?;
        track_chunk.clear();
    }
    Ok(())
}

#[derive(Copy, Clone, Debug)]
struct ChunkIter<'a> {
    /// Starts at the current index, ends at EOF.
    raw: &'a [u8],
}
impl<'a> ChunkIter<'a> {
    fn read(raw: &'a [u8]) -> ChunkIter<'a> {
        ChunkIter { raw }
    }

    fn as_tracks(self, track_count_hint: u16) -> TrackIter<'a> {
        TrackIter {
            chunks: self,
            track_count_hint,
        }
    }
}
impl<'a> Iterator for ChunkIter<'a> {
    type Item = Result<Chunk<'a>>;
    fn next(&mut self) -> Option<Result<Chunk<'a>>> {
        //Flip around option and result
        match Chunk::read(&mut self.raw) {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(err) => {
                //Ensure `Chunk::read` isn't called again on corrupted state
                self.raw = &[];
                Some(Err(err))
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Chunk<'a> {
    Header(Header, u16),
    Track(&'a [u8]),
}
impl<'a> Chunk<'a> {
    /// Should be called with a byte slice at least as large as the chunk (ideally until EOF).
    /// The slice will be modified to point to the next chunk.
    /// If we're *exactly* at EOF (slice length 0), returns a None signalling no more chunks.
    fn read(raw: &mut &'a [u8]) -> Result<Option<Chunk<'a>>> {
        if raw.is_empty() {
            return Ok(None);
        }
        let id = raw
            .split_checked(4)
            .ok_or(Error::TruncatedData("failed to read chunk id"))?;
        let len = u32::read(raw)?;
        let chunkdata = raw
            .split_checked(len as usize)
            .ok_or(Error::MalformedChunk("chunk length exceeds the remaining data"))?;
        match id {
            b"MThd" => {
                let (header, track_count) = Header::read(chunkdata)?;
                Ok(Some(Chunk::Header(header, track_count)))
            }
            b"MTrk" => Ok(Some(Chunk::Track(chunkdata))),
            _ => Err(Error::MalformedChunk("unrecognized chunk type")),
        }
    }

    /// Write a header chunk into a writer.
    fn write_header<W: Write>(header: &Header, track_count: usize, out: &mut W) -> WriteResult<W> {
        let mut header_chunk = [0; 4 + 4 + 6];
        let track_count = u16::try_from(track_count)
            .map_err(|_| W::invalid_input("track count exceeds 16 bit range"))?;
        let header = header.encode(track_count);
        header_chunk[0..4].copy_from_slice(&b"MThd"[..]);
        header_chunk[4..8].copy_from_slice(&(header.len() as u32).to_be_bytes()[..]);
        header_chunk[8..].copy_from_slice(&header[..]);
        out.write(&header_chunk[..])?;
        Ok(())
    }

    /// Write a track chunk into a `Vec`, closing it with an End-of-Track event.
    ///
    /// The `Vec` should be empty.
    fn write_track<'m>(
        track: impl IntoIterator<Item = &'m Message>,
        out: &mut Vec<u8>,
    ) -> WriteResult<Vec<u8>> {
        out.extend_from_slice(b"MTrk\0\0\0\0");
        let mut ended = false;
        for msg in track {
            msg.write(out)?;
            if msg.is_end_of_track() {
                ended = true;
                break;
            }
        }
        if !ended {
            Message::RawMeta(RawMetaMessage::end_of_track(u28::new(0))).write(out)?;
        }
        let len =
            u32::try_from(out.len() - 8).map_err(|_| "midi chunk size exceeds 32 bit range")?;
        out[4..8].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }
}

/// A MIDI file header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Header {
    pub format: Format,
    pub timing: Timing,
}
impl Header {
    pub fn new(format: Format, timing: Timing) -> Header {
        Header { format, timing }
    }

    /// Read both the header and the track count.
    fn read(mut raw: &[u8]) -> Result<(Header, u16)> {
        let format = Format::read(&mut raw)?;
        let track_count = u16::read(&mut raw)?;
        let timing = Timing::read(&mut raw)?;
        Ok((Header::new(format, timing), track_count))
    }

    fn encode(&self, track_count: u16) -> [u8; 6] {
        let mut bytes = [0; 6];
        bytes[0..2].copy_from_slice(&self.format.encode()[..]);
        bytes[2..4].copy_from_slice(&track_count.to_be_bytes()[..]);
        bytes[4..6].copy_from_slice(&self.timing.encode()[..]);
        bytes
    }
}

/// An iterator over the tracks in a Standard Midi File.
pub struct TrackIter<'a> {
    chunks: ChunkIter<'a>,
    track_count_hint: u16,
}
impl<'a> TrackIter<'a> {
    /// Get the remaining unread bytes.
    pub fn unread(&self) -> &'a [u8] {
        self.chunks.raw
    }

    /// Decode every remaining track.
    ///
    /// Large multi-track files are decoded on the `rayon` thread pool when the `parallel`
    /// feature is enabled.
    pub fn collect_tracks(self) -> Result<Vec<Vec<Message>>> {
        #[cfg(feature = "parallel")]
        {
            if self.unread().len() >= PARALLEL_ENABLE_THRESHOLD {
                use rayon::prelude::*;

                let chunk_vec = self.collect::<Result<Vec<_>>>()?;
                if chunk_vec.len() > 1 {
                    return chunk_vec
                        .into_par_iter()
                        .map(EventIter::collect_messages)
                        .collect::<Result<Vec<_>>>();
                }
                return chunk_vec
                    .into_iter()
                    .map(EventIter::collect_messages)
                    .collect();
            }
        }
        //Fall back to single-threaded
        let mut tracks = Vec::with_capacity(self.track_count_hint as usize);
        for chunk_result in self {
            tracks.push(chunk_result?.collect_messages()?);
        }
        Ok(tracks)
    }
}
impl<'a> Iterator for TrackIter<'a> {
    type Item = Result<EventIter<'a>>;

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.track_count_hint as usize, None)
    }

    fn next(&mut self) -> Option<Result<EventIter<'a>>> {
        loop {
            let chunk = self.chunks.next()?;
            self.track_count_hint = self.track_count_hint.saturating_sub(1);
            match chunk {
                Ok(Chunk::Track(track)) => break Some(Ok(EventIter::new(track))),
                Ok(Chunk::Header(..)) => {
                    if cfg!(feature = "strict") {
                        break Some(Err(Error::MalformedChunk("found duplicate header")));
                    }
                    //Ignore duplicate header
                }
                Err(err) => break Some(Err(err)),
            }
        }
    }
}

/// An iterator of messages over a single track.
/// Allows deferring the decoding of tracks for later, on an on-demand basis.
///
/// Iteration stops at the End-of-Track event, which is not yielded.
/// This `struct` is very light, so it can be cloned freely.
#[derive(Clone, Debug)]
pub struct EventIter<'a> {
    raw: &'a [u8],
    running_status: Option<u8>,
    ended: bool,
}
impl<'a> EventIter<'a> {
    pub fn new(raw: &'a [u8]) -> EventIter<'a> {
        EventIter {
            raw,
            running_status: None,
            ended: false,
        }
    }

    /// Get the remaining unread bytes.
    pub fn unread(&self) -> &'a [u8] {
        self.raw
    }

    /// Get the current running status of the track.
    pub fn running_status(&self) -> Option<u8> {
        self.running_status
    }

    pub fn collect_messages(self) -> Result<Vec<Message>> {
        let mut messages = Vec::with_capacity(self.raw.len() / 3);
        for msg in self {
            messages.push(msg?);
        }
        Ok(messages)
    }
}
impl<'a> Iterator for EventIter<'a> {
    type Item = Result<Message>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.ended {
            return None;
        }
        if self.raw.is_empty() {
            self.ended = true;
            if cfg!(feature = "strict") {
                return Some(Err(Error::MalformedChunk("track is missing its end of track")));
            }
            return None;
        }
        match Message::read(&mut self.raw, &mut self.running_status) {
            Ok(msg) if msg.is_end_of_track() => {
                self.ended = true;
                if cfg!(feature = "strict") && !self.raw.is_empty() {
                    return Some(Err(Error::MalformedChunk("data after end of track")));
                }
                None
            }
            Ok(msg) => Some(Ok(msg)),
            Err(err) => {
                self.ended = true;
                Some(Err(err))
            }
        }
    }
}
