//! Output sinks for the MIDI encoders.
//!
//! Every encoder in this crate writes into a [`Write`](trait.Write.html) sink and bubbles up the
//! sink's own error type.
//! In-memory encoding goes through the `Vec<u8>` implementation, and any `std::io::Write` can be
//! used by wrapping it in [`IoWrap`](struct.IoWrap.html).

use crate::prelude::*;
use std::io;

/// The result of writing into a sink of type `W`.
pub type WriteResult<W> = StdResult<(), <W as Write>::Error>;

/// A byte sink that MIDI data can be encoded into.
pub trait Write {
    /// The error produced by the sink, and by the encoder when asked to encode something that
    /// cannot be represented.
    type Error;

    /// Write all of the bytes in `buf`, or fail.
    fn write(&mut self, buf: &[u8]) -> WriteResult<Self>;

    /// Build the error reported when the data to encode is out of range for the format.
    fn invalid_input(msg: &'static str) -> Self::Error;
}

impl Write for Vec<u8> {
    type Error = &'static str;
    #[inline]
    fn write(&mut self, buf: &[u8]) -> WriteResult<Self> {
        self.extend_from_slice(buf);
        Ok(())
    }
    fn invalid_input(msg: &'static str) -> &'static str {
        msg
    }
}

/// Adapts any `std::io::Write` into a MIDI sink.
#[derive(Debug)]
pub struct IoWrap<T>(pub T);
impl<T: io::Write> Write for IoWrap<T> {
    type Error = io::Error;
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.0, buf)
    }
    fn invalid_input(msg: &'static str) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidInput, msg)
    }
}
