//! Region to region operations and the pipeline that chains them.

use crate::{
    note::{Interval, KeySignature},
    prelude::*,
    region::Region,
    stream::MetaStateWatch,
};

/// A pure operation on a region.
///
/// A transform may rewrite the channel, pitch or velocity of any note and may replace the
/// region's `MetaState` wholesale.
/// Any `Fn(Region) -> Result<Region>` closure is a transform.
pub trait Transform {
    fn apply(&self, region: Region) -> Result<Region>;
}
impl<F: Fn(Region) -> Result<Region>> Transform for F {
    fn apply(&self, region: Region) -> Result<Region> {
        self(region)
    }
}

/// Move every note onto a single channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SetChannelTransform {
    channel: u4,
}
impl SetChannelTransform {
    /// Fails with `Error::InvalidFieldRange` unless `channel < 16`.
    pub fn new(channel: u8) -> Result<SetChannelTransform> {
        Ok(SetChannelTransform {
            channel: u4::check("channel", channel.into())?,
        })
    }

    #[inline]
    pub fn channel(&self) -> u4 {
        self.channel
    }
}
impl Transform for SetChannelTransform {
    fn apply(&self, mut region: Region) -> Result<Region> {
        for note in region.iter_mut() {
            note.set_channel(self.channel);
        }
        Ok(region)
    }
}

/// Shift every note by a fixed number of semitones.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TransposeTransform {
    semitones: i8,
}
impl TransposeTransform {
    #[inline]
    pub const fn new(semitones: i8) -> TransposeTransform {
        TransposeTransform { semitones }
    }

    /// Shift up by a named interval.
    #[inline]
    pub fn up(interval: Interval) -> TransposeTransform {
        TransposeTransform::new(interval.semitones())
    }

    /// Shift down by a named interval.
    #[inline]
    pub fn down(interval: Interval) -> TransposeTransform {
        TransposeTransform::new(-interval.semitones())
    }

    #[inline]
    pub fn semitones(&self) -> i8 {
        self.semitones
    }
}
impl Transform for TransposeTransform {
    fn apply(&self, mut region: Region) -> Result<Region> {
        for note in region.iter_mut() {
            *note = note.transpose(self.semitones)?;
        }
        Ok(region)
    }
}

/// Something that can be asked for a key signature at any time.
pub trait KeySource {
    fn key_signature(&self) -> KeySignature;
}
impl KeySource for KeySignature {
    fn key_signature(&self) -> KeySignature {
        *self
    }
}
/// Follows the key of another stream as it changes.
impl KeySource for MetaStateWatch {
    fn key_signature(&self) -> KeySignature {
        self.get().key()
    }
}

/// Transpose a region from its own key into the key of a harmony source.
///
/// Both keys are reduced to the pitch class of their relative major, and every note is moved
/// up by the distance between the two, modulo an octave.
/// The region then takes the harmony's key.
/// There is no voice leading, notes are only transposed.
#[derive(Clone, Debug)]
pub struct HarmonizerTransform<K> {
    harmony: K,
}
impl<K: KeySource> HarmonizerTransform<K> {
    pub fn new(harmony: K) -> HarmonizerTransform<K> {
        HarmonizerTransform { harmony }
    }

    pub fn harmony(&self) -> &K {
        &self.harmony
    }
}
impl<K: KeySource> Transform for HarmonizerTransform<K> {
    fn apply(&self, mut region: Region) -> Result<Region> {
        let target = self.harmony.key_signature();
        let current = region.state().key();
        let offset = current.offset_to(&target) as i8;
        for note in region.iter_mut() {
            let pitch = note.pitch();
            *note = note.transpose(offset).map_err(|_| {
                Error::transform(
                    "harmonizer",
                    format!(
                        "pitch {} cannot move {} semitones from {:?} to {:?}",
                        pitch, offset, current, target
                    ),
                )
            })?;
        }
        let state = region.state().with_key(target);
        region.set_state(state);
        Ok(region)
    }
}

/// An ordered list of transforms, run front to back.
#[derive(Default)]
pub struct TransformPipeline {
    transforms: Vec<Box<dyn Transform>>,
}
impl TransformPipeline {
    pub fn new() -> TransformPipeline {
        TransformPipeline {
            transforms: Vec::new(),
        }
    }

    /// Append a transform to the end of the pipeline.
    pub fn push(&mut self, transform: impl Transform + 'static) {
        self.transforms.push(Box::new(transform));
    }

    /// Builder form of `push`.
    pub fn with(mut self, transform: impl Transform + 'static) -> TransformPipeline {
        self.push(transform);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Run `region` through every transform in order.
    ///
    /// Each transform sees the state left by the one before it.
    /// The first failure stops the pipeline and is returned as-is.
    pub fn apply(&self, region: Region) -> Result<Region> {
        self.transforms
            .iter()
            .try_fold(region, |region, transform| transform.apply(region))
    }
}
impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("transforms", &self.transforms.len())
            .finish()
    }
}
