//! Common types for Lanestack
//!
//! This module contains the fundamental types shared across the stacking
//! pipeline: lane descriptors, waveform envelopes and the stereo sample
//! used by the preview mixer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Target number of envelope points per lane waveform
pub const ENVELOPE_POINTS: usize = 4000;

/// Hard ceiling on buffered raw decode output (bytes). Decodes longer than
/// this are truncated rather than growing without bound.
pub const MAX_DECODE_BYTES: usize = 500 * 1024 * 1024;

/// Chunk size for streaming subprocess stdout reads
pub const DECODE_CHUNK_BYTES: usize = 64 * 1024;

/// Audio sample type (32-bit float throughout the preview path)
pub type Sample = f32;

/// Stable lane identity, unique within a process lifetime
///
/// Ids are handed out from a process-wide counter and never reused, even
/// after the lane is deleted. Used as the key for waveform job tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneId(u64);

static NEXT_LANE_ID: AtomicU64 = AtomicU64::new(1);

impl LaneId {
    /// Allocate the next unused id
    pub fn next() -> Self {
        LaneId(NEXT_LANE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lane#{}", self.0)
    }
}

/// Min/max waveform envelope for one lane
///
/// Mutated only by wholesale replacement; consumers must check `is_ready`
/// before rendering. `num_points` may differ across re-extractions.
#[derive(Debug, Clone, Default)]
pub struct WaveformEnvelope {
    /// Signed minimum per point
    pub min: Vec<f32>,
    /// Signed maximum per point
    pub max: Vec<f32>,
    /// Number of valid points (equals min.len() and max.len() when ready)
    pub num_points: usize,
    /// True only once every point has been computed
    pub is_ready: bool,
}

/// One output channel of the stack, bound to a (source, stream, channel)
/// triple. Owned exclusively by the [`LaneStore`](crate::model::LaneStore);
/// order in the store defines stack position, export channel order and
/// stereo pan position.
#[derive(Debug)]
pub struct Lane {
    /// Stable identity, immutable for the lane's life
    pub id: LaneId,
    /// Media file this channel comes from
    pub source: PathBuf,
    /// Audio stream index within the source
    pub stream_index: usize,
    /// Channel index within the stream (< total_channels)
    pub channel_index: usize,
    /// Total channel count of the stream
    pub total_channels: usize,
    /// Stream sample rate in Hz
    pub sample_rate: f64,
    /// Display name, e.g. "drums [0:2]"
    pub display_name: String,
    /// Waveform envelope, installed by the extractor via the session
    pub waveform: WaveformEnvelope,
}

impl Lane {
    /// Create a lane for one channel of a probed stream
    pub fn new(
        source: PathBuf,
        stream_index: usize,
        channel_index: usize,
        total_channels: usize,
        sample_rate: f64,
        display_name: String,
    ) -> Self {
        debug_assert!(channel_index < total_channels.max(1));
        Self {
            id: LaneId::next(),
            source,
            stream_index,
            channel_index,
            total_channels,
            sample_rate,
            display_name,
            waveform: WaveformEnvelope::default(),
        }
    }

    /// Plain-value copy of the fields background jobs need
    ///
    /// Workers never hold `&Lane`: the store may mutate or free the lane
    /// while a job is in flight.
    pub fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            id: self.id,
            source: self.source.clone(),
            stream_index: self.stream_index,
            channel_index: self.channel_index,
            total_channels: self.total_channels,
            sample_rate: self.sample_rate,
        }
    }
}

/// Decode-relevant lane data, detached from the store
#[derive(Debug, Clone, PartialEq)]
pub struct LaneSnapshot {
    pub id: LaneId,
    pub source: PathBuf,
    pub stream_index: usize,
    pub channel_index: usize,
    pub total_channels: usize,
    pub sample_rate: f64,
}

impl LaneSnapshot {
    /// Grouping key for input deduplication: lanes sharing a (source, stream)
    /// pair read the same decoded stream.
    pub fn source_key(&self) -> (PathBuf, usize) {
        (self.source.clone(), self.stream_index)
    }
}

/// A single stereo sample (left and right channels)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Peak amplitude (max of abs(left), abs(right))
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }

    /// Scale both channels by a factor
    #[inline]
    pub fn scale(&self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_ids_are_unique_and_monotonic() {
        let a = LaneId::next();
        let b = LaneId::next();
        let c = LaneId::next();
        assert!(a < b && b < c);
        assert_ne!(a, c);
    }

    #[test]
    fn snapshot_copies_decode_fields() {
        let lane = Lane::new(
            PathBuf::from("/tmp/a.mov"),
            1,
            2,
            6,
            48000.0,
            "a [1:2]".into(),
        );
        let snap = lane.snapshot();
        assert_eq!(snap.id, lane.id);
        assert_eq!(snap.channel_index, 2);
        assert_eq!(snap.total_channels, 6);
        assert_eq!(snap.source_key(), (PathBuf::from("/tmp/a.mov"), 1));
    }

    #[test]
    fn stereo_sample_peak() {
        let s = StereoSample::new(-0.8, 0.5);
        assert_eq!(s.peak(), 0.8);
        assert_eq!(s.scale(0.5).left, -0.4);
    }
}
