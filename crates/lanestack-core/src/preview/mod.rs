//! Stack preview: background mixdown + cpal playback
//!
//! The player mixes every lane into one stereo buffer on a background
//! thread (equal-power panned across the stack) and plays it through a
//! cpal output stream. Loads are versioned by a generation counter so a
//! stale decode can never clobber a newer one.

mod decode;
mod player;

use thiserror::Error;

pub use player::{PreviewEventReceiver, PreviewPlayer};

/// Load state of the preview buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No lanes loaded, zero-length buffer
    Empty = 0,
    /// A load worker is running
    Loading = 1,
    /// Buffer installed, playback allowed
    Ready = 2,
    /// The last load failed
    Error = 3,
}

impl LoadState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => LoadState::Loading,
            2 => LoadState::Ready,
            3 => LoadState::Error,
            _ => LoadState::Empty,
        }
    }
}

/// Events emitted by the player, drained on the coordinating thread
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEvent {
    LoadStateChanged(LoadState),
    PlaybackStarted,
    PlaybackStopped,
    /// Playback position in seconds, sent from the output callback
    PositionChanged(f64),
    /// The cursor hit the end of the buffer; the coordinating thread
    /// responds by calling `stop()`
    ReachedEnd,
}

/// Errors from bringing up the audio output
#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("no audio output device available")]
    DeviceUnavailable,

    #[error("failed to query output config: {0}")]
    ConfigUnavailable(String),

    #[error("failed to build output stream: {0}")]
    StreamBuild(String),

    #[error("failed to start output stream: {0}")]
    StreamPlay(String),
}

/// Result type for preview operations
pub type PreviewResult<T> = Result<T, PreviewError>;
