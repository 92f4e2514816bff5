//! Lanestack Core - multi-source channel stacking via ffmpeg

pub mod export;
pub mod ffmpeg;
pub mod model;
pub mod preview;
pub mod session;
pub mod types;
pub mod waveform;

pub use types::*;
