//! External tool integration (ffmpeg / ffprobe)
//!
//! Everything that touches the external transcoder lives here: locating
//! the executables, running them with a bounded wait, and parsing ffprobe
//! output. The tools' command-line contract is part of this crate; their
//! internals are not.

mod locator;
mod probe;
mod process;

pub use locator::ToolLocator;
pub use probe::{AudioStreamInfo, MediaProber, ProbeError, ProbeResult};
pub use process::{run_with_timeout, ProcessOutput};
