//! Stack export: settings, command construction, execution
//!
//! The builder is pure (lane snapshots + settings in, ffmpeg argument
//! lists out) and fully unit-testable; the runner owns the subprocess
//! side and reports per-job progress over an mpsc channel.

mod builder;
mod runner;
mod settings;

pub use builder::{build_jobs, ExportJob};
pub use runner::{ExportProgress, ExportRunner};
pub use settings::{BitDepth, ExportCodec, ExportSettings, ExportTopology};
