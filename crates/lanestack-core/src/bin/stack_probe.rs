//! Probe a media file and print its audio streams
//!
//! Usage: `stack-probe <file> [<file>...]`

use std::path::Path;

use anyhow::{bail, Context};

use lanestack_core::ffmpeg::{MediaProber, ToolLocator};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        bail!("usage: stack-probe <file> [<file>...]");
    }

    let locator = ToolLocator::new();
    if !locator.ffprobe_available() {
        bail!("ffprobe not found; install FFmpeg first");
    }
    let prober = MediaProber::new(locator);

    for file in &files {
        let path = Path::new(file);
        let streams = prober
            .probe(path)
            .with_context(|| format!("probing {}", file))?;

        println!("{}: {} audio stream(s)", file, streams.len());
        for s in &streams {
            println!(
                "  stream {}: {} ch, {} Hz, {}{}, {:.2}s",
                s.stream_index,
                s.channels,
                s.sample_rate,
                s.codec,
                if s.channel_layout.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", s.channel_layout)
                },
                s.duration,
            );
        }
    }
    Ok(())
}
