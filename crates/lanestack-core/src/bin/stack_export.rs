//! Probe media files, stack every channel, and run an export
//!
//! Usage:
//!   stack-export [--mono | --stereo-pairs] [--codec wav|flac|alac|aac|mp3]
//!                [--depth 16|24|32] [--rate <hz>] -o <dest> <file>...
//!
//! Lanes are stacked in argument order, one per channel of each file's
//! first audio stream. The default topology writes one multichannel file
//! at <dest>; `--mono` and `--stereo-pairs` treat <dest> as a directory.

use std::path::PathBuf;

use anyhow::{bail, Context};

use lanestack_core::export::{
    build_jobs, BitDepth, ExportCodec, ExportProgress, ExportRunner, ExportSettings,
    ExportTopology,
};
use lanestack_core::ffmpeg::{MediaProber, ToolLocator};
use lanestack_core::{LaneId, LaneSnapshot};

struct Options {
    settings: ExportSettings,
    destination: PathBuf,
    files: Vec<PathBuf>,
}

fn parse_args() -> anyhow::Result<Options> {
    let mut settings = ExportSettings::default();
    let mut destination = None;
    let mut files = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mono" => settings.topology = ExportTopology::MonoFiles,
            "--stereo-pairs" => settings.topology = ExportTopology::StereoPairs,
            "--codec" => {
                let value = args.next().context("--codec needs a value")?;
                settings.codec = match value.as_str() {
                    "wav" => ExportCodec::PcmWav,
                    "flac" => ExportCodec::Flac,
                    "alac" => ExportCodec::Alac,
                    "aac" => ExportCodec::Aac,
                    "mp3" => ExportCodec::Mp3,
                    other => bail!("unknown codec '{}'", other),
                };
            }
            "--depth" => {
                let value = args.next().context("--depth needs a value")?;
                settings.bit_depth = match value.as_str() {
                    "16" => BitDepth::Int16,
                    "24" => BitDepth::Int24,
                    "32" => BitDepth::Float32,
                    other => bail!("unknown bit depth '{}'", other),
                };
            }
            "--rate" => {
                let value = args.next().context("--rate needs a value")?;
                settings.sample_rate = Some(value.parse().context("--rate must be a number")?);
            }
            "-o" => destination = Some(PathBuf::from(args.next().context("-o needs a path")?)),
            other => files.push(PathBuf::from(other)),
        }
    }

    let Some(destination) = destination else {
        bail!("usage: stack-export [options] -o <dest> <file>...");
    };
    if files.is_empty() {
        bail!("no input files given");
    }
    Ok(Options {
        settings,
        destination,
        files,
    })
}

/// One lane per channel of each file's first audio stream
fn stack_lanes(prober: &MediaProber, files: &[PathBuf]) -> anyhow::Result<Vec<LaneSnapshot>> {
    let mut lanes = Vec::new();
    for file in files {
        let streams = prober
            .probe(file)
            .with_context(|| format!("probing {:?}", file))?;
        let Some(stream) = streams.iter().find(|s| s.channels > 0) else {
            bail!("{:?} has no audio channels", file);
        };
        for channel in 0..stream.channels {
            lanes.push(LaneSnapshot {
                id: LaneId::next(),
                source: file.clone(),
                stream_index: stream.stream_index,
                channel_index: channel,
                total_channels: stream.channels,
                sample_rate: stream.sample_rate,
            });
        }
    }
    Ok(lanes)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_args()?;
    let locator = ToolLocator::new();
    if !locator.ffmpeg_available() || !locator.ffprobe_available() {
        bail!("ffmpeg/ffprobe not found; install FFmpeg first");
    }

    let prober = MediaProber::new(locator.clone());
    let lanes = stack_lanes(&prober, &options.files)?;
    log::info!("stacked {} lane(s) from {} file(s)", lanes.len(), options.files.len());

    let jobs = build_jobs(&lanes, &options.settings, &options.destination);
    let rx = ExportRunner::new(&locator).run(jobs);

    let mut failures = 0usize;
    for progress in rx {
        match progress {
            ExportProgress::Started { total } => {
                println!("exporting {} file(s)...", total);
            }
            ExportProgress::JobFinished {
                output,
                result: Ok(()),
                ..
            } => println!("  wrote {:?}", output),
            ExportProgress::JobFinished {
                output,
                result: Err(e),
                ..
            } => {
                failures += 1;
                eprintln!("  FAILED {:?}: {}", output, e);
            }
            ExportProgress::AllDone { total } => {
                println!("done ({} file(s))", total);
            }
        }
    }

    if failures > 0 {
        bail!("{} export job(s) failed", failures);
    }
    Ok(())
}
