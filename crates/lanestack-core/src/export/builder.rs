//! Export command construction
//!
//! Pure mapping from `(ordered lanes, settings, destination)` to complete
//! ffmpeg argument lists. No I/O and no subprocess execution happens here.
//!
//! Shared inputs are deduplicated: lanes reading the same (source, stream)
//! pair share one `-i` and tap it through `asplit`, because a filter graph
//! may not consume the same input stream twice and re-reading the file
//! would decode it once per lane.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::LaneSnapshot;

use super::settings::{ExportSettings, ExportTopology};

/// One ffmpeg invocation: arguments (without the executable) plus the
/// output path the job writes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub args: Vec<String>,
    pub output: PathBuf,
}

/// Build the job list for the settings' topology
///
/// For `Multichannel` the destination is the output file (its extension is
/// replaced to match the codec); for the batch topologies it is the output
/// directory.
pub fn build_jobs(
    lanes: &[LaneSnapshot],
    settings: &ExportSettings,
    destination: &Path,
) -> Vec<ExportJob> {
    if lanes.is_empty() {
        return Vec::new();
    }
    match settings.topology {
        ExportTopology::Multichannel => {
            vec![build_multichannel_job(lanes, settings, destination)]
        }
        ExportTopology::MonoFiles => build_mono_jobs(lanes, settings, destination),
        ExportTopology::StereoPairs => build_stereo_pair_jobs(lanes, settings, destination),
    }
}

fn arg_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn common_prefix() -> Vec<String> {
    vec!["-v".into(), "error".into(), "-y".into()]
}

fn push_tail(args: &mut Vec<String>, settings: &ExportSettings, output: &Path) {
    args.extend(settings.codec_args());
    args.extend(settings.rate_args());
    args.push(arg_str(output));
}

/// N lanes into one N-channel file; output channel i is lane i's channel
fn build_multichannel_job(
    lanes: &[LaneSnapshot],
    settings: &ExportSettings,
    output_file: &Path,
) -> ExportJob {
    let output = output_file.with_extension(settings.extension());
    let mut args = common_prefix();

    // One -i per distinct (source, stream), in first-use order
    let mut input_index: HashMap<(PathBuf, usize), usize> = HashMap::new();
    let mut input_order: Vec<(PathBuf, usize)> = Vec::new();
    let mut uses: HashMap<(PathBuf, usize), usize> = HashMap::new();
    for lane in lanes {
        let key = lane.source_key();
        *uses.entry(key.clone()).or_insert(0) += 1;
        if !input_index.contains_key(&key) {
            input_index.insert(key.clone(), input_order.len());
            input_order.push(key.clone());
            args.push("-i".into());
            args.push(arg_str(&lane.source));
        }
    }

    let mut filter = String::new();

    // Split every shared stream into one tap per use
    for (path, stream) in &input_order {
        let key = (path.clone(), *stream);
        let count = uses[&key];
        if count > 1 {
            let idx = input_index[&key];
            filter.push_str(&format!("[{}:a:{}]asplit={}", idx, stream, count));
            for tap in 0..count {
                filter.push_str(&format!("[s{}_{}]", idx, tap));
            }
            filter.push(';');
        }
    }

    // Extract each lane's channel into a mono-labeled intermediate
    let mut taps_taken: HashMap<(PathBuf, usize), usize> = HashMap::new();
    for (i, lane) in lanes.iter().enumerate() {
        let key = lane.source_key();
        let idx = input_index[&key];
        let tap = if uses[&key] > 1 {
            let taken = taps_taken.entry(key).or_insert(0);
            let label = format!("[s{}_{}]", idx, *taken);
            *taken += 1;
            label
        } else {
            format!("[{}:a:{}]", idx, lane.stream_index)
        };
        filter.push_str(&format!(
            "{}pan=mono|c0=c{}[m{}];",
            tap, lane.channel_index, i
        ));
    }

    // Join the intermediates in lane order with a discrete Nc layout
    let n = lanes.len();
    for i in 0..n {
        filter.push_str(&format!("[m{}]", i));
    }
    let channel_map: Vec<String> = (0..n).map(|i| format!("{}.0-{}", i, i)).collect();
    filter.push_str(&format!(
        "join=inputs={}:channel_layout={}c:map={}[out]",
        n,
        n,
        channel_map.join("|")
    ));

    args.push("-filter_complex".into());
    args.push(filter);
    args.push("-map".into());
    args.push("[out]".into());
    push_tail(&mut args, settings, &output);

    ExportJob { args, output }
}

/// One mono file per lane, named with a zero-padded sequence number plus
/// the source's base name.
fn build_mono_jobs(
    lanes: &[LaneSnapshot],
    settings: &ExportSettings,
    output_dir: &Path,
) -> Vec<ExportJob> {
    lanes
        .iter()
        .enumerate()
        .map(|(i, lane)| {
            let stem = lane
                .source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source".to_string());
            let output = output_dir.join(format!(
                "channel_{:02}_{}.{}",
                i + 1,
                stem,
                settings.extension()
            ));

            let mut args = common_prefix();
            args.push("-i".into());
            args.push(arg_str(&lane.source));
            args.push("-filter_complex".into());
            args.push(format!(
                "[0:a:{}]pan=mono|c0=c{}[out]",
                lane.stream_index, lane.channel_index
            ));
            args.push("-map".into());
            args.push("[out]".into());
            push_tail(&mut args, settings, &output);

            ExportJob { args, output }
        })
        .collect()
}

/// One stereo file per lane pair; an odd trailing lane duplicates its
/// channel into the right side rather than dropping it.
fn build_stereo_pair_jobs(
    lanes: &[LaneSnapshot],
    settings: &ExportSettings,
    output_dir: &Path,
) -> Vec<ExportJob> {
    let num_pairs = lanes.len().div_ceil(2);
    (0..num_pairs)
        .map(|pair| {
            let left = &lanes[pair * 2];
            // Odd lane count: last pair plays the left lane on both sides
            let right = lanes.get(pair * 2 + 1).unwrap_or(left);
            let output = output_dir.join(format!("stereo_{:02}.{}", pair + 1, settings.extension()));

            let mut args = common_prefix();
            args.push("-i".into());
            args.push(arg_str(&left.source));

            let same_input = right.source_key() == left.source_key();
            if !same_input {
                args.push("-i".into());
                args.push(arg_str(&right.source));
            }

            let mut filter = String::new();
            if same_input {
                // One decoded stream feeding both sides needs a split
                filter.push_str(&format!("[0:a:{}]asplit=2[sl][sr];", left.stream_index));
                filter.push_str(&format!("[sl]pan=mono|c0=c{}[left];", left.channel_index));
                filter.push_str(&format!("[sr]pan=mono|c0=c{}[right];", right.channel_index));
            } else {
                filter.push_str(&format!(
                    "[0:a:{}]pan=mono|c0=c{}[left];",
                    left.stream_index, left.channel_index
                ));
                filter.push_str(&format!(
                    "[1:a:{}]pan=mono|c0=c{}[right];",
                    right.stream_index, right.channel_index
                ));
            }
            filter.push_str("[left][right]amerge=inputs=2[out]");

            args.push("-filter_complex".into());
            args.push(filter);
            args.push("-map".into());
            args.push("[out]".into());
            push_tail(&mut args, settings, &output);

            ExportJob { args, output }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::settings::{BitDepth, ExportCodec};
    use crate::types::LaneId;

    fn lane(source: &str, stream: usize, channel: usize) -> LaneSnapshot {
        LaneSnapshot {
            id: LaneId::next(),
            source: PathBuf::from(source),
            stream_index: stream,
            channel_index: channel,
            total_channels: 8,
            sample_rate: 48000.0,
        }
    }

    fn settings(topology: ExportTopology) -> ExportSettings {
        ExportSettings {
            topology,
            codec: ExportCodec::PcmWav,
            bit_depth: BitDepth::Int24,
            sample_rate: None,
        }
    }

    fn filter_of(job: &ExportJob) -> &str {
        let pos = job
            .args
            .iter()
            .position(|a| a == "-filter_complex")
            .expect("job has a filter graph");
        &job.args[pos + 1]
    }

    fn count_inputs(job: &ExportJob, path: &str) -> usize {
        job.args
            .windows(2)
            .filter(|w| w[0] == "-i" && w[1] == path)
            .count()
    }

    #[test]
    fn multichannel_orders_output_channels_by_lane() {
        let lanes = vec![
            lane("/media/a.mov", 0, 3),
            lane("/media/b.wav", 0, 1),
            lane("/media/a.mov", 0, 0),
        ];
        let jobs = build_jobs(&lanes, &settings(ExportTopology::Multichannel), Path::new("/out/mix.wav"));
        assert_eq!(jobs.len(), 1);
        let filter = filter_of(&jobs[0]);

        // Lane i's channel lands in [m{i}] regardless of source layout
        assert!(filter.contains("pan=mono|c0=c3[m0]"));
        assert!(filter.contains("pan=mono|c0=c1[m1]"));
        assert!(filter.contains("pan=mono|c0=c0[m2]"));
        assert!(filter.contains("[m0][m1][m2]join=inputs=3:channel_layout=3c:map=0.0-0|1.0-1|2.0-2[out]"));
    }

    #[test]
    fn multichannel_dedups_shared_sources_with_one_split() {
        let lanes = vec![
            lane("/media/a.mov", 0, 0),
            lane("/media/a.mov", 0, 1),
            lane("/media/b.wav", 0, 0),
        ];
        let jobs = build_jobs(&lanes, &settings(ExportTopology::Multichannel), Path::new("/out/mix.wav"));
        let job = &jobs[0];

        // Exactly one -i for the shared source, one for the other
        assert_eq!(count_inputs(job, "/media/a.mov"), 1);
        assert_eq!(count_inputs(job, "/media/b.wav"), 1);

        // One asplit producing exactly as many taps as uses
        let filter = filter_of(job);
        assert_eq!(filter.matches("asplit").count(), 1);
        assert!(filter.contains("[0:a:0]asplit=2[s0_0][s0_1];"));
        assert!(filter.contains("[s0_0]pan=mono|c0=c0[m0];"));
        assert!(filter.contains("[s0_1]pan=mono|c0=c1[m1];"));
        // The unshared input is tapped directly
        assert!(filter.contains("[1:a:0]pan=mono|c0=c0[m2];"));
    }

    #[test]
    fn multichannel_output_extension_follows_codec() {
        let lanes = vec![lane("/media/a.mov", 0, 0)];
        let mut s = settings(ExportTopology::Multichannel);
        s.codec = ExportCodec::Flac;
        let jobs = build_jobs(&lanes, &s, Path::new("/out/mix.wav"));
        assert_eq!(jobs[0].output, PathBuf::from("/out/mix.flac"));
    }

    #[test]
    fn mono_jobs_are_numbered_and_independent() {
        let lanes = vec![lane("/media/drums.mov", 1, 2), lane("/media/bass.wav", 0, 0)];
        let jobs = build_jobs(&lanes, &settings(ExportTopology::MonoFiles), Path::new("/out"));
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].output, PathBuf::from("/out/channel_01_drums.wav"));
        assert_eq!(jobs[1].output, PathBuf::from("/out/channel_02_bass.wav"));

        let args = &jobs[0].args;
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[out]"));
        assert_eq!(filter_of(&jobs[0]), "[0:a:1]pan=mono|c0=c2[out]");
    }

    #[test]
    fn five_lanes_make_three_stereo_pairs_with_duplicated_tail() {
        let lanes: Vec<_> = (0..5).map(|ch| lane("/media/a.mov", 0, ch)).collect();
        let jobs = build_jobs(&lanes, &settings(ExportTopology::StereoPairs), Path::new("/out"));
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[2].output, PathBuf::from("/out/stereo_03.wav"));

        // Last pair: lane 5 (channel 4) fills both left and right
        let filter = filter_of(&jobs[2]);
        assert!(filter.contains("[sl]pan=mono|c0=c4[left];"));
        assert!(filter.contains("[sr]pan=mono|c0=c4[right];"));
        assert!(filter.ends_with("[left][right]amerge=inputs=2[out]"));
    }

    #[test]
    fn stereo_pair_spanning_two_sources_uses_two_inputs() {
        let lanes = vec![lane("/media/a.mov", 0, 0), lane("/media/b.wav", 0, 1)];
        let jobs = build_jobs(&lanes, &settings(ExportTopology::StereoPairs), Path::new("/out"));
        let job = &jobs[0];
        assert_eq!(count_inputs(job, "/media/a.mov"), 1);
        assert_eq!(count_inputs(job, "/media/b.wav"), 1);
        let filter = filter_of(job);
        assert!(filter.contains("[0:a:0]pan=mono|c0=c0[left];"));
        assert!(filter.contains("[1:a:0]pan=mono|c0=c1[right];"));
    }

    #[test]
    fn stereo_pair_sharing_a_source_splits_one_input() {
        let lanes = vec![lane("/media/a.mov", 0, 0), lane("/media/a.mov", 0, 1)];
        let jobs = build_jobs(&lanes, &settings(ExportTopology::StereoPairs), Path::new("/out"));
        let job = &jobs[0];
        assert_eq!(count_inputs(job, "/media/a.mov"), 1);
        let filter = filter_of(job);
        assert!(filter.contains("[0:a:0]asplit=2[sl][sr];"));
        assert!(filter.contains("[sl]pan=mono|c0=c0[left];"));
        assert!(filter.contains("[sr]pan=mono|c0=c1[right];"));
    }

    #[test]
    fn resample_argument_only_when_rate_requested() {
        let lanes = vec![lane("/media/a.mov", 0, 0)];
        let mut s = settings(ExportTopology::Multichannel);
        let jobs = build_jobs(&lanes, &s, Path::new("/out/mix.wav"));
        assert!(!jobs[0].args.iter().any(|a| a == "-ar"));

        s.sample_rate = Some(44100);
        let jobs = build_jobs(&lanes, &s, Path::new("/out/mix.wav"));
        let args = &jobs[0].args;
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "44100"));
    }

    #[test]
    fn empty_lane_list_builds_nothing() {
        assert!(build_jobs(&[], &settings(ExportTopology::Multichannel), Path::new("/o.wav")).is_empty());
        assert!(build_jobs(&[], &settings(ExportTopology::MonoFiles), Path::new("/o")).is_empty());
    }
}
