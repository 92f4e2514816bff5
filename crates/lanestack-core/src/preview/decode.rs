//! Preview decode and mixdown helpers
//!
//! The decode side shells out to ffmpeg for raw f32 PCM, streaming stdout
//! in bounded chunks with a staleness check between reads. The mixdown
//! side is pure: channel extraction, equal-power pan gains, stereo
//! accumulation and peak normalization.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::types::{Sample, StereoSample, DECODE_CHUNK_BYTES, MAX_DECODE_BYTES};

/// Outcome of decoding one (source, stream) pair
pub(crate) enum DecodeOutcome {
    Done(Vec<f32>),
    /// The load generation moved on; nothing was produced
    Cancelled,
    Failed(String),
}

/// Decode one audio stream to interleaved f32 samples at a fixed rate
///
/// Blocking; callers run this on the load worker thread. `is_stale`
/// is polled between reads; a stale decode kills the subprocess and
/// returns `Cancelled`.
pub(crate) fn decode_stream(
    ffmpeg: &Path,
    source: &Path,
    stream_index: usize,
    sample_rate: u32,
    is_stale: &dyn Fn() -> bool,
) -> DecodeOutcome {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-v", "error", "-nostdin", "-i"])
        .arg(source)
        .arg("-map")
        .arg(format!("0:a:{}", stream_index))
        .arg("-ar")
        .arg(sample_rate.to_string())
        .args(["-f", "f32le", "-acodec", "pcm_f32le", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return DecodeOutcome::Failed(format!("failed to start ffmpeg: {}", e)),
    };
    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return DecodeOutcome::Failed("ffmpeg stdout not captured".to_string());
    };

    let mut raw = Vec::new();
    let mut chunk = vec![0u8; DECODE_CHUNK_BYTES];
    let mut capped = false;
    loop {
        if is_stale() {
            let _ = child.kill();
            let _ = child.wait();
            return DecodeOutcome::Cancelled;
        }
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                raw.extend_from_slice(&chunk[..n]);
                if raw.len() > MAX_DECODE_BYTES {
                    log::warn!("preview decode of {:?} hit the memory cap, truncating", source);
                    capped = true;
                    break;
                }
            }
            Err(_) => break,
        }
    }
    drop(stdout);

    if capped {
        let _ = child.kill();
    }
    let _ = child.wait();

    if raw.is_empty() {
        return DecodeOutcome::Failed(format!("no audio data decoded from {:?}", source));
    }

    let samples = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    DecodeOutcome::Done(samples)
}

/// Pull one channel out of an interleaved buffer
pub(crate) fn extract_channel(
    interleaved: &[f32],
    total_channels: usize,
    channel_index: usize,
) -> Vec<f32> {
    let total_channels = total_channels.max(1);
    let channel_index = channel_index.min(total_channels - 1);
    interleaved
        .iter()
        .skip(channel_index)
        .step_by(total_channels)
        .copied()
        .collect()
}

/// Equal-power pan gains for lane `index` of `count`
///
/// Lanes spread left to right across the stack; a single lane sits
/// dead center. `l = cos(pan·π/2)`, `r = sin(pan·π/2)` keeps perceived
/// loudness constant across the arc.
pub(crate) fn equal_power_gains(index: usize, count: usize) -> (Sample, Sample) {
    let pan = if count <= 1 {
        0.5
    } else {
        index as f32 / (count - 1) as f32
    };
    let angle = pan * std::f32::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Accumulate a panned mono signal into the stereo buffer
///
/// The accumulator grows to the longest contribution; shorter lanes
/// simply stop contributing early.
pub(crate) fn mix_into(acc: &mut Vec<StereoSample>, mono: &[f32], left: Sample, right: Sample) {
    if acc.len() < mono.len() {
        acc.resize(mono.len(), StereoSample::silence());
    }
    for (out, &sample) in acc.iter_mut().zip(mono) {
        out.left += sample * left;
        out.right += sample * right;
    }
}

/// Scale the mix down to a 0.9 peak when summing pushed it past full scale
pub(crate) fn normalize(buffer: &mut [StereoSample]) {
    let peak = buffer
        .iter()
        .map(StereoSample::peak)
        .fold(0.0f32, f32::max);
    if peak > 1.0 {
        let factor = 0.9 / peak;
        for sample in buffer.iter_mut() {
            *sample = sample.scale(factor);
        }
    }
}
