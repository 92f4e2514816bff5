//! Per-lane waveform envelope extraction
//!
//! Each lane gets at most one live extraction job, keyed by its id.
//! A job decodes the lane's stream to raw f32 PCM through ffmpeg, streams
//! stdout in bounded chunks, and reduces the lane's single channel to a
//! fixed-resolution min/max envelope.
//!
//! Results arrive as messages on an mpsc channel; the coordinating thread
//! drains them and installs envelopes into the store. Cancelled jobs send
//! nothing and touch nothing.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::ffmpeg::ToolLocator;
use crate::types::{
    LaneId, LaneSnapshot, WaveformEnvelope, DECODE_CHUNK_BYTES, ENVELOPE_POINTS, MAX_DECODE_BYTES,
};

/// Bounded wait for the decoder after its output has been consumed
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal message for one extraction job
///
/// `result` is `Err` when the tool is missing, the subprocess could not be
/// started, or the decode produced no data. Cancellation produces no
/// message at all.
#[derive(Debug)]
pub struct WaveformResult {
    pub lane_id: LaneId,
    pub result: Result<WaveformEnvelope, String>,
}

/// Clonable receiver wrapper for coordinating-thread pumping
pub type WaveformResultReceiver = Arc<Mutex<Receiver<WaveformResult>>>;

struct ExtractionJob {
    /// Distinguishes this job from a successor for the same lane
    seq: u64,
    cancelled: Arc<AtomicBool>,
    /// Kill target; populated once the subprocess is spawned
    child: Arc<Mutex<Option<Child>>>,
}

impl ExtractionJob {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(child) = self.child.lock().expect("job child lock").as_mut() {
            let _ = child.kill();
        }
    }
}

/// Manages one cancellable background extraction per lane
pub struct WaveformExtractor {
    locator: ToolLocator,
    jobs: Arc<Mutex<HashMap<LaneId, ExtractionJob>>>,
    next_seq: AtomicU64,
    result_tx: Sender<WaveformResult>,
    result_rx: WaveformResultReceiver,
}

impl WaveformExtractor {
    pub fn new(locator: ToolLocator) -> Self {
        let (result_tx, result_rx) = mpsc::channel();
        Self {
            locator,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(1),
            result_tx,
            result_rx: Arc::new(Mutex::new(result_rx)),
        }
    }

    /// Get a clonable reference to the result receiver
    pub fn result_receiver(&self) -> WaveformResultReceiver {
        self.result_rx.clone()
    }

    /// Try to receive a single result (non-blocking)
    pub fn try_recv(&self) -> Option<WaveformResult> {
        self.result_rx
            .lock()
            .ok()
            .and_then(|rx| rx.try_recv().ok())
    }

    /// Start extraction for a lane, cancelling any live job for the same id
    pub fn start(&self, lane: LaneSnapshot) {
        self.cancel(lane.id);

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let child = Arc::new(Mutex::new(None));

        self.jobs.lock().expect("jobs lock").insert(
            lane.id,
            ExtractionJob {
                seq,
                cancelled: cancelled.clone(),
                child: child.clone(),
            },
        );

        let ffmpeg = self.locator.ffmpeg_path().map(PathBuf::from);
        let jobs = self.jobs.clone();
        let tx = self.result_tx.clone();
        let lane_id = lane.id;

        thread::Builder::new()
            .name(format!("waveform-{}", lane_id.as_u64()))
            .spawn(move || {
                run_extraction(lane, ffmpeg, cancelled.clone(), child, tx);

                // Remove our own entry, but never a successor's
                let mut jobs = jobs.lock().expect("jobs lock");
                if jobs.get(&lane_id).is_some_and(|j| j.seq == seq) {
                    jobs.remove(&lane_id);
                }
            })
            .expect("failed to spawn waveform extraction thread");
    }

    /// Cancel the live job for a lane, if any
    pub fn cancel(&self, lane_id: LaneId) {
        if let Some(job) = self.jobs.lock().expect("jobs lock").get(&lane_id) {
            log::debug!("cancelling waveform job for {}", lane_id);
            job.cancel();
        }
    }

    /// Cancel every live job
    pub fn cancel_all(&self) {
        for job in self.jobs.lock().expect("jobs lock").values() {
            job.cancel();
        }
    }
}

impl Drop for WaveformExtractor {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn run_extraction(
    lane: LaneSnapshot,
    ffmpeg: Option<PathBuf>,
    cancelled: Arc<AtomicBool>,
    child_slot: Arc<Mutex<Option<Child>>>,
    tx: Sender<WaveformResult>,
) {
    if cancelled.load(Ordering::SeqCst) {
        return;
    }

    let fail = |tx: &Sender<WaveformResult>, msg: String| {
        log::warn!("waveform extraction failed for {}: {}", lane.id, msg);
        let _ = tx.send(WaveformResult {
            lane_id: lane.id,
            result: Err(msg),
        });
    };

    let Some(ffmpeg) = ffmpeg else {
        fail(&tx, "ffmpeg not found".to_string());
        return;
    };

    // ffmpeg -v error -nostdin -i <file> -map 0:a:<stream>
    //        -f f32le -acodec pcm_f32le -
    let mut cmd = Command::new(&ffmpeg);
    cmd.args(["-v", "error", "-nostdin", "-i"])
        .arg(&lane.source)
        .arg("-map")
        .arg(format!("0:a:{}", lane.stream_index))
        .args(["-f", "f32le", "-acodec", "pcm_f32le", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            fail(&tx, format!("failed to start ffmpeg: {}", e));
            return;
        }
    };

    let mut stdout = child.stdout.take().expect("piped stdout");
    *child_slot.lock().expect("job child lock") = Some(child);

    // Stream stdout with the cancel flag checked between reads. A kill from
    // cancel() closes the pipe, so a blocked read wakes promptly.
    let mut raw = Vec::new();
    let mut chunk = vec![0u8; DECODE_CHUNK_BYTES];
    let mut capped = false;
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                raw.extend_from_slice(&chunk[..n]);
                if raw.len() > MAX_DECODE_BYTES {
                    log::warn!("waveform decode for {} hit the memory cap, truncating", lane.id);
                    capped = true;
                    break;
                }
            }
            Err(_) => break,
        }
    }
    drop(stdout);

    // Reap the child; kill it outright when we stopped consuming early
    if let Some(mut child) = child_slot.lock().expect("job child lock").take() {
        if capped {
            let _ = child.kill();
            let _ = child.wait();
        } else {
            let deadline = Instant::now() + DRAIN_TIMEOUT;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() >= deadline => {
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                    Ok(None) => thread::sleep(Duration::from_millis(10)),
                    Err(_) => break,
                }
            }
        }
    }

    if cancelled.load(Ordering::SeqCst) {
        return;
    }

    let samples = bytes_to_f32(&raw);
    if samples.is_empty() {
        fail(&tx, "no audio data decoded".to_string());
        return;
    }

    let envelope = compute_envelope(&samples, lane.total_channels, lane.channel_index);

    if cancelled.load(Ordering::SeqCst) {
        return;
    }
    let _ = tx.send(WaveformResult {
        lane_id: lane.id,
        result: Ok(envelope),
    });
}

/// Reinterpret little-endian raw bytes as f32 samples, dropping any tail
fn bytes_to_f32(raw: &[u8]) -> Vec<f32> {
    raw.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Reduce one channel of interleaved samples to a min/max envelope
///
/// Bucketing: `samples_per_point = max(1, frames / ENVELOPE_POINTS)` and
/// `num_points = ceil(frames / samples_per_point)`, so short decodes get
/// one point per frame and long ones land close to the target resolution.
/// Min and max are the true signed extrema of each bucket.
pub fn compute_envelope(
    interleaved: &[f32],
    total_channels: usize,
    channel_index: usize,
) -> WaveformEnvelope {
    let total_channels = total_channels.max(1);
    let frames = interleaved.len() / total_channels;
    if frames == 0 {
        return WaveformEnvelope::default();
    }

    let samples_per_point = (frames / ENVELOPE_POINTS).max(1);
    let num_points = frames.div_ceil(samples_per_point);

    let mut env = WaveformEnvelope {
        min: Vec::with_capacity(num_points),
        max: Vec::with_capacity(num_points),
        num_points,
        is_ready: false,
    };

    for point in 0..num_points {
        let start = point * samples_per_point;
        let end = (start + samples_per_point).min(frames);

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for frame in start..end {
            let idx = frame * total_channels + channel_index;
            if let Some(&sample) = interleaved.get(idx) {
                min = min.min(sample);
                max = max.max(sample);
            }
        }
        if min.is_infinite() {
            min = 0.0;
        }
        if max.is_infinite() {
            max = 0.0;
        }
        env.min.push(min);
        env.max.push(max);
    }

    env.is_ready = true;
    env
}
