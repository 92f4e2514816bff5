//! Preview player: versioned loads + cpal output
//!
//! One background worker per load, versioned by an `AtomicU64` generation.
//! The worker decodes each distinct (source, stream) pair once, extracts
//! per-lane channels, pans them across the stereo field and installs the
//! summed buffer — but only if its generation is still current. The cpal
//! callback shares the playback state through a single mutex held only
//! for the memory copy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use crate::ffmpeg::ToolLocator;
use crate::types::{LaneSnapshot, StereoSample};

use super::decode::{decode_stream, equal_power_gains, extract_channel, mix_into, normalize, DecodeOutcome};
use super::{LoadState, PreviewError, PreviewEvent, PreviewResult};

const DEFAULT_DECODE_RATE: u32 = 48_000;

/// Lets in-flight workers observe the shutdown flag before we return
const SHUTDOWN_GRACE: Duration = Duration::from_millis(60);

/// Clonable receiver wrapper for coordinating-thread pumping
pub type PreviewEventReceiver = Arc<Mutex<Receiver<PreviewEvent>>>;

/// Everything the output callback reads; buffer swaps happen under the
/// mutex, flags are plain atomics.
struct PlaybackState {
    buffer: Vec<StereoSample>,
    /// Hz of the installed buffer
    sample_rate: f64,
    /// Next frame to play
    read_pos: usize,
}

struct PlayerShared {
    playback: Mutex<PlaybackState>,
    load_state: AtomicU8,
    /// Bumped on every load and on shutdown; stale workers go quiet
    generation: AtomicU64,
    shutdown: AtomicBool,
    playing: AtomicBool,
    /// Latched by the callback so ReachedEnd fires once per play
    reached_end: AtomicBool,
}

impl PlayerShared {
    fn new() -> Self {
        Self {
            playback: Mutex::new(PlaybackState {
                buffer: Vec::new(),
                sample_rate: DEFAULT_DECODE_RATE as f64,
                read_pos: 0,
            }),
            load_state: AtomicU8::new(LoadState::Empty as u8),
            generation: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            reached_end: AtomicBool::new(false),
        }
    }

    fn load_state(&self) -> LoadState {
        LoadState::from_u8(self.load_state.load(Ordering::SeqCst))
    }

    fn set_load_state(&self, state: LoadState, tx: &Sender<PreviewEvent>) {
        self.load_state.store(state as u8, Ordering::SeqCst);
        let _ = tx.send(PreviewEvent::LoadStateChanged(state));
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
            && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Install a finished mixdown, unless a newer load superseded it
    fn install_buffer(
        &self,
        generation: u64,
        buffer: Vec<StereoSample>,
        sample_rate: f64,
        tx: &Sender<PreviewEvent>,
    ) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        {
            let Ok(mut playback) = self.playback.lock() else {
                return false;
            };
            // Re-check under the lock: a concurrent load may have bumped
            // the generation between the gate above and acquiring it
            if !self.is_current(generation) {
                return false;
            }
            playback.buffer = buffer;
            playback.sample_rate = sample_rate;
            playback.read_pos = 0;
        }
        self.set_load_state(LoadState::Ready, tx);
        true
    }

    /// Mark the load failed, unless a newer load superseded it
    fn fail_load(&self, generation: u64, message: &str, tx: &Sender<PreviewEvent>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        log::warn!("preview load failed: {}", message);
        self.set_load_state(LoadState::Error, tx);
        true
    }
}

/// Mixes the lane stack to stereo and plays it through cpal
///
/// Lives on the coordinating thread; events flow back over the receiver
/// from the output callback and load workers.
pub struct PreviewPlayer {
    shared: Arc<PlayerShared>,
    ffmpeg: Option<PathBuf>,
    event_tx: Sender<PreviewEvent>,
    event_rx: PreviewEventReceiver,
    stream: Option<Stream>,
}

impl PreviewPlayer {
    pub fn new(locator: &ToolLocator) -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        Self {
            shared: Arc::new(PlayerShared::new()),
            ffmpeg: locator.ffmpeg_path().map(|p| p.to_path_buf()),
            event_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
            stream: None,
        }
    }

    /// Get a clonable reference to the event receiver
    pub fn event_receiver(&self) -> PreviewEventReceiver {
        self.event_rx.clone()
    }

    /// Try to receive a single event (non-blocking)
    pub fn try_recv(&self) -> Option<PreviewEvent> {
        self.event_rx.lock().ok().and_then(|rx| rx.try_recv().ok())
    }

    pub fn load_state(&self) -> LoadState {
        self.shared.load_state()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Open the default output device and start the (silent) stream
    pub fn initialize(&mut self) -> PreviewResult<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PreviewError::DeviceUnavailable)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| PreviewError::ConfigUnavailable(e.to_string()))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(PreviewError::StreamBuild(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )));
        }
        let config: StreamConfig = supported.into();
        let channels = config.channels as usize;
        log::info!(
            "preview output: {} ({} channels, {}Hz)",
            device_name,
            channels,
            config.sample_rate.0
        );

        let shared = self.shared.clone();
        let tx = self.event_tx.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| fill_output(&shared, &tx, data, channels),
                |e| log::error!("preview stream error: {}", e),
                None,
            )
            .map_err(|e| PreviewError::StreamBuild(e.to_string()))?;
        stream
            .play()
            .map_err(|e| PreviewError::StreamPlay(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Replace the preview contents with a mixdown of the given lanes
    ///
    /// Returns immediately. Any in-flight load becomes stale; the new one
    /// runs on its own worker thread and reports through the event channel.
    pub fn load_lanes(&self, lanes: &[LaneSnapshot]) {
        self.stop();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if lanes.is_empty() {
            if let Ok(mut playback) = self.shared.playback.lock() {
                playback.buffer.clear();
                playback.read_pos = 0;
            }
            self.shared.set_load_state(LoadState::Empty, &self.event_tx);
            return;
        }

        self.shared.set_load_state(LoadState::Loading, &self.event_tx);

        let shared = self.shared.clone();
        let tx = self.event_tx.clone();
        let ffmpeg = self.ffmpeg.clone();
        let lanes = lanes.to_vec();

        let spawned = thread::Builder::new()
            .name(format!("preview-load-{}", generation))
            .spawn(move || run_load(shared, tx, ffmpeg, lanes, generation));
        if let Err(e) = spawned {
            log::error!("failed to spawn preview load thread: {}", e);
            self.shared.fail_load(generation, "worker spawn failed", &self.event_tx);
        }
    }

    /// Start playback from the top of the buffer
    ///
    /// Only valid in Ready with a non-empty buffer; anything else is a
    /// logged no-op.
    pub fn play(&self) {
        if self.shared.load_state() != LoadState::Ready {
            log::debug!("play ignored: preview not ready");
            return;
        }
        {
            let Ok(mut playback) = self.shared.playback.lock() else {
                return;
            };
            if playback.buffer.is_empty() {
                log::debug!("play ignored: empty preview buffer");
                return;
            }
            playback.read_pos = 0;
        }
        self.shared.reached_end.store(false, Ordering::SeqCst);
        self.shared.playing.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(PreviewEvent::PlaybackStarted);
    }

    /// Stop playback; idempotent, fires only on a real transition
    pub fn stop(&self) {
        if self.shared.playing.swap(false, Ordering::SeqCst) {
            let _ = self.event_tx.send(PreviewEvent::PlaybackStopped);
        }
    }

    /// Tear down the output stream and strand in-flight workers
    ///
    /// Workers notice the shutdown flag (or the generation bump) and exit
    /// without touching shared state; nothing is joined.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.playing.store(false, Ordering::SeqCst);
        self.stream = None;
        thread::sleep(SHUTDOWN_GRACE);
    }
}

impl Drop for PreviewPlayer {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

/// Output callback body: copy from the shared buffer or emit silence
fn fill_output(
    shared: &PlayerShared,
    tx: &Sender<PreviewEvent>,
    data: &mut [f32],
    channels: usize,
) {
    data.fill(0.0);
    if shared.shutdown.load(Ordering::SeqCst)
        || !shared.playing.load(Ordering::SeqCst)
        || shared.load_state() != LoadState::Ready
    {
        return;
    }

    let channels = channels.max(1);
    let (position_secs, ended) = {
        let Ok(mut playback) = shared.playback.lock() else {
            return;
        };
        let frames = data.len() / channels;
        let mut pos = playback.read_pos;
        for frame in 0..frames {
            if pos >= playback.buffer.len() {
                break;
            }
            let sample = playback.buffer[pos];
            let base = frame * channels;
            data[base] = sample.left;
            if channels > 1 {
                data[base + 1] = sample.right;
            }
            pos += 1;
        }
        playback.read_pos = pos;
        (
            pos as f64 / playback.sample_rate.max(1.0),
            pos >= playback.buffer.len(),
        )
    };

    let _ = tx.send(PreviewEvent::PositionChanged(position_secs));
    if ended && !shared.reached_end.swap(true, Ordering::SeqCst) {
        let _ = tx.send(PreviewEvent::ReachedEnd);
    }
}

/// Load worker: decode, extract, pan, sum, normalize, install
fn run_load(
    shared: Arc<PlayerShared>,
    tx: Sender<PreviewEvent>,
    ffmpeg: Option<PathBuf>,
    lanes: Vec<LaneSnapshot>,
    generation: u64,
) {
    let Some(ffmpeg) = ffmpeg else {
        shared.fail_load(generation, "ffmpeg not found", &tx);
        return;
    };

    // All sources resample to the first lane's rate so the mix lines up
    let rate = lanes
        .first()
        .map(|l| l.sample_rate as u32)
        .filter(|&r| r > 0)
        .unwrap_or(DEFAULT_DECODE_RATE);

    let is_stale = || !shared.is_current(generation);

    // Decode each distinct (source, stream) once, however many lanes tap it
    let mut decoded: HashMap<(PathBuf, usize), Vec<f32>> = HashMap::new();
    for lane in &lanes {
        let key = lane.source_key();
        if decoded.contains_key(&key) {
            continue;
        }
        match decode_stream(&ffmpeg, &lane.source, lane.stream_index, rate, &is_stale) {
            DecodeOutcome::Done(samples) => {
                decoded.insert(key, samples);
            }
            DecodeOutcome::Cancelled => return,
            DecodeOutcome::Failed(msg) => {
                shared.fail_load(generation, &msg, &tx);
                return;
            }
        }
    }

    if is_stale() {
        return;
    }

    let mut mix: Vec<StereoSample> = Vec::new();
    for (i, lane) in lanes.iter().enumerate() {
        let interleaved = &decoded[&lane.source_key()];
        let mono = extract_channel(interleaved, lane.total_channels, lane.channel_index);
        let (left, right) = equal_power_gains(i, lanes.len());
        mix_into(&mut mix, &mono, left, right);
    }
    normalize(&mut mix);

    if shared.install_buffer(generation, mix, rate as f64, &tx) {
        log::info!("preview ready: {} lanes at {}Hz", lanes.len(), rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn harness() -> (Arc<PlayerShared>, Sender<PreviewEvent>, Receiver<PreviewEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(PlayerShared::new()), tx, rx)
    }

    fn buffer(len: usize) -> Vec<StereoSample> {
        vec![StereoSample::new(0.5, -0.5); len]
    }

    #[test]
    fn stale_generation_install_is_discarded() {
        let (shared, tx, rx) = harness();
        shared.generation.store(2, Ordering::SeqCst);

        // A worker from generation 1 reports after generation 2 started
        assert!(!shared.install_buffer(1, buffer(16), 48000.0, &tx));
        assert_eq!(shared.load_state(), LoadState::Empty);
        assert!(shared.playback.lock().unwrap().buffer.is_empty());
        assert!(rx.try_recv().is_err());

        // Stale failures are equally silent
        assert!(!shared.fail_load(1, "boom", &tx));
        assert_eq!(shared.load_state(), LoadState::Empty);
    }

    #[test]
    fn current_generation_install_goes_ready() {
        let (shared, tx, rx) = harness();
        shared.generation.store(3, Ordering::SeqCst);

        assert!(shared.install_buffer(3, buffer(8), 44100.0, &tx));
        assert_eq!(shared.load_state(), LoadState::Ready);
        let playback = shared.playback.lock().unwrap();
        assert_eq!(playback.buffer.len(), 8);
        assert_eq!(playback.sample_rate, 44100.0);
        assert_eq!(playback.read_pos, 0);
        drop(playback);
        assert_eq!(
            rx.try_recv().unwrap(),
            PreviewEvent::LoadStateChanged(LoadState::Ready)
        );
    }

    #[test]
    fn shutdown_flag_blocks_installs() {
        let (shared, tx, _rx) = harness();
        shared.generation.store(1, Ordering::SeqCst);
        shared.shutdown.store(true, Ordering::SeqCst);
        assert!(!shared.install_buffer(1, buffer(4), 48000.0, &tx));
    }

    #[test]
    fn play_requires_ready_with_data() {
        let locator = ToolLocator::default();
        let player = PreviewPlayer::new(&locator);

        // Empty state: no event
        player.play();
        assert!(player.try_recv().is_none());
        assert!(!player.is_playing());

        // Install a buffer for the current generation, then play works
        let generation = player.shared.generation.load(Ordering::SeqCst);
        player
            .shared
            .install_buffer(generation, buffer(4), 48000.0, &player.event_tx);
        assert_eq!(player.try_recv(), Some(PreviewEvent::LoadStateChanged(LoadState::Ready)));
        player.play();
        assert!(player.is_playing());
        assert_eq!(player.try_recv(), Some(PreviewEvent::PlaybackStarted));

        // stop is a transition once, then idempotent
        player.stop();
        assert_eq!(player.try_recv(), Some(PreviewEvent::PlaybackStopped));
        player.stop();
        assert!(player.try_recv().is_none());
    }

    #[test]
    fn load_empty_goes_straight_to_empty() {
        let locator = ToolLocator::default();
        let player = PreviewPlayer::new(&locator);
        let generation = player.shared.generation.load(Ordering::SeqCst);
        player
            .shared
            .install_buffer(generation, buffer(4), 48000.0, &player.event_tx);

        player.load_lanes(&[]);
        assert_eq!(player.load_state(), LoadState::Empty);
        assert!(player.shared.playback.lock().unwrap().buffer.is_empty());
    }

    #[test]
    fn load_without_ffmpeg_reports_error_state() {
        let locator = ToolLocator::default();
        let player = PreviewPlayer::new(&locator);
        let lane = LaneSnapshot {
            id: crate::types::LaneId::next(),
            source: PathBuf::from("/tmp/none.wav"),
            stream_index: 0,
            channel_index: 0,
            total_channels: 2,
            sample_rate: 48000.0,
        };
        player.load_lanes(&[lane]);

        let rx = player.event_receiver();
        let rx = rx.lock().unwrap();
        let mut state = player.load_state();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while state != LoadState::Error && std::time::Instant::now() < deadline {
            if let Ok(PreviewEvent::LoadStateChanged(s)) = rx.recv_timeout(Duration::from_millis(100)) {
                state = s;
            }
        }
        assert_eq!(state, LoadState::Error);
    }

    #[test]
    fn callback_advances_cursor_and_latches_end() {
        let (shared, tx, rx) = harness();
        shared.generation.store(1, Ordering::SeqCst);
        assert!(shared.install_buffer(1, buffer(3), 48000.0, &tx));
        let _ = rx.try_recv();
        shared.playing.store(true, Ordering::SeqCst);

        // 2 stereo frames per callback
        let mut data = [1.0f32; 4];
        fill_output(&shared, &tx, &mut data, 2);
        assert_eq!(data, [0.5, -0.5, 0.5, -0.5]);
        assert!(matches!(rx.try_recv(), Ok(PreviewEvent::PositionChanged(_))));

        // Second call drains the last frame and pads with silence
        let mut data = [1.0f32; 4];
        fill_output(&shared, &tx, &mut data, 2);
        assert_eq!(data, [0.5, -0.5, 0.0, 0.0]);
        assert!(matches!(rx.try_recv(), Ok(PreviewEvent::PositionChanged(_))));
        assert_eq!(rx.try_recv(), Ok(PreviewEvent::ReachedEnd));

        // End is latched: no duplicate ReachedEnd
        let mut data = [1.0f32; 4];
        fill_output(&shared, &tx, &mut data, 2);
        assert!(matches!(rx.try_recv(), Ok(PreviewEvent::PositionChanged(_))));
        assert!(rx.try_recv().is_err());
    }
}
