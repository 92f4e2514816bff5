//! Coordinating-thread session
//!
//! `StackSession` ties the subsystems together: it owns the store, probes
//! files in the background, marshals worker results back onto the
//! coordinating thread via `pump()`, keeps the preview in sync with a
//! debounced reload, and kicks off exports.
//!
//! Everything here runs on one thread. Background workers only ever see
//! snapshots and channel senders.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::export::{build_jobs, ExportProgress, ExportRunner, ExportSettings};
use crate::ffmpeg::{AudioStreamInfo, MediaProber, ProbeResult, ToolLocator};
use crate::model::LaneStore;
use crate::preview::{PreviewEvent, PreviewPlayer, PreviewResult};
use crate::types::{Lane, LaneId};
use crate::waveform::WaveformExtractor;

/// Quiet period after the last stack change before the preview reloads.
/// Batching absorbs bursts like "add an 8-channel file" into one decode.
const PREVIEW_DEBOUNCE: Duration = Duration::from_millis(300);

struct ProbeOutcome {
    path: PathBuf,
    result: ProbeResult<Vec<AudioStreamInfo>>,
}

/// One stack of lanes plus the machinery that keeps it alive
pub struct StackSession {
    store: LaneStore,
    locator: ToolLocator,
    extractor: WaveformExtractor,
    player: PreviewPlayer,
    probe_tx: Sender<ProbeOutcome>,
    probe_rx: Receiver<ProbeOutcome>,
    /// Set on any structural change; cleared when the debounce fires
    dirty_since: Option<Instant>,
    /// Most recent extraction failure per lane, for the UI layer
    extraction_errors: HashMap<LaneId, String>,
    probe_failures: Vec<(PathBuf, String)>,
}

impl StackSession {
    pub fn new(locator: ToolLocator) -> Self {
        let (probe_tx, probe_rx) = mpsc::channel();
        Self {
            store: LaneStore::new(),
            extractor: WaveformExtractor::new(locator.clone()),
            player: PreviewPlayer::new(&locator),
            locator,
            probe_tx,
            probe_rx,
            dirty_since: None,
            extraction_errors: HashMap::new(),
            probe_failures: Vec::new(),
        }
    }

    pub fn store(&self) -> &LaneStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LaneStore {
        &mut self.store
    }

    pub fn locator(&self) -> &ToolLocator {
        &self.locator
    }

    pub fn player(&self) -> &PreviewPlayer {
        &self.player
    }

    /// Open the audio output for preview playback
    pub fn initialize_audio(&mut self) -> PreviewResult<()> {
        self.player.initialize()
    }

    /// Probe a media file in the background
    ///
    /// Returns immediately; the result lands in a later `pump()`, which
    /// creates one lane per channel of the file's first audio stream.
    pub fn add_file(&self, path: &Path) {
        let prober = MediaProber::new(self.locator.clone());
        let tx = self.probe_tx.clone();
        let path = path.to_path_buf();
        log::info!("probing {:?}", path);

        let spawned = thread::Builder::new()
            .name("probe".to_string())
            .spawn(move || {
                let result = prober.probe(&path);
                let _ = tx.send(ProbeOutcome { path, result });
            });
        if let Err(e) = spawned {
            log::error!("failed to spawn probe thread: {}", e);
        }
    }

    /// Remove the lane at `index`
    pub fn remove_lane(&mut self, index: usize) {
        if let Some(lane) = self.store.get(index) {
            let id = lane.id;
            self.extractor.cancel(id);
            self.extraction_errors.remove(&id);
        }
        let before = self.store.len();
        self.store.remove(index);
        if self.store.len() != before {
            self.mark_dirty();
        }
    }

    /// Move the lane at `from` to pre-removal position `to`
    pub fn move_lane(&mut self, from: usize, to: usize) {
        let before: Vec<LaneId> = self.store.lanes().iter().map(|l| l.id).collect();
        self.store.move_lane(from, to);
        let after: Vec<LaneId> = self.store.lanes().iter().map(|l| l.id).collect();
        if before != after {
            self.mark_dirty();
        }
    }

    /// Remove every lane
    pub fn clear(&mut self) {
        if self.store.is_empty() {
            return;
        }
        self.extractor.cancel_all();
        self.extraction_errors.clear();
        self.store.clear();
        self.mark_dirty();
    }

    pub fn play(&self) {
        self.player.play();
    }

    pub fn stop(&self) {
        self.player.stop();
    }

    /// Failure message for a lane whose waveform extraction failed
    pub fn extraction_error(&self, id: LaneId) -> Option<&str> {
        self.extraction_errors.get(&id).map(String::as_str)
    }

    /// Probe failures accumulated since the last call
    pub fn take_probe_failures(&mut self) -> Vec<(PathBuf, String)> {
        std::mem::take(&mut self.probe_failures)
    }

    /// Drain worker results and apply them on this thread
    ///
    /// Call regularly (each UI tick). Installs probe results and waveform
    /// envelopes, reacts to player events, and reloads the preview once
    /// the stack has been quiet for the debounce window.
    pub fn pump(&mut self) {
        while let Ok(outcome) = self.probe_rx.try_recv() {
            match outcome.result {
                Ok(streams) => self.apply_probe_result(&outcome.path, &streams),
                Err(e) => {
                    log::error!("probe of {:?} failed: {}", outcome.path, e);
                    self.probe_failures.push((outcome.path, e.to_string()));
                }
            }
        }

        while let Some(result) = self.extractor.try_recv() {
            match result.result {
                Ok(envelope) => {
                    self.extraction_errors.remove(&result.lane_id);
                    self.store.install_waveform(result.lane_id, envelope);
                }
                Err(msg) => {
                    self.extraction_errors.insert(result.lane_id, msg);
                }
            }
        }

        while let Some(event) = self.player.try_recv() {
            if event == PreviewEvent::ReachedEnd {
                self.player.stop();
            }
        }

        if self
            .dirty_since
            .is_some_and(|since| since.elapsed() >= PREVIEW_DEBOUNCE)
        {
            self.dirty_since = None;
            self.player.load_lanes(&self.store.snapshot());
        }
    }

    /// Build and start an export of the current stack
    ///
    /// For the multichannel topology `destination` is the output file;
    /// for the batch topologies it is the output directory.
    pub fn export(&self, settings: &ExportSettings, destination: &Path) -> Receiver<ExportProgress> {
        let jobs = build_jobs(&self.store.snapshot(), settings, destination);
        log::info!("export: {} job(s) to {:?}", jobs.len(), destination);
        ExportRunner::new(&self.locator).run(jobs)
    }

    /// Cancel background work and close the audio output
    pub fn shutdown(&mut self) {
        self.extractor.cancel_all();
        self.player.shutdown();
    }

    fn mark_dirty(&mut self) {
        self.dirty_since = Some(Instant::now());
    }

    /// Turn a probe result into lanes: one per channel of the first
    /// audio stream. Later streams are ignored (a lane addresses any
    /// stream, but file-drop only surfaces the first).
    fn apply_probe_result(&mut self, path: &Path, streams: &[AudioStreamInfo]) {
        let Some(stream) = streams.iter().find(|s| s.channels > 0) else {
            log::warn!("{:?} has no audio channels", path);
            self.probe_failures
                .push((path.to_path_buf(), "no audio streams".to_string()));
            return;
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());

        for channel in 0..stream.channels {
            let lane = Lane::new(
                path.to_path_buf(),
                stream.stream_index,
                channel,
                stream.channels,
                stream.sample_rate,
                format!("{} [{}:{}]", stem, stream.stream_index, channel),
            );
            let snapshot = lane.snapshot();
            self.store.add(lane);
            self.extractor.start(snapshot);
        }
        log::info!(
            "added {} lane(s) from {:?} (stream {})",
            stream.channels,
            path,
            stream.stream_index
        );
        self.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::LoadState;

    fn stream(index: usize, channels: usize) -> AudioStreamInfo {
        AudioStreamInfo {
            stream_index: index,
            channels,
            sample_rate: 48000.0,
            codec: "pcm_s24le".to_string(),
            channel_layout: String::new(),
            duration: 10.0,
            bit_rate: 0,
        }
    }

    fn session() -> StackSession {
        StackSession::new(ToolLocator::default())
    }

    #[test]
    fn probe_result_creates_one_lane_per_channel() {
        let mut s = session();
        s.apply_probe_result(Path::new("/media/drums.mov"), &[stream(0, 4)]);

        assert_eq!(s.store().len(), 4);
        for (i, lane) in s.store().lanes().iter().enumerate() {
            assert_eq!(lane.channel_index, i);
            assert_eq!(lane.total_channels, 4);
            assert_eq!(lane.stream_index, 0);
            assert_eq!(lane.display_name, format!("drums [0:{}]", i));
        }
    }

    #[test]
    fn only_the_first_audio_stream_becomes_lanes() {
        let mut s = session();
        s.apply_probe_result(Path::new("/media/a.mov"), &[stream(1, 2), stream(2, 6)]);
        assert_eq!(s.store().len(), 2);
        assert_eq!(s.store().get(0).unwrap().stream_index, 1);
    }

    #[test]
    fn zero_channel_probe_is_a_recorded_failure() {
        let mut s = session();
        s.apply_probe_result(Path::new("/media/silent.mov"), &[]);
        assert_eq!(s.store().len(), 0);
        let failures = s.take_probe_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, PathBuf::from("/media/silent.mov"));
    }

    #[test]
    fn preview_reload_waits_for_the_quiet_window() {
        let mut s = session();
        s.apply_probe_result(Path::new("/media/a.mov"), &[stream(0, 2)]);

        // Fresh change: pump must not reload yet
        s.pump();
        assert_eq!(s.player().load_state(), LoadState::Empty);

        // Backdate the change past the debounce window, then pump reloads.
        // The load worker fails later (no ffmpeg); Loading is synchronous.
        s.dirty_since = Some(Instant::now() - PREVIEW_DEBOUNCE * 2);
        s.pump();
        assert_ne!(s.player().load_state(), LoadState::Empty);
        assert!(s.dirty_since.is_none());
    }

    #[test]
    fn clearing_an_empty_session_stays_clean() {
        let mut s = session();
        s.clear();
        assert!(s.dirty_since.is_none());
    }

    #[test]
    fn structural_noops_do_not_mark_dirty() {
        let mut s = session();
        s.apply_probe_result(Path::new("/media/a.mov"), &[stream(0, 2)]);
        s.dirty_since = None;

        s.move_lane(0, 0);
        s.move_lane(0, 1);
        s.remove_lane(9);
        assert!(s.dirty_since.is_none());

        s.move_lane(0, 2);
        assert!(s.dirty_since.is_some());
    }

    #[test]
    fn export_with_empty_stack_reports_zero_jobs() {
        let s = session();
        let rx = s.export(&ExportSettings::default(), Path::new("/tmp/out.wav"));
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            ExportProgress::Started { total } => assert_eq!(total, 0),
            other => panic!("expected Started, got {:?}", other),
        }
    }
}
