//! Lane store: the ordered stack of channels
//!
//! The store owns every [`Lane`] and is the single source of truth for
//! stack order. It is *not* thread-safe by design: all mutation and all
//! listener delivery happen on the coordinating thread. Background work
//! receives [`LaneSnapshot`]s, never live references.
//!
//! Listeners are registered closures invoked synchronously, in
//! registration order, after each mutation. Cross-thread completions must
//! be marshaled onto the coordinating thread before calling back in.

use crate::types::{Lane, LaneId, LaneSnapshot, WaveformEnvelope};

/// Change notification fired by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneStoreEvent {
    /// A lane was appended at `index`
    LaneAdded { id: LaneId, index: usize },
    /// The lane at `index` was removed (indices above it shifted down)
    LaneRemoved { index: usize },
    /// Lane order changed (single event per move, not per item)
    LanesReordered,
    /// The lane's waveform envelope was installed or replaced
    LaneWaveformUpdated { id: LaneId },
}

/// Handle for unregistering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type ListenerFn = Box<dyn FnMut(&LaneStoreEvent)>;

/// Ordered collection of lanes with change notification
#[derive(Default)]
pub struct LaneStore {
    lanes: Vec<Lane>,
    listeners: Vec<(ListenerId, ListenerFn)>,
    next_listener: u64,
}

impl LaneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Lane> {
        self.lanes.get(index)
    }

    pub fn get_by_id(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: LaneId) -> Option<usize> {
        self.lanes.iter().position(|l| l.id == id)
    }

    /// All lanes in stack order. The borrow is valid only until the next
    /// mutation; callers must not hold it across anything that can
    /// re-enter the store.
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Plain-value copies for background jobs
    pub fn snapshot(&self) -> Vec<LaneSnapshot> {
        self.lanes.iter().map(Lane::snapshot).collect()
    }

    /// Append a lane and notify
    pub fn add(&mut self, lane: Lane) -> LaneId {
        let id = lane.id;
        let index = self.lanes.len();
        self.lanes.push(lane);
        log::debug!("LaneStore: added {} at index {}", id, index);
        self.emit(LaneStoreEvent::LaneAdded { id, index });
        id
    }

    /// Remove the lane at `index`. Invalid indices log and no-op; callers
    /// that need certainty compare `len()` before and after.
    pub fn remove(&mut self, index: usize) {
        if index >= self.lanes.len() {
            log::warn!(
                "LaneStore: remove({}) out of bounds (len {})",
                index,
                self.lanes.len()
            );
            return;
        }
        let lane = self.lanes.remove(index);
        log::debug!("LaneStore: removed {} from index {}", lane.id, index);
        self.emit(LaneStoreEvent::LaneRemoved { index });
    }

    /// Remove by identity; no-op if the lane is already gone
    pub fn remove_by_id(&mut self, id: LaneId) {
        if let Some(index) = self.index_of(id) {
            self.remove(index);
        }
    }

    /// Move the lane at `from` to position `to`, where `to` is expressed in
    /// pre-removal coordinates and may equal `len()` (insert at end).
    ///
    /// `to == from` and `to == from + 1` both describe "leave in place"
    /// (removal collapses the gap) and are no-ops with no notification.
    pub fn move_lane(&mut self, from: usize, to: usize) {
        let len = self.lanes.len();
        if from >= len {
            log::warn!("LaneStore: move from {} out of bounds (len {})", from, len);
            return;
        }
        if to > len {
            log::warn!("LaneStore: move to {} out of bounds (len {})", to, len);
            return;
        }
        if to == from || to == from + 1 {
            return;
        }

        // Removal shifts everything after `from` down one, so a target past
        // the source lands one slot earlier than requested.
        let insert = if to > from { to - 1 } else { to };
        let lane = self.lanes.remove(from);
        self.lanes.insert(insert, lane);

        log::debug!("LaneStore: moved {} -> {} (insert {})", from, to, insert);
        self.emit(LaneStoreEvent::LanesReordered);
    }

    /// Remove all lanes, tail first, firing one `LaneRemoved` per lane with
    /// index = new length after each pop. Incremental listeners stay
    /// correct without special-casing bulk clear.
    pub fn clear(&mut self) {
        while self.lanes.pop().is_some() {
            let index = self.lanes.len();
            self.emit(LaneStoreEvent::LaneRemoved { index });
        }
    }

    /// Install a freshly computed envelope and notify. Replacement is
    /// wholesale so readers never observe a half-written envelope.
    pub fn install_waveform(&mut self, id: LaneId, envelope: WaveformEnvelope) {
        let Some(lane) = self.lanes.iter_mut().find(|l| l.id == id) else {
            // Lane removed while the extraction was in flight
            log::debug!("LaneStore: waveform for vanished {}", id);
            return;
        };
        lane.waveform = envelope;
        self.emit(LaneStoreEvent::LaneWaveformUpdated { id });
    }

    pub fn add_listener(&mut self, f: impl FnMut(&LaneStoreEvent) + 'static) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, Box::new(f)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    fn emit(&mut self, event: LaneStoreEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}
