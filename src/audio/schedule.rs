//! Frame-tagged mutations handed from the control thread to the audio thread
//!
//! The control thread never touches the track store. It pushes a
//! `ScheduledMutation` onto an `rtrb` ring buffer; the engine drains the ring
//! at the top of every block into a fixed-capacity pending table and applies
//! each entry once `process_frames` reaches its target. Results flow back as
//! `EngineEvent`s on a second ring buffer.

use std::sync::atomic::{AtomicU64, Ordering};

use super::track::TrackSnapshot;

/// A change to the track store, applied by the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    StartRecording { track: usize, group: usize, repeat: bool },
    StartOverdub { track: usize, group: usize },
    /// Ends a take or overdub, or replays a track in step with the loop
    Play { track: usize },
    Mute { track: usize },
    Unmute { track: usize },
    AddToGroup { track: usize, group: usize },
    RemoveFromGroup { track: usize, group: usize },
    SetActiveGroup { group: usize },
    SetMonitoring { enabled: bool },
    Reset,
}

impl Mutation {
    /// The track whose playback state this mutation changes.
    ///
    /// Only one such mutation may be pending per track. Group edits do not
    /// count: they never race with a track's own state changes.
    pub fn track(&self) -> Option<usize> {
        match *self {
            Mutation::StartRecording { track, .. }
            | Mutation::StartOverdub { track, .. }
            | Mutation::Play { track }
            | Mutation::Mute { track }
            | Mutation::Unmute { track } => Some(track),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledMutation {
    /// Monotonic id assigned by the control thread
    pub seq: u64,
    /// Earliest `process_frames` at which the mutation may be applied
    pub target_frame: u64,
    pub mutation: Mutation,
}

/// Notifications from the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Mutation `seq` took effect at the block starting at `frame`.
    Applied {
        seq: u64,
        track: Option<usize>,
        frame: u64,
    },
    /// Mutation `seq` no longer matched the track's state and was ignored.
    Dropped { seq: u64, track: Option<usize> },
    /// A newer mutation for `track` replaced pending mutation `seq`.
    Superseded { track: usize, seq: u64 },
    TrackChanged(TrackSnapshot),
    MasterLength { group: usize, length: usize },
    /// Recording hit the end of the buffer and was stopped.
    CapacityExceeded { track: usize, length: usize },
}

/// Frame count of the most recent block, published by the audio thread,
/// and a count of engine events that found no room on the event ring.
#[derive(Debug, Default)]
pub struct FrameClock {
    frames: AtomicU64,
    dropped_events: AtomicU64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frames: u64) {
        self.frames.store(frames, Ordering::Release);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn record_dropped(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

/// What happened when a mutation entered the pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Replaced the pending mutation with this sequence number
    Superseded(u64),
}

/// Mutations waiting for their target frame.
///
/// Capacity is fixed at construction; the table never grows.
#[derive(Debug)]
pub struct PendingMutations {
    entries: Vec<ScheduledMutation>,
    capacity: usize,
}

impl PendingMutations {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Insert a mutation. A pending mutation for the same track is replaced
    /// (newer wins). Returns `None` when the table is full.
    pub fn admit(&mut self, scheduled: ScheduledMutation) -> Option<Admission> {
        if let Some(track) = scheduled.mutation.track()
            && let Some(existing) = self
                .entries
                .iter_mut()
                .find(|entry| entry.mutation.track() == Some(track))
        {
            let replaced = existing.seq;
            *existing = scheduled;
            return Some(Admission::Superseded(replaced));
        }
        if self.is_full() {
            return None;
        }
        self.entries.push(scheduled);
        Some(Admission::Queued)
    }

    /// Remove and return the next mutation due at `frame`, earliest target
    /// first and in submission order among equal targets.
    pub fn pop_due(&mut self, frame: u64) -> Option<ScheduledMutation> {
        let (index, _) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.target_frame <= frame)
            .min_by_key(|(_, entry)| (entry.target_frame, entry.seq))?;
        Some(self.entries.swap_remove(index))
    }

    /// Forget everything submitted before `seq`.
    pub fn discard_before(&mut self, seq: u64) {
        self.entries.retain(|entry| entry.seq > seq);
    }
}
