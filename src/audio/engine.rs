use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;

use super::mixer::add_into;
use super::schedule::{
    Admission, EngineEvent, FrameClock, Mutation, PendingMutations, ScheduledMutation,
};
use super::store::TrackStore;
use super::track::TrackState;
use crate::config::LooperConfig;
use crate::error::{LooperError, LooperResult};
use crate::timing::{TimerKind, Timers};

/// The real-time side of the looper.
///
/// Owns the track store outright and is driven once per audio block by
/// [`LooperEngine::process`]. Nothing in the block path allocates, locks or
/// logs; all communication goes through the two ring buffers.
pub struct LooperEngine {
    store: TrackStore,
    pending: PendingMutations,
    mutations: Consumer<ScheduledMutation>,
    events: Producer<EngineEvent>,
    clock: Arc<FrameClock>,
    timers: Arc<Timers>,
    process_frames: u64,
    monitoring_off: bool,
    default_monitoring_off: bool,
    // Event ring slots kept free for acknowledgements.
    ack_reserve: usize,
}

/// Control-thread end of the engine's queues.
pub struct EngineHandle {
    mutations: Producer<ScheduledMutation>,
    events: Consumer<EngineEvent>,
    clock: Arc<FrameClock>,
}

impl EngineHandle {
    /// `process_frames` as of the most recently started block.
    pub fn frames(&self) -> u64 {
        self.clock.frames()
    }

    pub fn schedule(&mut self, scheduled: ScheduledMutation) -> LooperResult<()> {
        self.mutations
            .push(scheduled)
            .map_err(|_| LooperError::QueueFull)
    }

    pub fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop().ok()
    }

    /// Events the engine could not deliver.
    pub fn dropped_events(&self) -> u64 {
        self.clock.dropped_events()
    }
}

impl LooperEngine {
    pub fn new(config: &LooperConfig, timers: Arc<Timers>) -> (Self, EngineHandle) {
        let (mutation_tx, mutation_rx) = RingBuffer::new(config.queue_capacity);
        // Each applied mutation reports a handful of events; a reset reports
        // every track and group.
        let event_capacity =
            config.queue_capacity * 4 + (config.num_tracks + config.num_groups) * 2;
        // The control thread drains the ring before each schedule, so at most
        // a full queue plus a full pending table await acknowledgement, and
        // each take can fill its buffer once.
        let ack_reserve = config.queue_capacity * 2 + config.num_tracks;
        let (event_tx, event_rx) = RingBuffer::new(event_capacity);
        let clock = Arc::new(FrameClock::new());

        let engine = Self {
            store: TrackStore::new(
                config.num_tracks,
                config.num_groups,
                config.track_capacity(),
            ),
            pending: PendingMutations::new(config.queue_capacity),
            mutations: mutation_rx,
            events: event_tx,
            clock: Arc::clone(&clock),
            timers,
            process_frames: 0,
            monitoring_off: config.monitoring_off,
            default_monitoring_off: config.monitoring_off,
            ack_reserve,
        };
        let handle = EngineHandle {
            mutations: mutation_tx,
            events: event_rx,
            clock,
        };
        (engine, handle)
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    pub fn process_frames(&self) -> u64 {
        self.process_frames
    }

    pub fn monitoring_off(&self) -> bool {
        self.monitoring_off
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Process one block of stereo audio.
    ///
    /// The block length is the shortest of the four slices. Output is the
    /// mixdown of the active group plus, unless monitoring is off, the input.
    pub fn process(
        &mut self,
        in_left: &[f32],
        in_right: &[f32],
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let nframes = in_left
            .len()
            .min(in_right.len())
            .min(out_left.len())
            .min(out_right.len());
        self.timers.stop(TimerKind::ProcessToProcessTime);
        self.timers.start(TimerKind::ProcessToProcessTime);

        self.receive_mutations();
        self.apply_due_mutations();
        self.clock.publish(self.process_frames);

        let (in_left, in_right) = (&in_left[..nframes], &in_right[..nframes]);
        let (out_left, out_right) = (&mut out_left[..nframes], &mut out_right[..nframes]);
        out_left.fill(0.0);
        out_right.fill(0.0);

        self.timers.start(TimerKind::PlayRecordDelay);
        let mut offset = 0;
        while offset < nframes {
            // Split the block where the active loop wraps.
            let remaining = nframes - offset;
            let frames = self
                .store
                .frames_until_master_wrap()
                .map_or(remaining, |until_wrap| until_wrap.min(remaining));
            let segment = offset..offset + frames;
            self.play_record(
                &in_left[segment.clone()],
                &in_right[segment.clone()],
                &mut out_left[segment.clone()],
                &mut out_right[segment],
            );
            self.store.update_indices(frames);
            offset += frames;
        }
        self.timers.stop(TimerKind::PlayRecordDelay);

        if !self.monitoring_off {
            add_into(out_left, in_left);
            add_into(out_right, in_right);
        }

        self.flush_changes();
        self.process_frames += nframes as u64;
    }

    // Room for an event that nothing waits on.
    fn has_room(&self) -> bool {
        self.events.slots() > self.ack_reserve
    }

    // Acknowledgements and capacity stops may use the reserved slots.
    fn emit_ack(&mut self, event: EngineEvent) {
        if self.events.push(event).is_err() {
            self.clock.record_dropped();
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        if self.has_room() {
            self.emit_ack(event);
        } else {
            self.clock.record_dropped();
        }
    }

    fn receive_mutations(&mut self) {
        while !self.pending.is_full() {
            let Ok(scheduled) = self.mutations.pop() else {
                break;
            };
            if let Some(Admission::Superseded(seq)) = self.pending.admit(scheduled)
                && let Some(track) = scheduled.mutation.track()
            {
                self.emit(EngineEvent::Superseded { track, seq });
            }
        }
    }

    fn apply_due_mutations(&mut self) {
        while let Some(scheduled) = self.pending.pop_due(self.process_frames) {
            let track = scheduled.mutation.track();
            if self.apply(scheduled) {
                self.flush_changes();
                self.emit_ack(EngineEvent::Applied {
                    seq: scheduled.seq,
                    track,
                    frame: self.process_frames,
                });
            } else {
                self.emit_ack(EngineEvent::Dropped {
                    seq: scheduled.seq,
                    track,
                });
            }
        }
    }

    fn apply(&mut self, scheduled: ScheduledMutation) -> bool {
        let store = &mut self.store;
        match scheduled.mutation {
            Mutation::StartRecording {
                track,
                group,
                repeat,
            } => {
                let started = store.start_recording(track, group, repeat);
                if started {
                    self.timers.stop(TimerKind::RecordStartDelay);
                }
                started
            }
            Mutation::StartOverdub { track, group } => {
                let started = store.start_overdub(track, group);
                if started {
                    self.timers.stop(TimerKind::RecordStartDelay);
                }
                started
            }
            Mutation::Play { track } => {
                let was_recording = store
                    .track(track)
                    .is_some_and(|t| t.state == TrackState::Recording);
                let played = store.play(track);
                if played && was_recording {
                    self.timers.stop(TimerKind::RecordStopDelay);
                }
                played
            }
            Mutation::Mute { track } => store.mute(track),
            Mutation::Unmute { track } => store.unmute(track),
            Mutation::AddToGroup { track, group } => store.add_to_group(track, group),
            Mutation::RemoveFromGroup { track, group } => store.remove_from_group(track, group),
            Mutation::SetActiveGroup { group } => store.set_active_group(group),
            Mutation::SetMonitoring { enabled } => {
                self.monitoring_off = !enabled;
                true
            }
            Mutation::Reset => {
                store.reset();
                self.pending.discard_before(scheduled.seq);
                self.monitoring_off = self.default_monitoring_off;
                true
            }
        }
    }

    /// Mix, record and overdub one segment that does not cross a loop wrap.
    fn play_record(
        &mut self,
        in_left: &[f32],
        in_right: &[f32],
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let frames = in_left.len();
        let TrackStore {
            tracks,
            groups,
            active_group,
            selected_track,
            dirty_tracks,
            ..
        } = &mut self.store;

        let mut full = None;
        for (index, track) in tracks.iter_mut().enumerate() {
            let before = track.state;
            match track.state {
                TrackState::Off => {}
                TrackState::Playback if groups.contains(*active_group, index) => {
                    track.mix_into(out_left, out_right);
                }
                TrackState::Playback | TrackState::Mute => track.advance(frames),
                TrackState::Recording if *selected_track == Some(index) => {
                    if track.overdub {
                        track.overdub_input(in_left, in_right, out_left, out_right);
                    } else if track.record_input(in_left, in_right) {
                        track.finish_recording();
                        full = Some(index);
                    }
                }
                // A take nobody owns: leave it alone.
                TrackState::Recording => {}
            }
            if track.state != before {
                *dirty_tracks |= 1u128 << index;
            }
        }

        if let Some(index) = full {
            self.store.selected_track = None;
            self.store.recompute_masters_of(index);
            // The rest of the segment passes before the take is heard.
            self.store.align(index);
            self.store.tracks[index].advance(frames);
            let length = self.store.track(index).map_or(0, |t| t.len());
            self.emit_ack(EngineEvent::CapacityExceeded {
                track: index,
                length,
            });
        }
    }

    // Report tracks and loops whose state changed. Changes that find the
    // ring short of room stay marked and go out with a later block.
    fn flush_changes(&mut self) {
        let mut tracks = self.store.take_dirty_tracks();
        while tracks != 0 && self.has_room() {
            let index = tracks.trailing_zeros() as usize;
            tracks &= tracks - 1;
            if let Some(snapshot) = self.store.snapshot(index) {
                self.emit(EngineEvent::TrackChanged(snapshot));
            }
        }
        let mut groups = self.store.take_dirty_groups();
        while groups != 0 && self.has_room() {
            let group = groups.trailing_zeros() as usize;
            groups &= groups - 1;
            let length = self.store.master_length(group);
            self.emit(EngineEvent::MasterLength { group, length });
        }
        self.store.defer_dirty(tracks, groups);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 8;

    fn config() -> LooperConfig {
        LooperConfig {
            sample_rate: 100,
            num_tracks: 8,
            num_groups: 4,
            track_max_seconds: 2,
            guard_frames: 0,
            monitoring_off: true,
            ..LooperConfig::default()
        }
    }

    struct Rig {
        engine: LooperEngine,
        handle: EngineHandle,
        seq: u64,
    }

    impl Rig {
        fn new(config: LooperConfig) -> Self {
            let (engine, handle) = LooperEngine::new(&config, Arc::new(Timers::new()));
            Self {
                engine,
                handle,
                seq: 0,
            }
        }

        fn schedule_at(&mut self, target_frame: u64, mutation: Mutation) -> u64 {
            self.seq += 1;
            self.handle
                .schedule(ScheduledMutation {
                    seq: self.seq,
                    target_frame,
                    mutation,
                })
                .unwrap();
            self.seq
        }

        fn schedule(&mut self, mutation: Mutation) -> u64 {
            let now = self.engine.process_frames();
            self.schedule_at(now, mutation)
        }

        fn block(&mut self, value: f32) -> (Vec<f32>, Vec<f32>) {
            let input = vec![value; BLOCK];
            let mut out_left = vec![0.0; BLOCK];
            let mut out_right = vec![0.0; BLOCK];
            self.engine
                .process(&input, &input, &mut out_left, &mut out_right);
            (out_left, out_right)
        }

        fn events(&mut self) -> Vec<EngineEvent> {
            std::iter::from_fn(|| self.handle.poll_event()).collect()
        }
    }

    fn record(rig: &mut Rig, track: usize, group: usize, blocks: usize, value: f32) {
        rig.schedule(Mutation::StartRecording {
            track,
            group,
            repeat: false,
        });
        for _ in 0..blocks {
            rig.block(value);
        }
        rig.schedule(Mutation::Play { track });
    }

    #[test]
    fn test_record_then_playback_round_trip() {
        let mut rig = Rig::new(config());
        rig.schedule(Mutation::StartRecording {
            track: 1,
            group: 0,
            repeat: false,
        });
        let take: Vec<f32> = (0..3 * BLOCK).map(|i| i as f32 / 100.0).collect();
        for chunk in take.chunks(BLOCK) {
            let mut l = vec![0.0; BLOCK];
            let mut r = vec![0.0; BLOCK];
            rig.engine.process(chunk, chunk, &mut l, &mut r);
            // Nothing audible while the only track is recording.
            assert!(l.iter().all(|&s| s == 0.0));
        }
        rig.schedule(Mutation::Play { track: 1 });

        let mut played = Vec::new();
        for _ in 0..3 {
            played.extend(rig.block(0.0).0);
        }
        assert_eq!(played, take);
        assert_eq!(rig.engine.store().master_length(0), 3 * BLOCK);
    }

    #[test]
    fn test_mutation_waits_for_target_frame() {
        let mut rig = Rig::new(config());
        let seq = rig.schedule_at(
            20,
            Mutation::StartRecording {
                track: 0,
                group: 0,
                repeat: false,
            },
        );
        rig.block(1.0); // frames 0..8
        rig.block(1.0); // frames 8..16
        assert_eq!(rig.engine.store().track(0).unwrap().state, TrackState::Off);
        assert_eq!(rig.engine.pending_len(), 1);

        rig.block(1.0); // starts at 16, still early
        rig.block(1.0); // starts at 24 >= 20
        let applied = rig.events().into_iter().find_map(|event| match event {
            EngineEvent::Applied { seq: s, frame, .. } if s == seq => Some(frame),
            _ => None,
        });
        assert_eq!(applied, Some(24));
        assert_eq!(rig.engine.store().track(0).unwrap().end_idx, BLOCK);
    }

    #[test]
    fn test_passthrough_monitoring() {
        let mut rig = Rig::new(LooperConfig {
            monitoring_off: false,
            ..config()
        });
        let (left, right) = rig.block(0.25);
        assert_eq!(left, vec![0.25; BLOCK]);
        assert_eq!(right, vec![0.25; BLOCK]);

        rig.schedule(Mutation::SetMonitoring { enabled: false });
        assert_eq!(rig.block(0.25).0, vec![0.0; BLOCK]);
        rig.schedule(Mutation::Reset);
        assert_eq!(rig.block(0.25).0, vec![0.25; BLOCK]);
    }

    #[test]
    fn test_mixdown_sums_group_members_only() {
        let mut rig = Rig::new(config());
        record(&mut rig, 0, 0, 2, 0.5);
        record(&mut rig, 1, 0, 2, 0.25);
        record(&mut rig, 2, 1, 2, 0.125);
        rig.block(0.0);
        rig.schedule(Mutation::SetActiveGroup { group: 0 });
        rig.block(0.0);

        // Group 1 is not active, so track 2 stays silent.
        let (left, _) = rig.block(0.0);
        assert_eq!(left, vec![0.75; BLOCK]);

        rig.schedule(Mutation::Mute { track: 1 });
        assert_eq!(rig.block(0.0).0, vec![0.5; BLOCK]);
        rig.schedule(Mutation::Unmute { track: 1 });
        assert_eq!(rig.block(0.0).0, vec![0.75; BLOCK]);
    }

    #[test]
    fn test_overdub_adds_to_existing_take() {
        let mut rig = Rig::new(config());
        record(&mut rig, 0, 0, 2, 0.5);
        // Let the pending Play land first; a second mutation for the same
        // track would replace it.
        rig.block(0.0);
        rig.schedule(Mutation::StartOverdub { track: 0, group: 0 });
        // The overdub pass plays what is there while layering the input.
        assert_eq!(rig.block(0.25).0, vec![0.5; BLOCK]);
        assert_eq!(rig.block(0.25).0, vec![0.5; BLOCK]);
        rig.schedule(Mutation::Play { track: 0 });
        assert_eq!(rig.block(0.0).0, vec![0.75; BLOCK]);
        assert_eq!(rig.engine.store().track(0).unwrap().len(), 2 * BLOCK);
    }

    #[test]
    fn test_capacity_exceeded_stops_recording() {
        let mut rig = Rig::new(LooperConfig {
            track_max_seconds: 1,
            ..config()
        });
        // Capacity is 100 frames: 12 full blocks plus 4 frames of the 13th.
        rig.schedule(Mutation::StartRecording {
            track: 0,
            group: 0,
            repeat: false,
        });
        for _ in 0..13 {
            rig.block(1.0);
        }
        let track = rig.engine.store().track(0).unwrap();
        assert_eq!(track.state, TrackState::Playback);
        assert_eq!(track.len(), 100);
        assert_eq!(rig.engine.store().selected_track(), None);
        assert_eq!(rig.engine.store().master_length(0), 100);
        assert!(rig.events().contains(&EngineEvent::CapacityExceeded {
            track: 0,
            length: 100
        }));
    }

    #[test]
    fn test_mid_loop_take_replays_in_phase() {
        let mut rig = Rig::new(config());
        record(&mut rig, 0, 0, 4, 1.0);
        rig.block(0.0);
        // Master loop is 4 blocks; track 1 is the block at loop position 8.
        rig.schedule(Mutation::StartRecording {
            track: 1,
            group: 0,
            repeat: false,
        });
        rig.block(0.5);
        assert_eq!(rig.engine.store().track(1).unwrap().start_idx, BLOCK);
        rig.schedule(Mutation::Play { track: 1 });

        // Loop positions 16, 24, 0, 8, 16, 24, 0, 8.
        let heard: Vec<f32> = (0..8).map(|_| rig.block(0.0).0[0]).collect();
        assert_eq!(heard, [1.0, 1.0, 1.0, 1.5, 1.0, 1.0, 1.0, 1.5]);
        assert_eq!(rig.engine.store().track(1).unwrap().state, TrackState::Off);
    }

    #[test]
    fn test_dropped_when_precondition_fails() {
        let mut rig = Rig::new(config());
        let seq = rig.schedule(Mutation::Unmute { track: 3 });
        rig.block(0.0);
        assert!(rig.events().contains(&EngineEvent::Dropped {
            seq,
            track: Some(3)
        }));
    }

    #[test]
    fn test_superseded_pending_mutation() {
        let mut rig = Rig::new(config());
        let first = rig.schedule_at(
            100,
            Mutation::StartRecording {
                track: 2,
                group: 0,
                repeat: false,
            },
        );
        rig.schedule_at(100, Mutation::Mute { track: 2 });
        rig.block(0.0);
        assert!(rig.events().contains(&EngineEvent::Superseded {
            track: 2,
            seq: first
        }));
        assert_eq!(rig.engine.pending_len(), 1);
    }

    #[test]
    fn test_reset_discards_earlier_pending_mutations() {
        let mut rig = Rig::new(config());
        rig.schedule_at(
            40,
            Mutation::StartRecording {
                track: 0,
                group: 0,
                repeat: false,
            },
        );
        rig.schedule(Mutation::Reset);
        for _ in 0..8 {
            rig.block(1.0);
        }
        assert_eq!(rig.engine.pending_len(), 0);
        assert_eq!(rig.engine.store().track(0).unwrap().state, TrackState::Off);
    }

    #[test]
    fn test_track_changes_are_reported() {
        let mut rig = Rig::new(config());
        record(&mut rig, 5, 2, 1, 1.0);
        rig.block(0.0);
        let events = rig.events();
        assert!(events.iter().any(|event| matches!(
            event,
            EngineEvent::TrackChanged(s) if s.index == 5 && s.state == TrackState::Recording
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            EngineEvent::TrackChanged(s) if s.index == 5
                && s.state == TrackState::Playback
                && s.end_idx == BLOCK
        )));
        assert!(events.contains(&EngineEvent::MasterLength {
            group: 2,
            length: BLOCK
        }));
    }
}
