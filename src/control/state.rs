use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::event::SystemEvent;
use crate::audio::{
    EngineEvent, EngineHandle, GroupTable, Mutation, ScheduledMutation, TrackSnapshot, TrackState,
};
use crate::config::LooperConfig;
use crate::error::{DecodeError, LooperError, LooperResult};
use crate::timing::{TimerKind, Timers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemState {
    #[default]
    Passthrough,
    Playback,
    Recording,
    Overdubbing,
    Calibration,
}

impl SystemState {
    fn is_recording(self) -> bool {
        matches!(self, SystemState::Recording | SystemState::Overdubbing)
    }
}

/// Validates commands and turns accepted ones into scheduled mutations.
///
/// Lives on the control thread. It keeps its own picture of the tracks,
/// refreshed from engine events, and never touches the engine's store.
/// A rejected command leaves everything here unchanged; an accepted one is
/// committed only once its mutation is on the queue.
pub struct StateMachine {
    state: SystemState,
    engine: EngineHandle,
    timers: Arc<Timers>,
    shutdown: Arc<AtomicBool>,
    tracks: Vec<TrackSnapshot>,
    groups: GroupTable,
    master_length: Vec<usize>,
    active_group: usize,
    selected_track: Option<usize>,
    selected_group: usize,
    // Sequence number of the unacknowledged mutation per track.
    pending: Vec<Option<u64>>,
    next_seq: u64,
    ui_frames_cmd_rx: u64,
    rec_frame_delay: u64,
    play_frame_delay: u64,
    monitoring_off: bool,
    default_monitoring_off: bool,
    dropped_events: u64,
}

impl StateMachine {
    pub fn new(
        config: &LooperConfig,
        engine: EngineHandle,
        timers: Arc<Timers>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state: SystemState::Passthrough,
            engine,
            timers,
            shutdown,
            tracks: (0..config.num_tracks).map(TrackSnapshot::empty).collect(),
            groups: GroupTable::new(config.num_groups, config.num_tracks),
            master_length: vec![0; config.num_groups],
            active_group: 0,
            selected_track: None,
            selected_group: 0,
            pending: vec![None; config.num_tracks],
            next_seq: 0,
            ui_frames_cmd_rx: 0,
            rec_frame_delay: config.rec_frame_delay,
            play_frame_delay: config.play_frame_delay,
            monitoring_off: config.monitoring_off,
            default_monitoring_off: config.monitoring_off,
            dropped_events: 0,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn track(&self, index: usize) -> Option<&TrackSnapshot> {
        self.tracks.get(index)
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    pub fn master_length(&self, group: usize) -> usize {
        self.master_length.get(group).copied().unwrap_or(0)
    }

    pub fn active_group(&self) -> usize {
        self.active_group
    }

    pub fn selected_track(&self) -> Option<usize> {
        self.selected_track
    }

    pub fn selected_group(&self) -> usize {
        self.selected_group
    }

    pub fn monitoring_off(&self) -> bool {
        self.monitoring_off
    }

    /// Engine frame count when the last command was received.
    pub fn ui_frames_cmd_rx(&self) -> u64 {
        self.ui_frames_cmd_rx
    }

    pub fn is_pending(&self, track: usize) -> bool {
        self.pending.get(track).is_some_and(Option::is_some)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Validate `event` against the current state and schedule its effect.
    pub fn handle(&mut self, event: SystemEvent) -> LooperResult<()> {
        // Everything applied up to this frame has been reported by now.
        self.ui_frames_cmd_rx = self.engine.frames();
        self.sync();

        self.check_range(event)?;
        if let Some(track) = event.track()
            && self.is_pending(track)
        {
            log::warn!(
                "Track {} still has a pending mutation, rejecting {:?}",
                track,
                event
            );
            return Err(LooperError::SchedulingConflict { track });
        }

        let illegal = LooperError::IllegalTransition {
            event,
            state: self.state,
        };
        match event {
            SystemEvent::RecordTrack {
                track,
                group,
                repeat,
            } => {
                if !matches!(self.state, SystemState::Passthrough | SystemState::Playback) {
                    return Err(illegal);
                }
                self.schedule(
                    Mutation::StartRecording {
                        track,
                        group,
                        repeat,
                    },
                    self.rec_frame_delay,
                )?;
                self.timers.start(TimerKind::RecordStartDelay);
                self.begin_take(track, group, SystemState::Recording);
            }
            SystemEvent::OverdubTrack { track, group } => {
                if !matches!(self.state, SystemState::Passthrough | SystemState::Playback)
                    || !self.tracks[track].has_content()
                {
                    return Err(illegal);
                }
                self.schedule(Mutation::StartOverdub { track, group }, self.rec_frame_delay)?;
                self.timers.start(TimerKind::RecordStartDelay);
                self.begin_take(track, group, SystemState::Overdubbing);
            }
            SystemEvent::PlayTrack { track } => {
                let stop = match self.state {
                    SystemState::Recording | SystemState::Overdubbing
                        if self.selected_track == Some(track) =>
                    {
                        true
                    }
                    SystemState::Passthrough | SystemState::Playback
                        if self.tracks[track].has_content() =>
                    {
                        false
                    }
                    _ => return Err(illegal),
                };
                self.schedule(Mutation::Play { track }, self.play_frame_delay)?;
                if stop {
                    self.timers.start(TimerKind::RecordStopDelay);
                    self.selected_track = None;
                }
                self.state = SystemState::Playback;
            }
            SystemEvent::MuteTrack { track } => {
                if !self.can_toggle_mute(track)
                    || self.tracks[track].state != TrackState::Playback
                {
                    return Err(illegal);
                }
                self.schedule(Mutation::Mute { track }, self.play_frame_delay)?;
            }
            SystemEvent::UnmuteTrack { track } => {
                if !self.can_toggle_mute(track) || self.tracks[track].state != TrackState::Mute {
                    return Err(illegal);
                }
                self.schedule(Mutation::Unmute { track }, self.play_frame_delay)?;
            }
            SystemEvent::AddTrackToGroup { track, group } => {
                if !self.can_edit_membership(track) || self.groups.contains(group, track) {
                    return Err(illegal);
                }
                self.schedule(Mutation::AddToGroup { track, group }, 0)?;
                self.groups.add(group, track);
            }
            SystemEvent::RemoveTrackFromGroup { track, group } => {
                if !self.can_edit_membership(track) || !self.groups.contains(group, track) {
                    return Err(illegal);
                }
                self.schedule(Mutation::RemoveFromGroup { track, group }, 0)?;
                self.groups.remove(group, track);
            }
            SystemEvent::SetActiveGroup { group } => {
                if !matches!(self.state, SystemState::Passthrough | SystemState::Playback) {
                    return Err(illegal);
                }
                self.schedule(Mutation::SetActiveGroup { group }, 0)?;
                self.active_group = group;
                self.selected_group = group;
            }
            SystemEvent::Passthrough => {
                self.schedule(Mutation::Reset, 0)?;
                self.reset_model();
            }
            SystemEvent::Calibrate => {
                if self.state != SystemState::Passthrough {
                    return Err(illegal);
                }
                self.schedule(Mutation::SetMonitoring { enabled: false }, 0)?;
                self.monitoring_off = true;
                self.state = SystemState::Calibration;
            }
            SystemEvent::Quit => {
                self.shutdown.store(true, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Fold every engine event received so far into the local model.
    pub fn sync(&mut self) {
        while let Some(event) = self.engine.poll_event() {
            self.apply_engine_event(event);
        }
        let dropped = self.engine.dropped_events();
        if dropped > self.dropped_events {
            log::warn!(
                "{} engine events lost, control thread fell behind",
                dropped - self.dropped_events
            );
            self.dropped_events = dropped;
        }
    }

    fn check_range(&self, event: SystemEvent) -> LooperResult<()> {
        let limit = self.tracks.len();
        if let Some(track) = event.track()
            && track >= limit
        {
            return Err(DecodeError::TrackOutOfRange { track, limit }.into());
        }
        let limit = self.master_length.len();
        if let Some(group) = event.group()
            && group >= limit
        {
            return Err(DecodeError::GroupOutOfRange { group, limit }.into());
        }
        Ok(())
    }

    fn can_edit_membership(&self, track: usize) -> bool {
        self.state != SystemState::Calibration && !self.is_taking(track)
    }

    fn can_toggle_mute(&self, track: usize) -> bool {
        self.state != SystemState::Calibration && !self.is_taking(track)
    }

    // `track` is the one being recorded or overdubbed.
    fn is_taking(&self, track: usize) -> bool {
        self.state.is_recording() && self.selected_track == Some(track)
    }

    fn begin_take(&mut self, track: usize, group: usize, state: SystemState) {
        self.groups.add(group, track);
        self.selected_track = Some(track);
        self.selected_group = group;
        self.active_group = group;
        self.state = state;
    }

    fn schedule(&mut self, mutation: Mutation, delay: u64) -> LooperResult<u64> {
        let seq = self.next_seq + 1;
        self.engine.schedule(ScheduledMutation {
            seq,
            target_frame: self.ui_frames_cmd_rx + delay,
            mutation,
        })?;
        self.next_seq = seq;
        if let Some(track) = mutation.track() {
            self.pending[track] = Some(seq);
        }
        Ok(seq)
    }

    fn reset_model(&mut self) {
        for (index, track) in self.tracks.iter_mut().enumerate() {
            *track = TrackSnapshot::empty(index);
        }
        self.groups.clear();
        self.master_length.fill(0);
        self.active_group = 0;
        self.selected_track = None;
        self.selected_group = 0;
        self.pending.fill(None);
        self.monitoring_off = self.default_monitoring_off;
        self.state = SystemState::Passthrough;
    }

    fn acknowledge(&mut self, track: Option<usize>, seq: u64) {
        if let Some(slot) = track.and_then(|track| self.pending.get_mut(track))
            && *slot == Some(seq)
        {
            *slot = None;
        }
    }

    fn apply_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Applied { seq, track, frame } => {
                log::debug!("Mutation {} applied at frame {}", seq, frame);
                self.acknowledge(track, seq);
            }
            EngineEvent::Dropped { seq, track } => {
                log::warn!("Mutation {} dropped by engine (track {:?})", seq, track);
                self.acknowledge(track, seq);
            }
            EngineEvent::Superseded { track, seq } => {
                log::warn!("Mutation {} for track {} was superseded", seq, track);
            }
            EngineEvent::TrackChanged(snapshot) => {
                if let Some(track) = self.tracks.get_mut(snapshot.index) {
                    *track = snapshot;
                }
            }
            EngineEvent::MasterLength { group, length } => {
                if let Some(master) = self.master_length.get_mut(group) {
                    *master = length;
                    log::info!("Group {} loop length is now {} frames", group, length);
                }
            }
            EngineEvent::CapacityExceeded { track, length } => {
                log::warn!(
                    "Track {} reached its maximum length ({} frames), recording stopped",
                    track,
                    length
                );
                if self.selected_track == Some(track) {
                    self.selected_track = None;
                    if self.state.is_recording() {
                        self.state = SystemState::Playback;
                    }
                }
            }
        }
    }
}
