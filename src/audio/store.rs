use super::group::GroupTable;
use super::track::{Track, TrackSnapshot, TrackState};
use crate::config::{MAX_GROUPS, MAX_TRACKS};

/// Every track, the group membership table and the per-group loop lengths.
///
/// Owned by the audio thread. The operations below are the state changes a
/// scheduled mutation can make; each returns `false` and leaves the store
/// untouched when its precondition no longer holds.
#[derive(Debug)]
pub struct TrackStore {
    pub(crate) tracks: Vec<Track>,
    pub(crate) groups: GroupTable,
    pub(crate) master_length: Vec<usize>,
    pub(crate) master_curr_idx: usize,
    pub(crate) active_group: usize,
    pub(crate) selected_track: Option<usize>,
    // Bit per track / group whose reported state changed since the last flush.
    pub(crate) dirty_tracks: u128,
    pub(crate) dirty_groups: u16,
}

impl TrackStore {
    /// # Panics
    ///
    /// Panics when `num_tracks` exceeds [`MAX_TRACKS`] or `num_groups`
    /// exceeds [`MAX_GROUPS`]; the change masks hold one bit per index.
    pub fn new(num_tracks: usize, num_groups: usize, capacity: usize) -> Self {
        assert!(
            num_tracks <= MAX_TRACKS && num_groups <= MAX_GROUPS,
            "at most {} tracks and {} groups",
            MAX_TRACKS,
            MAX_GROUPS
        );
        Self {
            tracks: (0..num_tracks).map(|_| Track::new(capacity)).collect(),
            groups: GroupTable::new(num_groups, num_tracks),
            master_length: vec![0; num_groups],
            master_curr_idx: 0,
            active_group: 0,
            selected_track: None,
            dirty_tracks: 0,
            dirty_groups: 0,
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn num_groups(&self) -> usize {
        self.master_length.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn snapshot(&self, index: usize) -> Option<TrackSnapshot> {
        self.tracks.get(index).map(|track| track.snapshot(index))
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    pub fn master_length(&self, group: usize) -> usize {
        self.master_length.get(group).copied().unwrap_or(0)
    }

    pub fn master_curr_idx(&self) -> usize {
        self.master_curr_idx
    }

    pub fn active_group(&self) -> usize {
        self.active_group
    }

    pub fn selected_track(&self) -> Option<usize> {
        self.selected_track
    }

    /// Frames left before the active group's loop wraps, if it has one.
    pub fn frames_until_master_wrap(&self) -> Option<usize> {
        let len = self.master_length(self.active_group);
        (len > 0).then(|| len - self.master_curr_idx.min(len - 1))
    }

    fn valid(&self, track: usize, group: usize) -> bool {
        track < self.num_tracks() && group < self.num_groups()
    }

    pub(crate) fn mark_track(&mut self, track: usize) {
        self.dirty_tracks |= 1u128 << track;
    }

    pub(crate) fn take_dirty_tracks(&mut self) -> u128 {
        std::mem::take(&mut self.dirty_tracks)
    }

    pub(crate) fn take_dirty_groups(&mut self) -> u16 {
        std::mem::take(&mut self.dirty_groups)
    }

    /// Put back changes that could not be reported yet.
    pub(crate) fn defer_dirty(&mut self, tracks: u128, groups: u16) {
        self.dirty_tracks |= tracks;
        self.dirty_groups |= groups;
    }

    // Phase-lock a track to the active loop. Tracks outside the active group
    // restart at their start index and are aligned when their group is
    // selected.
    pub(crate) fn align(&mut self, index: usize) {
        let group = self.active_group;
        let (pos, len) = if self.groups.contains(group, index) {
            (self.master_curr_idx, self.master_length(group))
        } else {
            (0, 0)
        };
        self.tracks[index].align(pos, len);
    }

    pub fn recompute_master(&mut self, group: usize) {
        let Some(&old) = self.master_length.get(group) else {
            return;
        };
        let length = self
            .groups
            .members(group)
            .map(|track| self.tracks[track].settled_len())
            .max()
            .unwrap_or(0);
        if length != old {
            self.master_length[group] = length;
            self.dirty_groups |= 1 << group;
        }
        if group == self.active_group && (length == 0 || self.master_curr_idx >= length) {
            self.master_curr_idx = 0;
            self.resync_group(group);
        }
    }

    pub fn recompute_masters_of(&mut self, track: usize) {
        for group in 0..self.num_groups() {
            if self.groups.contains(group, track) {
                self.recompute_master(group);
            }
        }
    }

    /// Re-align every member of `group` to the current loop position.
    /// Tracks that ran out since the last loop boundary are replayed.
    pub fn resync_group(&mut self, group: usize) {
        let pos = self.master_curr_idx;
        let len = self.master_length(group);
        let Self {
            tracks,
            groups,
            dirty_tracks,
            ..
        } = self;
        for index in groups.members(group) {
            let track = &mut tracks[index];
            match track.state {
                TrackState::Playback | TrackState::Mute => {}
                TrackState::Recording if track.overdub => {}
                TrackState::Off if track.has_content() => {
                    track.state = TrackState::Playback;
                    *dirty_tracks |= 1u128 << index;
                }
                _ => continue,
            }
            track.align(pos, len);
        }
    }

    pub fn set_active_group(&mut self, group: usize) -> bool {
        if group >= self.num_groups() {
            return false;
        }
        if group != self.active_group {
            self.active_group = group;
            self.master_curr_idx = 0;
            self.resync_group(group);
        }
        true
    }

    // A new take or overdub on another track ends whatever was recording.
    fn end_current_take(&mut self, except: usize) {
        if let Some(current) = self.selected_track
            && current != except
            && self.tracks[current].state == TrackState::Recording
        {
            self.tracks[current].finish_recording();
            self.mark_track(current);
            self.recompute_masters_of(current);
        }
        self.selected_track = None;
    }

    pub fn start_recording(&mut self, track: usize, group: usize, repeat: bool) -> bool {
        if !self.valid(track, group) || self.tracks[track].state == TrackState::Recording {
            return false;
        }
        self.end_current_take(track);
        self.groups.add(group, track);
        self.set_active_group(group);

        // The old take stops counting towards any master length first.
        self.tracks[track].start_recording(0, repeat);
        self.recompute_masters_of(track);
        let start = if self.master_length[group] > 0 {
            self.master_curr_idx
        } else {
            0
        };
        self.tracks[track].start_recording(start, repeat);
        self.tracks[track].mark_pulse();
        self.selected_track = Some(track);
        self.mark_track(track);
        true
    }

    pub fn start_overdub(&mut self, track: usize, group: usize) -> bool {
        if !self.valid(track, group)
            || !self.tracks[track].has_content()
            || self.tracks[track].state == TrackState::Recording
        {
            return false;
        }
        self.end_current_take(track);
        if self.groups.add(group, track) {
            self.recompute_master(group);
        }
        self.set_active_group(group);
        self.tracks[track].start_overdub();
        self.align(track);
        self.tracks[track].mark_pulse();
        self.selected_track = Some(track);
        self.mark_track(track);
        true
    }

    /// Stop recording/overdubbing `track`, or replay it. Either way the
    /// track picks up at the active loop's current position.
    pub fn play(&mut self, track: usize) -> bool {
        let Some(current) = self.tracks.get(track) else {
            return false;
        };
        match current.state {
            TrackState::Recording => {
                self.tracks[track].finish_recording();
                if self.selected_track == Some(track) {
                    self.selected_track = None;
                }
                self.recompute_masters_of(track);
            }
            _ if current.has_content() => self.tracks[track].start_playing(),
            _ => return false,
        }
        self.align(track);
        self.tracks[track].mark_pulse();
        self.mark_track(track);
        true
    }

    pub fn mute(&mut self, track: usize) -> bool {
        self.swap_state(track, TrackState::Playback, TrackState::Mute)
    }

    pub fn unmute(&mut self, track: usize) -> bool {
        self.swap_state(track, TrackState::Mute, TrackState::Playback)
    }

    fn swap_state(&mut self, track: usize, from: TrackState, to: TrackState) -> bool {
        match self.tracks.get_mut(track) {
            Some(t) if t.state == from => {
                t.state = to;
                t.mark_pulse();
                self.mark_track(track);
                true
            }
            _ => false,
        }
    }

    pub fn add_to_group(&mut self, track: usize, group: usize) -> bool {
        if !self.valid(track, group) || !self.groups.add(group, track) {
            return false;
        }
        self.recompute_master(group);
        true
    }

    pub fn remove_from_group(&mut self, track: usize, group: usize) -> bool {
        if !self.valid(track, group) || !self.groups.remove(group, track) {
            return false;
        }
        self.recompute_master(group);
        true
    }

    /// All tracks off and empty, no memberships, no loops.
    pub fn reset(&mut self) {
        for track in &mut self.tracks {
            track.clear();
        }
        self.groups.clear();
        self.master_length.fill(0);
        self.master_curr_idx = 0;
        self.active_group = 0;
        self.selected_track = None;
        self.dirty_tracks = (1u128 << self.num_tracks()) - 1;
        self.dirty_groups = (1u16 << self.num_groups()) - 1;
    }

    /// Advance the active group's loop, re-syncing its tracks on wrap.
    /// `frames` must not cross the wrap point (see `frames_until_master_wrap`).
    pub fn update_indices(&mut self, frames: usize) {
        let length = self.master_length(self.active_group);
        if length == 0 {
            self.master_curr_idx = 0;
            return;
        }
        self.master_curr_idx += frames;
        if self.master_curr_idx >= length {
            self.master_curr_idx %= length;
            self.resync_group(self.active_group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TrackStore {
        TrackStore::new(8, 4, 1000)
    }

    fn record(store: &mut TrackStore, track: usize, group: usize, frames: usize, value: f32) {
        assert!(store.start_recording(track, group, false));
        let input = vec![value; frames];
        store.tracks[track].record_input(&input, &input);
        assert!(store.play(track));
    }

    #[test]
    fn test_first_take_defines_master_length() {
        let mut store = store();
        assert!(store.start_recording(3, 1, false));
        assert_eq!(store.active_group(), 1);
        assert_eq!(store.selected_track(), Some(3));
        assert!(store.groups().contains(1, 3));
        assert_eq!(store.master_length(1), 0);

        store.tracks[3].record_input(&[0.5; 200], &[0.5; 200]);
        assert!(store.play(3));
        assert_eq!(store.master_length(1), 200);
        assert_eq!(store.selected_track(), None);
        assert_eq!(store.track(3).unwrap().state, TrackState::Playback);
        assert_eq!(store.take_dirty_groups(), 1 << 1);
    }

    #[test]
    fn test_second_take_starts_at_master_position() {
        let mut store = store();
        record(&mut store, 0, 0, 100, 1.0);
        store.update_indices(40);
        assert_eq!(store.master_curr_idx(), 40);

        assert!(store.start_recording(1, 0, true));
        let track = store.track(1).unwrap();
        assert_eq!((track.start_idx, track.end_idx, track.curr_idx), (40, 40, 40));
    }

    #[test]
    fn test_master_wrap_resyncs_members() {
        let mut store = store();
        record(&mut store, 0, 0, 100, 1.0);
        store.tracks[0].advance(60);
        store.update_indices(60);
        assert_eq!(store.frames_until_master_wrap(), Some(40));

        store.tracks[0].advance(40);
        store.update_indices(40);
        assert_eq!(store.master_curr_idx(), 0);
        assert_eq!(store.track(0).unwrap().curr_idx, 0);
        assert_eq!(store.track(0).unwrap().state, TrackState::Playback);
    }

    #[test]
    fn test_mid_loop_take_replays_at_its_position() {
        let mut store = store();
        record(&mut store, 0, 0, 100, 1.0);
        store.update_indices(40);
        assert!(store.start_recording(1, 0, false));
        store.tracks[1].record_input(&[0.5; 10], &[0.5; 10]);
        store.update_indices(10);

        assert!(store.play(1));
        let track = store.track(1).unwrap();
        assert_eq!((track.start_idx, track.end_idx), (40, 50));
        // Stopped at loop position 50: silent until position 40 comes round.
        assert_eq!((track.curr_idx, track.lead_in), (40, 90));

        store.update_indices(50);
        assert_eq!(store.master_curr_idx(), 0);
        assert_eq!(store.track(1).unwrap().lead_in, 40);
    }

    #[test]
    #[should_panic]
    fn test_too_many_tracks_is_refused() {
        TrackStore::new(MAX_TRACKS + 1, 4, 16);
    }

    #[test]
    fn test_remove_recomputes_master() {
        let mut store = store();
        record(&mut store, 0, 2, 100, 1.0);
        record(&mut store, 1, 2, 300, 1.0);
        assert_eq!(store.master_length(2), 300);

        assert!(store.remove_from_group(1, 2));
        assert_eq!(store.master_length(2), 100);
        assert!(!store.remove_from_group(1, 2));

        assert!(store.remove_from_group(0, 2));
        assert_eq!(store.master_length(2), 0);
    }

    #[test]
    fn test_add_brings_length_into_group() {
        let mut store = store();
        record(&mut store, 4, 0, 250, 1.0);
        assert_eq!(store.master_length(3), 0);
        assert!(store.add_to_group(4, 3));
        assert_eq!(store.master_length(3), 250);
        assert!(!store.add_to_group(4, 3));
    }

    #[test]
    fn test_mute_unmute_toggle() {
        let mut store = store();
        assert!(!store.mute(0));
        record(&mut store, 0, 0, 10, 1.0);
        assert!(store.mute(0));
        assert!(!store.mute(0));
        assert_eq!(store.track(0).unwrap().state, TrackState::Mute);
        assert!(store.unmute(0));
        assert_eq!(store.track(0).unwrap().state, TrackState::Playback);
    }

    #[test]
    fn test_overdub_requires_content() {
        let mut store = store();
        assert!(!store.start_overdub(0, 0));
        record(&mut store, 0, 0, 10, 1.0);
        assert!(store.start_overdub(0, 0));
        assert!(store.track(0).unwrap().overdub);
        // Overdubbing keeps the settled length counting.
        assert_eq!(store.master_length(0), 10);
        assert!(store.play(0));
        assert!(!store.track(0).unwrap().overdub);
    }

    #[test]
    fn test_new_take_ends_previous_one() {
        let mut store = store();
        assert!(store.start_recording(0, 0, false));
        store.tracks[0].record_input(&[1.0; 20], &[1.0; 20]);
        assert!(store.start_recording(1, 0, false));

        assert_eq!(store.track(0).unwrap().state, TrackState::Playback);
        assert_eq!(store.master_length(0), 20);
        assert_eq!(store.selected_track(), Some(1));
    }

    #[test]
    fn test_play_on_empty_track_is_refused() {
        let mut store = store();
        assert!(!store.play(2));
        assert!(!store.play(99));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = store();
        record(&mut store, 0, 1, 50, 1.0);
        store.add_to_group(0, 2);
        store.take_dirty_tracks();

        store.reset();
        assert_eq!(store.master_length(1), 0);
        assert_eq!(store.active_group(), 0);
        assert!(store.groups().groups_of(0).next().is_none());
        let track = store.track(0).unwrap();
        assert_eq!((track.state, track.end_idx), (TrackState::Off, 0));
        assert_eq!(store.take_dirty_tracks(), 0xFF);
    }
}
