use super::mixer::{add_into, overdub};

/// Diagnostic markers kept per track.
pub const PULSE_MARKER_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Empty, or finished and silent until replayed
    #[default]
    Off,
    Playback,
    Recording,
    /// Advancing in time but not mixed
    Mute,
}

/// Copyable view of a track's bookkeeping, without the sample buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackSnapshot {
    pub index: usize,
    pub state: TrackState,
    pub start_idx: usize,
    pub end_idx: usize,
    pub curr_idx: usize,
    pub repeat: bool,
    pub overdub: bool,
}

impl TrackSnapshot {
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn has_content(&self) -> bool {
        self.end_idx > self.start_idx
    }

    pub fn len(&self) -> usize {
        self.end_idx.saturating_sub(self.start_idx)
    }
}

/// One recordable stereo buffer.
///
/// Content lives in `[start_idx, end_idx)`. Buffers are sized once and never
/// reallocated, so every method here is real-time safe.
#[derive(Debug, Clone)]
pub struct Track {
    pub channel_left: Vec<f32>,
    pub channel_right: Vec<f32>,
    pub curr_idx: usize,
    pub start_idx: usize,
    pub end_idx: usize,
    pub pulse_idx_arr: [usize; PULSE_MARKER_COUNT],
    pub pulse_idx: usize,
    pub state: TrackState,
    pub repeat: bool,
    /// Set while a `Recording` track sums input instead of overwriting.
    pub overdub: bool,
    /// Silent frames to wait before the head resumes at `curr_idx`.
    pub lead_in: usize,
    /// Loop length the head was last aligned to.
    pub loop_len: usize,
}

impl Track {
    pub fn new(capacity: usize) -> Self {
        Self {
            channel_left: vec![0.0; capacity],
            channel_right: vec![0.0; capacity],
            curr_idx: 0,
            start_idx: 0,
            end_idx: 0,
            pulse_idx_arr: [0; PULSE_MARKER_COUNT],
            pulse_idx: 0,
            state: TrackState::Off,
            repeat: false,
            overdub: false,
            lead_in: 0,
            loop_len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.channel_left.len().min(self.channel_right.len())
    }

    pub fn len(&self) -> usize {
        self.end_idx.saturating_sub(self.start_idx)
    }

    pub fn has_content(&self) -> bool {
        self.end_idx > self.start_idx
    }

    pub fn is_first_take(&self) -> bool {
        self.state == TrackState::Recording && !self.overdub
    }

    /// Length this track contributes to its groups' master length.
    /// A first take still in progress has no settled length yet.
    pub fn settled_len(&self) -> usize {
        if self.is_first_take() { 0 } else { self.len() }
    }

    pub fn start_recording(&mut self, start_idx: usize, repeat: bool) {
        let start_idx = start_idx.min(self.capacity());
        self.start_idx = start_idx;
        self.end_idx = start_idx;
        self.curr_idx = start_idx;
        self.lead_in = 0;
        self.repeat = repeat;
        self.overdub = false;
        self.state = TrackState::Recording;
    }

    pub fn start_overdub(&mut self) {
        self.overdub = true;
        self.curr_idx = self.start_idx;
        self.lead_in = 0;
        self.state = TrackState::Recording;
    }

    /// Leave recording/overdub and play from the top.
    /// A take with no samples leaves the track empty.
    pub fn finish_recording(&mut self) {
        self.overdub = false;
        if self.has_content() {
            self.start_playing();
        } else {
            self.clear();
        }
    }

    pub fn start_playing(&mut self) {
        self.curr_idx = self.start_idx;
        self.lead_in = 0;
        self.state = TrackState::Playback;
    }

    /// Put the head where a loop of `master_len` frames, now at
    /// `master_pos`, expects it.
    ///
    /// `start_idx` is the loop position the take began at, so buffer index
    /// `start_idx + k` belongs to loop position `start_idx + k` (mod the
    /// loop). Outside its content a non-repeating track waits silently until
    /// the loop comes back round to `start_idx`.
    pub fn align(&mut self, master_pos: usize, master_len: usize) {
        self.loop_len = master_len;
        self.curr_idx = self.start_idx;
        self.lead_in = 0;
        let len = self.len();
        if master_len == 0 || len == 0 {
            return;
        }
        let start = self.start_idx % master_len;
        let phase = (master_pos % master_len + master_len - start) % master_len;
        if self.repeat {
            self.curr_idx += phase % len;
        } else if phase < len {
            self.curr_idx += phase;
        } else {
            self.lead_in = master_len - phase;
        }
    }

    pub fn clear(&mut self) {
        self.curr_idx = 0;
        self.start_idx = 0;
        self.end_idx = 0;
        self.pulse_idx_arr = [0; PULSE_MARKER_COUNT];
        self.pulse_idx = 0;
        self.state = TrackState::Off;
        self.repeat = false;
        self.overdub = false;
        self.lead_in = 0;
        self.loop_len = 0;
    }

    /// Remember where the read/write head was when a mutation landed.
    pub fn mark_pulse(&mut self) {
        self.pulse_idx_arr[self.pulse_idx % PULSE_MARKER_COUNT] = self.curr_idx;
        self.pulse_idx = (self.pulse_idx + 1) % PULSE_MARKER_COUNT;
    }

    /// Markers oldest first.
    pub fn pulse_markers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..PULSE_MARKER_COUNT)
            .map(move |i| self.pulse_idx_arr[(self.pulse_idx + i) % PULSE_MARKER_COUNT])
    }

    // Reached end_idx: wrap when repeating, otherwise stop. A playing track
    // goes silent; a muted one stays muted, parked at the end. Returns
    // `false` when the head did not move back.
    fn end_reached(&mut self) -> bool {
        if self.repeat && self.has_content() {
            self.curr_idx = self.start_idx;
            return true;
        }
        self.curr_idx = self.end_idx;
        if self.state == TrackState::Playback {
            self.state = TrackState::Off;
        }
        false
    }

    fn run_length(&self, remaining: usize) -> usize {
        remaining.min(self.end_idx.saturating_sub(self.curr_idx))
    }

    // Use up to `frames` of the lead-in; returns how many were used.
    fn wait(&mut self, frames: usize) -> usize {
        let waited = frames.min(self.lead_in);
        self.lead_in -= waited;
        waited
    }

    /// Move the play head without producing audio.
    pub fn advance(&mut self, frames: usize) {
        let mut remaining = frames - self.wait(frames);
        while remaining > 0 && self.state != TrackState::Off {
            let run = self.run_length(remaining);
            self.curr_idx += run;
            remaining -= run;
            if self.curr_idx >= self.end_idx && !self.end_reached() {
                break;
            }
        }
    }

    /// Sum the next `out_left.len()` frames into the mixdown and advance.
    pub fn mix_into(&mut self, out_left: &mut [f32], out_right: &mut [f32]) {
        let frames = out_left.len().min(out_right.len());
        let mut written = self.wait(frames);
        while written < frames && self.state != TrackState::Off {
            let run = self.run_length(frames - written);
            let (c, w) = (self.curr_idx, written);
            add_into(
                &mut out_left[w..w + run],
                &self.channel_left[c..c + run],
            );
            add_into(
                &mut out_right[w..w + run],
                &self.channel_right[c..c + run],
            );
            self.curr_idx += run;
            written += run;
            if self.curr_idx >= self.end_idx && !self.end_reached() {
                break;
            }
        }
    }

    /// Overwrite the buffer with input at the write head, extending the take.
    /// Returns `true` once the buffer is full.
    pub fn record_input(&mut self, in_left: &[f32], in_right: &[f32]) -> bool {
        let frames = in_left.len().min(in_right.len());
        let run = frames.min(self.capacity().saturating_sub(self.curr_idx));
        let c = self.curr_idx;
        self.channel_left[c..c + run].copy_from_slice(&in_left[..run]);
        self.channel_right[c..c + run].copy_from_slice(&in_right[..run]);
        self.curr_idx += run;
        self.end_idx = self.curr_idx;
        self.curr_idx >= self.capacity()
    }

    /// Play existing content into the mixdown, then sum input into it.
    /// The overdub pass loops over the existing length, waiting out the rest
    /// of the loop when the content is shorter and does not repeat.
    pub fn overdub_input(
        &mut self,
        in_left: &[f32],
        in_right: &[f32],
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let frames = in_left
            .len()
            .min(in_right.len())
            .min(out_left.len())
            .min(out_right.len());
        let mut written = self.wait(frames);
        while written < frames && self.has_content() {
            let run = self.run_length(frames - written);
            let (c, w) = (self.curr_idx, written);
            add_into(
                &mut out_left[w..w + run],
                &self.channel_left[c..c + run],
            );
            add_into(
                &mut out_right[w..w + run],
                &self.channel_right[c..c + run],
            );
            overdub(&in_left[w..w + run], &mut self.channel_left[c..c + run], run);
            overdub(&in_right[w..w + run], &mut self.channel_right[c..c + run], run);
            self.curr_idx += run;
            written += run;
            if self.curr_idx >= self.end_idx {
                self.curr_idx = self.start_idx;
                if !self.repeat {
                    self.lead_in = self.loop_len.saturating_sub(self.len());
                    written += self.wait(frames - written);
                }
            }
        }
    }

    pub fn snapshot(&self, index: usize) -> TrackSnapshot {
        TrackSnapshot {
            index,
            state: self.state,
            start_idx: self.start_idx,
            end_idx: self.end_idx,
            curr_idx: self.curr_idx,
            repeat: self.repeat,
            overdub: self.overdub,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(samples: &[f32], repeat: bool) -> Track {
        let mut track = Track::new(64);
        track.start_recording(0, repeat);
        track.record_input(samples, samples);
        track.finish_recording();
        track
    }

    #[test]
    fn test_record_then_play_reproduces_input() {
        let input = [0.1, 0.2, 0.3, 0.4, 0.5];
        let mut track = recorded(&input, false);
        assert_eq!(track.state, TrackState::Playback);
        assert_eq!(track.len(), 5);

        let mut left = [0.0; 5];
        let mut right = [0.0; 5];
        track.mix_into(&mut left, &mut right);
        assert_eq!(left, input);
        assert_eq!(right, input);
    }

    #[test]
    fn test_non_repeating_track_goes_off_but_keeps_content() {
        let mut track = recorded(&[1.0, 1.0, 1.0], false);
        let mut left = [0.0; 5];
        let mut right = [0.0; 5];
        track.mix_into(&mut left, &mut right);

        assert_eq!(left, [1.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(track.state, TrackState::Off);
        assert_eq!(track.end_idx, 3);
        assert!(track.has_content());

        track.start_playing();
        assert_eq!(track.curr_idx, track.start_idx);
        assert_eq!(track.state, TrackState::Playback);
    }

    #[test]
    fn test_repeating_track_wraps_to_start() {
        let mut track = recorded(&[1.0, 2.0, 3.0], true);
        let mut left = [0.0; 7];
        let mut right = [0.0; 7];
        track.mix_into(&mut left, &mut right);
        assert_eq!(left, [1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        assert_eq!(track.curr_idx, 1);
        assert_eq!(track.state, TrackState::Playback);
    }

    #[test]
    fn test_recording_at_offset_keeps_start() {
        let mut track = Track::new(16);
        track.start_recording(4, false);
        track.record_input(&[0.5; 3], &[0.25; 3]);
        assert_eq!((track.start_idx, track.end_idx), (4, 7));
        assert_eq!(track.settled_len(), 0);

        track.finish_recording();
        assert_eq!(track.settled_len(), 3);
        assert_eq!(track.curr_idx, 4);
        assert_eq!(&track.channel_right[4..7], &[0.25; 3]);
    }

    #[test]
    fn test_record_reports_full_buffer() {
        let mut track = Track::new(4);
        track.start_recording(0, false);
        assert!(!track.record_input(&[1.0; 3], &[1.0; 3]));
        assert!(track.record_input(&[2.0; 3], &[2.0; 3]));
        assert_eq!(track.end_idx, 4);
        assert_eq!(track.channel_left, vec![1.0, 1.0, 1.0, 2.0]);
    }

    #[test]
    fn test_empty_take_clears_track() {
        let mut track = Track::new(8);
        track.start_recording(3, true);
        track.finish_recording();
        assert_eq!(track.state, TrackState::Off);
        assert_eq!((track.start_idx, track.end_idx), (0, 0));
    }

    #[test]
    fn test_overdub_sums_and_loops() {
        let mut track = recorded(&[1.0, 1.0], false);
        track.start_overdub();

        let mut left = [0.0; 3];
        let mut right = [0.0; 3];
        track.overdub_input(&[0.5, 0.25, 0.125], &[0.0; 3], &mut left, &mut right);

        // Output carries the content as it was before the new layer.
        assert_eq!(left, [1.0, 1.0, 1.5]);
        assert_eq!(&track.channel_left[..2], &[1.625, 1.25]);
        assert_eq!(track.end_idx, 2);
        assert_eq!(track.curr_idx, 1);
    }

    #[test]
    fn test_advance_follows_repeat_rules() {
        let mut looping = recorded(&[0.0; 4], true);
        looping.advance(10);
        assert_eq!(looping.curr_idx, 2);
        assert_eq!(looping.state, TrackState::Playback);

        let mut once = recorded(&[0.0; 4], false);
        once.advance(10);
        assert_eq!(once.state, TrackState::Off);
    }

    #[test]
    fn test_muted_track_parks_at_end() {
        let mut track = recorded(&[0.0; 4], false);
        track.state = TrackState::Mute;
        track.advance(6);
        assert_eq!(track.state, TrackState::Mute);
        assert_eq!(track.curr_idx, 4);
        track.advance(6);
        assert_eq!(track.curr_idx, 4);
    }

    #[test]
    fn test_align_waits_for_start_position() {
        // Four frames recorded at loop position 10 of a 40-frame loop.
        let mut track = Track::new(64);
        track.start_recording(10, false);
        track.record_input(&[1.0, 2.0, 3.0, 4.0], &[0.0; 4]);
        track.finish_recording();

        track.align(20, 40);
        assert_eq!((track.curr_idx, track.lead_in), (10, 30));
        track.align(12, 40);
        assert_eq!((track.curr_idx, track.lead_in), (12, 0));

        // Loop position 6: silent for four frames, then the take.
        track.align(6, 40);
        let mut left = [0.0; 10];
        let mut right = [0.0; 10];
        track.mix_into(&mut left, &mut right);
        assert_eq!(left, [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
        assert_eq!(track.state, TrackState::Off);
    }

    #[test]
    fn test_align_repeating_track_keeps_phase() {
        let mut track = Track::new(64);
        track.start_recording(10, true);
        track.record_input(&[1.0, 2.0, 3.0], &[0.0; 3]);
        track.finish_recording();

        // 25 frames past the start is 8 passes and one frame.
        track.align(35, 40);
        assert_eq!((track.curr_idx, track.lead_in), (11, 0));
        track.align(0, 40);
        assert_eq!(track.curr_idx, 10 + 30 % 3);
    }

    #[test]
    fn test_advance_consumes_lead_in_first() {
        let mut track = recorded(&[0.0; 4], false);
        track.align(6, 8);
        assert_eq!(track.lead_in, 2);
        track.advance(3);
        assert_eq!((track.curr_idx, track.lead_in), (1, 0));
    }

    #[test]
    fn test_short_overdub_waits_out_the_loop() {
        let mut track = recorded(&[1.0, 1.0], false);
        track.start_overdub();
        track.align(0, 4);

        let mut left = [0.0; 6];
        let mut right = [0.0; 6];
        track.overdub_input(&[0.5; 6], &[0.0; 6], &mut left, &mut right);
        // Content at loop positions 0 and 1 only, input summed there.
        assert_eq!(left, [1.0, 1.0, 0.0, 0.0, 1.5, 1.5]);
        assert_eq!(&track.channel_left[..2], &[2.0, 2.0]);
    }

    #[test]
    fn test_pulse_markers_ring() {
        let mut track = Track::new(32);
        for i in 0..(PULSE_MARKER_COUNT + 2) {
            track.curr_idx = i;
            track.mark_pulse();
        }
        let markers: Vec<usize> = track.pulse_markers().collect();
        assert_eq!(markers, (2..PULSE_MARKER_COUNT + 2).collect::<Vec<_>>());
    }
}
