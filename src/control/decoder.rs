//! Fixed-layout command frames
//!
//! ```text
//! offset  0        1  2     3        4      5
//!         command  track    sub-cmd  group  terminator
//! ```
//!
//! Group select carries its group digit at offset 1. Command letters are
//! case-insensitive; a record frame whose sub-command is `r` records with
//! repeat enabled.

use super::event::SystemEvent;
use crate::config::MIN_FRAME_LENGTH;
use crate::error::DecodeError;

const CMD_OFFSET: usize = 0;
const TRACK_OFFSET: usize = 1;
const SUB_CMD_OFFSET: usize = 3;
const GROUP_OFFSET: usize = 4;
const GROUP_SELECT_OFFSET: usize = 1;

#[derive(Debug, Clone, Copy)]
pub struct CommandDecoder {
    num_tracks: usize,
    num_groups: usize,
}

impl CommandDecoder {
    pub fn new(num_tracks: usize, num_groups: usize) -> Self {
        Self {
            num_tracks,
            num_groups,
        }
    }

    pub fn decode(&self, frame: &[u8]) -> Result<SystemEvent, DecodeError> {
        if frame.len() < MIN_FRAME_LENGTH {
            return Err(DecodeError::TooShort {
                len: frame.len(),
                min: MIN_FRAME_LENGTH,
            });
        }

        let event = match frame[CMD_OFFSET].to_ascii_lowercase() {
            b'r' => SystemEvent::RecordTrack {
                track: self.track(frame)?,
                group: self.group(frame, GROUP_OFFSET)?,
                repeat: frame[SUB_CMD_OFFSET].eq_ignore_ascii_case(&b'r'),
            },
            b'o' => SystemEvent::OverdubTrack {
                track: self.track(frame)?,
                group: self.group(frame, GROUP_OFFSET)?,
            },
            b'p' => SystemEvent::PlayTrack {
                track: self.track(frame)?,
            },
            b'm' => SystemEvent::MuteTrack {
                track: self.track(frame)?,
            },
            b'u' => SystemEvent::UnmuteTrack {
                track: self.track(frame)?,
            },
            b't' => SystemEvent::AddTrackToGroup {
                track: self.track(frame)?,
                group: self.group(frame, GROUP_OFFSET)?,
            },
            b'd' => SystemEvent::RemoveTrackFromGroup {
                track: self.track(frame)?,
                group: self.group(frame, GROUP_OFFSET)?,
            },
            b'g' => SystemEvent::SetActiveGroup {
                group: self.group(frame, GROUP_SELECT_OFFSET)?,
            },
            b's' => SystemEvent::Passthrough,
            b'c' => SystemEvent::Calibrate,
            b'q' => SystemEvent::Quit,
            _ => return Err(DecodeError::UnknownCommand(frame[CMD_OFFSET])),
        };
        Ok(event)
    }

    fn track(&self, frame: &[u8]) -> Result<usize, DecodeError> {
        let track = digit(frame, TRACK_OFFSET)? * 10 + digit(frame, TRACK_OFFSET + 1)?;
        if track >= self.num_tracks {
            return Err(DecodeError::TrackOutOfRange {
                track,
                limit: self.num_tracks,
            });
        }
        Ok(track)
    }

    fn group(&self, frame: &[u8], offset: usize) -> Result<usize, DecodeError> {
        let group = digit(frame, offset)?;
        if group >= self.num_groups {
            return Err(DecodeError::GroupOutOfRange {
                group,
                limit: self.num_groups,
            });
        }
        Ok(group)
    }
}

fn digit(frame: &[u8], offset: usize) -> Result<usize, DecodeError> {
    match frame[offset] {
        byte @ b'0'..=b'9' => Ok(usize::from(byte - b'0')),
        byte => Err(DecodeError::InvalidDigit { offset, byte }),
    }
}
