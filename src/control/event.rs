/// A decoded operator command.
///
/// Serial frames and discrete hardware triggers both end up as one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    RecordTrack {
        track: usize,
        group: usize,
        repeat: bool,
    },
    OverdubTrack {
        track: usize,
        group: usize,
    },
    PlayTrack {
        track: usize,
    },
    MuteTrack {
        track: usize,
    },
    UnmuteTrack {
        track: usize,
    },
    AddTrackToGroup {
        track: usize,
        group: usize,
    },
    RemoveTrackFromGroup {
        track: usize,
        group: usize,
    },
    SetActiveGroup {
        group: usize,
    },
    /// System reset: every track off and empty.
    Passthrough,
    Calibrate,
    Quit,
}

impl SystemEvent {
    pub fn track(&self) -> Option<usize> {
        match *self {
            SystemEvent::RecordTrack { track, .. }
            | SystemEvent::OverdubTrack { track, .. }
            | SystemEvent::PlayTrack { track }
            | SystemEvent::MuteTrack { track }
            | SystemEvent::UnmuteTrack { track }
            | SystemEvent::AddTrackToGroup { track, .. }
            | SystemEvent::RemoveTrackFromGroup { track, .. } => Some(track),
            _ => None,
        }
    }

    pub fn group(&self) -> Option<usize> {
        match *self {
            SystemEvent::RecordTrack { group, .. }
            | SystemEvent::OverdubTrack { group, .. }
            | SystemEvent::AddTrackToGroup { group, .. }
            | SystemEvent::RemoveTrackFromGroup { group, .. }
            | SystemEvent::SetActiveGroup { group } => Some(group),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_carried_by_events() {
        let record = SystemEvent::RecordTrack {
            track: 3,
            group: 1,
            repeat: true,
        };
        assert_eq!((record.track(), record.group()), (Some(3), Some(1)));

        let select = SystemEvent::SetActiveGroup { group: 2 };
        assert_eq!((select.track(), select.group()), (None, Some(2)));

        assert_eq!(SystemEvent::PlayTrack { track: 9 }.group(), None);
        assert_eq!(SystemEvent::Quit.track(), None);
    }
}
