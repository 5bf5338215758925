//! Error types for command decoding and state transitions

use thiserror::Error;

use crate::control::{SystemEvent, SystemState};

/// A command frame that could not be turned into a system event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Command frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("Unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("Expected a decimal digit at offset {offset}, found 0x{byte:02x}")]
    InvalidDigit { offset: usize, byte: u8 },

    #[error("Track {track} out of range (0..{limit})")]
    TrackOutOfRange { track: usize, limit: usize },

    #[error("Group {group} out of range (0..{limit})")]
    GroupOutOfRange { group: usize, limit: usize },
}

/// Reasons a command is rejected. None of these change system state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LooperError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{event:?} is not legal in state {state:?}")]
    IllegalTransition {
        event: SystemEvent,
        state: SystemState,
    },

    /// The track already has a mutation the engine has not applied yet.
    #[error("Track {track} already has a pending mutation")]
    SchedulingConflict { track: usize },

    #[error("Mutation queue is full")]
    QueueFull,
}

pub type LooperResult<T> = Result<T, LooperError>;
