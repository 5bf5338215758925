pub mod controller;
pub mod decoder;
pub mod event;
pub mod state;
pub mod transport;

pub use controller::{ACCEPT_BYTE, ControlMessage, Controller, REJECT_BYTE};
pub use decoder::CommandDecoder;
pub use event::SystemEvent;
pub use state::{StateMachine, SystemState};
