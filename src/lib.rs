pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod timing;

pub use audio::{AudioStream, LooperEngine};
pub use config::LooperConfig;
pub use control::{Controller, StateMachine};
pub use error::{LooperError, LooperResult};
