pub mod engine;
pub mod group;
pub mod mixer;
pub mod schedule;
pub mod store;
pub mod stream;
pub mod track;

pub use engine::{EngineHandle, LooperEngine};
pub use group::GroupTable;
pub use schedule::{EngineEvent, FrameClock, Mutation, ScheduledMutation};
pub use store::TrackStore;
pub use stream::AudioStream;
pub use track::{Track, TrackSnapshot, TrackState};
