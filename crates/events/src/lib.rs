//! Progress events, cached job state, and the broadcast capability.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod state;

pub use bus::{
    job_state_key, job_topic, BroadcastError, BroadcastStore, RecvTimeoutError, Subscription,
};
pub use event::{BatchProgress, ChunkProgress, EventEnvelope, JobCompleted, JobFailed, ProgressEvent};
pub use in_memory_bus::InMemoryBroadcastStore;
pub use state::JobState;
