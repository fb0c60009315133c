//! Infrastructure layer: stores, broadcast adapters, configuration, and the job pipeline.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod jobs;
pub mod progress;
pub mod store;


pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use jobs::{ChunkOutcome, ChunkProcessor, ChunkSummary, JobOrchestrator, JobReport, JobStatusView};
pub use progress::{JobUpdate, JobUpdates, ProgressPublisher, SubscriptionGateway};
pub use store::{
    ChunkStore, InMemoryChunkStore, InMemoryJobStore, JobStore, PostgresChunkStore,
    PostgresJobStore, StoreError,
};
