//! Job execution: the chunk processor and the single-flight orchestrator.
//!
//! ## Components
//!
//! - `ChunkProcessor`: scores, caps, explains and persists one chunk sub-batch by sub-batch
//! - `JobOrchestrator`: ingestion, the single-flight lease, the chunk loop, cancel and resume

pub mod orchestrator;
pub mod processor;

pub use orchestrator::{JobOrchestrator, JobReport, JobStatusView};
pub use processor::{ChunkOutcome, ChunkProcessor, ChunkSummary};
