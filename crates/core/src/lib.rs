//! `loglens-core`: data model and domain rules of the log processing pipeline.
//!
//! No IO lives here: stores, brokers and model calls are infrastructure concerns.

pub mod chunk;
pub mod chunking;
pub mod error;
pub mod id;
pub mod job;

pub use chunk::{AnomalyRecord, Chunk, ChunkResult};
pub use chunking::{split_into_chunks, validate_upload};
pub use error::{DomainError, DomainResult};
pub use id::{ChunkId, JobId};
pub use job::{Job, JobStatus};
