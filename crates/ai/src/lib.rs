//! `loglens-ai`
//!
//! **Responsibility:** the scoring and explanation capabilities the pipeline calls out to.
//!
//! This crate knows nothing about jobs, chunks, or stores:
//! - Scorers label lines; they never persist anything.
//! - Explanation providers turn anomalous lines into text, with a deterministic fallback.

pub mod error;
pub mod explain;
pub mod fallback;
pub mod ollama;
pub mod scorer;

pub use error::{ExplanationError, ScorerError};
pub use explain::{explain_or_fallback, ExplanationProvider, MAX_EXPLAIN_BATCH};
pub use fallback::{fallback_explanation, FallbackExplanationProvider, Severity};
pub use ollama::OllamaExplanationProvider;
pub use scorer::{KeywordScorer, LineScore, Scorer, SUSPICIOUS_KEYWORDS};
