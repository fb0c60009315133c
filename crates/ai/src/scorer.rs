use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScorerError;

/// Label for one scored line. `score` lies in `(-1, 0]`; lower is more anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineScore {
    pub is_anomaly: bool,
    pub score: f64,
}

impl LineScore {
    pub fn normal() -> Self {
        Self {
            is_anomaly: false,
            score: 0.0,
        }
    }
}

/// Labels a batch of lines. The output has exactly one entry per input line, in order.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, lines: &[String]) -> Result<Vec<LineScore>, ScorerError>;
}

#[async_trait]
impl<S> Scorer for Arc<S>
where
    S: Scorer + ?Sized,
{
    async fn score(&self, lines: &[String]) -> Result<Vec<LineScore>, ScorerError> {
        (**self).score(lines).await
    }
}

pub const SUSPICIOUS_KEYWORDS: [&str; 7] = [
    "error",
    "failed",
    "unauthorized",
    "exception",
    "timeout",
    "denied",
    "critical",
];

const PER_KEYWORD_PENALTY: f64 = 0.06;
const MIN_SCORE: f64 = -0.99;

/// Deterministic scorer flagging lines that mention suspicious keywords.
///
/// Model:
/// - Count the distinct keywords present (case-insensitive).
/// - Any hit marks the line anomalous with score `-(0.06 * hits)`.
/// - Lines without hits score `0.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score_line(line: &str) -> LineScore {
        let lower = line.to_lowercase();
        let hits = SUSPICIOUS_KEYWORDS
            .iter()
            .filter(|kw| lower.contains(*kw))
            .count();
        if hits == 0 {
            return LineScore::normal();
        }
        LineScore {
            is_anomaly: true,
            score: (-(PER_KEYWORD_PENALTY * hits as f64)).max(MIN_SCORE),
        }
    }
}

#[async_trait]
impl Scorer for KeywordScorer {
    async fn score(&self, lines: &[String]) -> Result<Vec<LineScore>, ScorerError> {
        Ok(lines.iter().map(|l| Self::score_line(l)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_normal() {
        let s = KeywordScorer::score_line("2024-01-01 INFO request served in 12ms");
        assert_eq!(s, LineScore::normal());
    }

    #[test]
    fn more_keywords_score_lower() {
        let one = KeywordScorer::score_line("ERROR disk almost full");
        let three = KeywordScorer::score_line("ERROR failed unauthorized access");
        assert!(one.is_anomaly && three.is_anomaly);
        assert!(three.score < one.score);
        assert!(three.score > -1.0 && one.score < 0.0);
    }

    #[tokio::test]
    async fn batch_output_matches_input_length() {
        let lines = vec![
            "ok".to_string(),
            "connection timeout".to_string(),
            String::new(),
        ];
        let scores = KeywordScorer.score(&lines).await.unwrap();
        assert_eq!(scores.len(), 3);
        assert!(!scores[0].is_anomaly);
        assert!(scores[1].is_anomaly);
    }
}
