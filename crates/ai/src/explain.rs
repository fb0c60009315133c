use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExplanationError;
use crate::fallback::fallback_explanation;

/// Largest micro-batch an explanation call may carry.
pub const MAX_EXPLAIN_BATCH: usize = 5;

/// Turns anomalous `(line, score)` pairs into human-readable text.
///
/// Implementations should return one explanation per input entry. Callers go through
/// [`explain_or_fallback`], which repairs short, long, or failed answers.
#[async_trait]
pub trait ExplanationProvider: Send + Sync {
    async fn explain(&self, batch: &[(String, f64)]) -> Result<Vec<String>, ExplanationError>;
}

#[async_trait]
impl<P> ExplanationProvider for Arc<P>
where
    P: ExplanationProvider + ?Sized,
{
    async fn explain(&self, batch: &[(String, f64)]) -> Result<Vec<String>, ExplanationError> {
        (**self).explain(batch).await
    }
}

/// Explain `batch` with exactly one non-empty string per entry.
///
/// A provider error yields the fallback for every entry; missing or blank
/// entries are filled with the fallback for that line; extra entries are dropped.
pub async fn explain_or_fallback<P>(provider: &P, batch: &[(String, f64)]) -> Vec<String>
where
    P: ExplanationProvider + ?Sized,
{
    if batch.is_empty() {
        return Vec::new();
    }

    let mut explanations = match provider.explain(batch).await {
        Ok(explanations) => explanations,
        Err(e) => {
            tracing::warn!(error = %e, batch = batch.len(), "explanation provider failed; using fallback");
            Vec::new()
        }
    };

    if explanations.len() < batch.len() && !explanations.is_empty() {
        tracing::debug!(
            expected = batch.len(),
            got = explanations.len(),
            "padding short explanation batch"
        );
    }
    explanations.truncate(batch.len());

    batch
        .iter()
        .enumerate()
        .map(|(i, (line, score))| match explanations.get_mut(i) {
            Some(text) if !text.trim().is_empty() => std::mem::take(text),
            _ => fallback_explanation(line, *score),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Result<Vec<String>, ()>);

    #[async_trait]
    impl ExplanationProvider for Scripted {
        async fn explain(&self, _batch: &[(String, f64)]) -> Result<Vec<String>, ExplanationError> {
            self.0
                .clone()
                .map_err(|_| ExplanationError::Transport("connection refused".into()))
        }
    }

    fn batch(n: usize) -> Vec<(String, f64)> {
        (0..n).map(|i| (format!("ERROR line {i}"), -0.1)).collect()
    }

    #[tokio::test]
    async fn pads_short_answers() {
        let p = Scripted(Ok(vec!["first".into(), "   ".into()]));
        let out = explain_or_fallback(&p, &batch(3)).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], "first");
        assert_eq!(out[1], fallback_explanation("ERROR line 1", -0.1));
        assert!(!out[2].is_empty());
    }

    #[tokio::test]
    async fn drops_extra_answers() {
        let p = Scripted(Ok(vec!["a".into(), "b".into(), "c".into()]));
        assert_eq!(explain_or_fallback(&p, &batch(2)).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn provider_failure_falls_back() {
        let p = Scripted(Err(()));
        let out = explain_or_fallback(&p, &batch(2)).await;
        assert_eq!(out, vec![
            fallback_explanation("ERROR line 0", -0.1),
            fallback_explanation("ERROR line 1", -0.1),
        ]);
    }
}
