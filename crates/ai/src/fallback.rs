//! Deterministic explanations used when no provider answer is available.

use async_trait::async_trait;

use crate::error::ExplanationError;
use crate::explain::ExplanationProvider;

/// Score-range classification used to pick fallback wording.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn from_score(score: f64) -> Self {
        if score < -0.2 {
            Severity::Critical
        } else if score < -0.1 {
            Severity::High
        } else if score < -0.05 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Templated, never-empty explanation for `line`.
pub fn fallback_explanation(line: &str, score: f64) -> String {
    let lower = line.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let severity = Severity::from_score(score);

    if has(&["error", "failed"]) {
        if has(&["timeout"]) {
            "The system is hitting timeouts: a service is not answering in time, which can make requests fail".to_string()
        } else if has(&["connection"]) {
            "There are connectivity problems: the system cannot reach another service it depends on".to_string()
        } else if has(&["memory", "oom"]) {
            "The system is running out of memory, which can make applications crash or slow down".to_string()
        } else if has(&["disk", "space"]) {
            "The disk is full or nearly full, so the system cannot write the files it needs".to_string()
        } else if has(&["permission", "denied"]) {
            "There are permission problems: the system cannot access some files or resources".to_string()
        } else {
            format!("An error was detected (severity: {severity}); it indicates a problem that needs attention")
        }
    } else if has(&["warning", "warn"]) {
        "A warning was logged: the system still works but something may turn into a problem".to_string()
    } else {
        format!("Unusual behaviour was detected (severity: {severity}) and should be reviewed")
    }
}

/// Provider that always answers with [`fallback_explanation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackExplanationProvider;

#[async_trait]
impl ExplanationProvider for FallbackExplanationProvider {
    async fn explain(&self, batch: &[(String, f64)]) -> Result<Vec<String>, ExplanationError> {
        Ok(batch
            .iter()
            .map(|(line, score)| fallback_explanation(line, *score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_buckets() {
        assert_eq!(Severity::from_score(-0.5), Severity::Critical);
        assert_eq!(Severity::from_score(-0.2), Severity::High);
        assert_eq!(Severity::from_score(-0.15), Severity::High);
        assert_eq!(Severity::from_score(-0.1), Severity::Medium);
        assert_eq!(Severity::from_score(-0.05), Severity::Low);
        assert_eq!(Severity::from_score(0.0), Severity::Low);
    }

    #[test]
    fn keyword_templates() {
        assert!(fallback_explanation("ERROR connection timeout", -0.1).contains("timeouts"));
        assert!(fallback_explanation("failed: connection refused", -0.1).contains("connectivity"));
        assert!(fallback_explanation("error: permission denied", -0.3).contains("permission"));
        assert!(fallback_explanation("WARN slow query", -0.01).contains("warning"));
    }

    #[test]
    fn generic_templates_carry_severity() {
        assert!(fallback_explanation("ERROR something odd", -0.3).contains("critical"));
        assert!(fallback_explanation("unauthorized access", -0.06).contains("medium"));
    }
}
