//! Explanation provider backed by an Ollama-style `/api/generate` endpoint.
//!
//! One request per micro-batch. The model is asked to answer with one
//! `ANOMALY <n>: <text>` line per input. Answers are placed by `n`, so an entry
//! the model skips stays blank for the caller to pad.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExplanationError;
use crate::explain::ExplanationProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_EXPLANATION_CHARS: usize = 300;
const STRIPPED_PREFIXES: [&str; 6] = [
    "Problem:",
    "Impact:",
    "Solution:",
    "Analysis:",
    "Explanation:",
    "Answer:",
];

#[derive(Debug, Clone)]
pub struct OllamaExplanationProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaExplanationProvider {
    pub fn new(base_url: impl AsRef<str>, model: impl Into<String>) -> Result<Self, ExplanationError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.as_ref().trim_end_matches('/')),
            model: model.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExplanationProvider for OllamaExplanationProvider {
    async fn explain(&self, batch: &[(String, f64)]) -> Result<Vec<String>, ExplanationError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let request = GenerateRequest {
            model: &self.model,
            prompt: batch_prompt(batch),
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                top_p: 0.9,
            },
        };

        let resp = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExplanationError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: GenerateResponse = resp.json().await?;
        if body.response.trim().is_empty() {
            return Err(ExplanationError::EmptyResponse);
        }

        let explanations = parse_batch_response(&body.response, batch.len());
        tracing::debug!(
            expected = batch.len(),
            parsed = explanations.iter().filter(|e| !e.is_empty()).count(),
            "parsed explanation batch"
        );
        Ok(explanations)
    }
}

fn batch_prompt(batch: &[(String, f64)]) -> String {
    let mut prompt = format!(
        "You are an expert in system log analysis. Explain what is happening in each of these {} \
         anomalous log lines in plain language for a non-technical reader: what is wrong, why it \
         matters, and what may happen if it is not fixed. At most three sentences per anomaly.\n\n\
         Answer with exactly one line per anomaly, in this format:\n\
         ANOMALY 1: <explanation>\n\
         ANOMALY 2: <explanation>\n\n\
         ANOMALIES:",
        batch.len()
    );
    for (i, (line, score)) in batch.iter().enumerate() {
        prompt.push_str(&format!("\n\nANOMALY {} (score: {score:.3}):\n{line}", i + 1));
    }
    prompt
}

/// Map `ANOMALY <n>: <text>` lines onto `expected` slots, 1-based.
///
/// Unanswered slots are empty. Out-of-range numbers are ignored and the first
/// answer for a number wins.
fn parse_batch_response(response: &str, expected: usize) -> Vec<String> {
    let mut slots = vec![String::new(); expected];
    for line in response.lines() {
        let Some((n, text)) = numbered_answer(line) else {
            continue;
        };
        let Some(slot) = n.checked_sub(1).and_then(|i| slots.get_mut(i)) else {
            continue;
        };
        if slot.is_empty() {
            *slot = clean_explanation(text);
        }
    }
    slots
}

/// Split `ANOMALY 3: text` (or `ANOMALY 3 (score: -0.2): text`) into `(3, "text")`.
fn numbered_answer(line: &str) -> Option<(usize, &str)> {
    let rest = line.trim().strip_prefix("ANOMALY ")?.trim_start();
    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let n = rest[..digits].parse().ok()?;

    let mut text = rest[digits..].trim_start();
    if text.starts_with('(') {
        text = text.split_once(')').map_or("", |(_, after)| after);
    }
    Some((n, text.trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace())))
}

fn clean_explanation(raw: &str) -> String {
    let mut text = raw.trim();
    for prefix in STRIPPED_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
        }
    }
    let text = text.trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());

    if text.chars().count() > MAX_EXPLANATION_CHARS {
        let mut cut: String = text.chars().take(MAX_EXPLANATION_CHARS - 3).collect();
        cut.push_str("...");
        cut
    } else {
        text.trim_end().to_string()
    }
}
