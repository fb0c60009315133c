//! Ingestion validation and line-aligned chunk splitting.

use crate::error::{DomainError, DomainResult};

/// Validate a raw upload and decode it as UTF-8 text.
///
/// Rejected uploads never reach the job pipeline.
pub fn validate_upload(filename: &str, bytes: &[u8], max_bytes: u64) -> DomainResult<String> {
    if filename.trim().is_empty() {
        return Err(DomainError::validation("filename must not be empty"));
    }
    if bytes.len() as u64 > max_bytes {
        return Err(DomainError::validation(format!(
            "upload of {} bytes exceeds the {max_bytes} byte limit",
            bytes.len()
        )));
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DomainError::validation(format!("upload is not valid UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Err(DomainError::validation("upload contains no log lines"));
    }
    Ok(text.to_owned())
}

/// Split `content` into chunks of at most `max_chunk_bytes`, never cutting a line.
///
/// Lines are joined with `\n` inside a chunk. A single line longer than the
/// limit becomes a chunk of its own.
pub fn split_into_chunks(content: &str, max_chunk_bytes: usize) -> Vec<String> {
    let max_chunk_bytes = max_chunk_bytes.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut has_lines = false;

    for line in content.lines() {
        if has_lines && current.len() + 1 + line.len() > max_chunk_bytes {
            chunks.push(std::mem::take(&mut current));
            has_lines = false;
        }
        if has_lines {
            current.push('\n');
        }
        current.push_str(line);
        has_lines = true;
    }

    if has_lines {
        chunks.push(current);
    }
    chunks
}
