//! Shared guardrails for value-tree traversal and worker bounds.

// Value tree traversal
pub const MAX_VALUE_DEPTH: usize = 32;
pub const MAX_VALUE_NODES: usize = 10_000;

// Import fan-out
pub const MAX_BATCH_WORKERS: usize = 32;
pub const MAX_REFERENCED_IMPORTS: usize = 50;

// Remote fetch
pub const MIN_FETCH_TIMEOUT_SECS: u64 = 1;
pub const MAX_FETCH_TIMEOUT_SECS: u64 = 300;
pub const MALFORMED_EXCERPT_CHARS: usize = 200;

pub fn clamp_usize(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

pub fn clamp_workers(value: usize) -> usize {
    clamp_usize(value, 1, MAX_BATCH_WORKERS)
}

pub fn clamp_timeout_secs(value: u64) -> u64 {
    value.clamp(MIN_FETCH_TIMEOUT_SECS, MAX_FETCH_TIMEOUT_SECS)
}

/// Truncate `text` to at most `max_chars` characters, respecting char
/// boundaries.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
