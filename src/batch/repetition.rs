//! Detecting and truncating degenerate OCR output.
//!
//! LLM-based recognition backends can fall into repetition loops on
//! corrupted or low-quality page images, emitting the same line over and
//! over until they hit their token limit. We bound the damage here rather
//! than relying on backend cooperation.

use std::collections::HashMap;

use crate::prelude::*;

/// Texts shorter than this are never flagged. Short repetition loops are
/// tolerated, and legitimate documents (forms, tables) repeat short lines.
const MIN_SUSPECT_LEN: usize = 10_000;

/// Lines this short are ignored when counting repeats. They are too short to
/// be meaningfully "repetitive" and are often legitimate tokens.
const MIN_LINE_LEN: usize = 25;

/// Minimum number of qualifying lines before we trust the signal at all.
const MIN_QUALIFYING_LINES: usize = 5;

/// A single line repeated this many times classifies the text as degenerate.
const REPEAT_THRESHOLD: usize = 20;

/// Appended to truncated output so the caller can tell what happened.
const TRUNCATION_NOTICE: &str = "\n\n[Truncated: repetitive OCR output detected]";

/// Is this text stuck in a repetition loop?
///
/// All thresholds are measured in characters, not bytes, so multi-byte
/// scripts are judged by the same yardstick as ASCII.
fn is_repetitive(markdown: &str) -> bool {
    // The byte length is a free lower bound on the character count.
    if markdown.len() < MIN_SUSPECT_LEN {
        return false;
    }
    if markdown.chars().count() < MIN_SUSPECT_LEN {
        return false;
    }

    let lines = markdown
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > MIN_LINE_LEN)
        .collect::<Vec<_>>();
    if lines.len() < MIN_QUALIFYING_LINES {
        return false;
    }

    let mut seen = HashMap::<&str, usize>::new();
    for line in lines {
        let count = seen.entry(line).or_insert(0);
        *count += 1;
        if *count >= REPEAT_THRESHOLD {
            return true;
        }
    }
    false
}

/// Pass recognized text through the repetition guard.
///
/// Returns the text unchanged, or its first [`MIN_SUSPECT_LEN`] characters
/// plus a visible annotation if it looks degenerate.
pub fn guard_output(markdown: String) -> String {
    if is_repetitive(&markdown) {
        warn!(
            len = markdown.len(),
            "truncating repetitive OCR output"
        );
        let mut truncated = markdown.chars().take(MIN_SUSPECT_LEN).collect::<String>();
        truncated.push_str(TRUNCATION_NOTICE);
        truncated
    } else {
        markdown
    }
}
