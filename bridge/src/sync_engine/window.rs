// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scan window arithmetic

/// Highest block treated as final: `latest - depth`, saturating at 0.
pub fn safe_tip(latest: u64, confirmation_depth: u64) -> u64 {
    latest.saturating_sub(confirmation_depth)
}

/// First block of the next scan. A fresh direction starts at `start_block`,
/// afterwards scanning resumes right after the cursor.
pub fn next_from(cursor: Option<u64>, start_block: u64) -> u64 {
    match cursor {
        Some(c) => c.saturating_add(1),
        None => start_block,
    }
}

/// Inclusive `[from, to]` window bounded by `safe_tip` and `max_block_range`,
/// or `None` once the scan has caught up.
pub fn next_window(from: u64, safe_tip: u64, max_block_range: u64) -> Option<(u64, u64)> {
    if from > safe_tip {
        return None;
    }
    let span = max_block_range.max(1) - 1;
    Some((from, from.saturating_add(span).min(safe_tip)))
}
