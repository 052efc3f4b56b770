//! Token budgeting: estimation, head+tail truncation and greedy selection.
//!
//! Guarantees for `select`: the summed `token_estimate` of the result never
//! exceeds `max_tokens` and the result never has more than `max_items` items.

use super::ContextItem;

/// Rough model-token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn marker(omitted_lines: usize) -> String {
    format!("... [{} lines truncated] ...", omitted_lines)
}

/// Shrink `content` to at most `max_tokens`, keeping a head segment (about
/// two thirds of the allowance) and a tail segment with a marker between them.
/// Cuts fall on line boundaries unless a single line is larger than a segment.
/// Returns `None` when the allowance cannot even hold the marker.
pub fn truncate_head_tail(content: &str, max_tokens: usize) -> Option<String> {
    if estimate_tokens(content) <= max_tokens {
        return Some(content.to_string());
    }

    let allowed_chars = max_tokens.saturating_mul(4);
    let lines: Vec<&str> = content.lines().collect();

    // Size the marker for the worst case so the final text cannot overrun.
    let marker_len = marker(lines.len().max(1)).len();
    if allowed_chars <= marker_len + 2 {
        return None;
    }
    let budget = allowed_chars - marker_len;
    let head_budget = budget * 2 / 3;
    let tail_budget = budget - head_budget;

    let mut head_n = 0;
    let mut used = 0;
    for line in &lines {
        let cost = line.chars().count() + 1;
        if used + cost > head_budget {
            break;
        }
        used += cost;
        head_n += 1;
    }

    // A first line longer than the head segment keeps its prefix.
    let head = if head_n > 0 {
        lines[..head_n].join("\n")
    } else {
        prefix(lines.first().copied().unwrap_or(""), head_budget.saturating_sub(1))
    };
    let rest = &lines[head_n.max(1).min(lines.len())..];

    let mut tail_n = 0;
    used = 0;
    for line in rest.iter().rev() {
        let cost = line.chars().count() + 1;
        if used + cost > tail_budget {
            break;
        }
        used += cost;
        tail_n += 1;
    }

    // Likewise a last line longer than the tail segment keeps its suffix.
    let tail = if tail_n > 0 {
        rest[rest.len() - tail_n..].join("\n")
    } else {
        let last = rest.last().or(lines.last()).copied().unwrap_or("");
        suffix(last, tail_budget.saturating_sub(1))
    };

    let omitted = lines.len() - head_n - tail_n;
    Some(format!("{}\n{}\n{}", head, marker(omitted), tail))
}

fn prefix(line: &str, chars: usize) -> String {
    line.chars().take(chars).collect()
}

fn suffix(line: &str, chars: usize) -> String {
    let total = line.chars().count();
    line.chars().skip(total.saturating_sub(chars)).collect()
}

/// Greedy selection over candidates already sorted best-first.
///
/// Items are taken whole while they fit. The first item that does not fit is
/// truncated to the remaining allowance and selection stops there.
pub fn select(
    candidates: Vec<ContextItem>,
    max_items: usize,
    max_tokens: usize,
) -> Vec<ContextItem> {
    let mut selected = Vec::new();
    let mut used = 0usize;

    for mut item in candidates {
        if selected.len() >= max_items {
            break;
        }
        let remaining = max_tokens.saturating_sub(used);
        if remaining == 0 {
            break;
        }

        if item.token_estimate <= remaining {
            used += item.token_estimate;
            selected.push(item);
            continue;
        }

        if let Some(content) = truncate_head_tail(&item.content, remaining) {
            item.token_estimate = estimate_tokens(&content);
            item.content = content;
            item.truncated = true;
            log::debug!(
                "Truncated {} to {} tokens to fit the remaining budget",
                item.path,
                item.token_estimate
            );
            selected.push(item);
        }
        break;
    }

    selected
}
