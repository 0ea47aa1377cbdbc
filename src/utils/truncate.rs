//! Text shortening for prompts and log lines. All cuts land on UTF-8 boundaries.

/// Single-line preview of at most `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let kept: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Keep the head and tail of `text` within `max_bytes`, marking the elided middle.
///
/// Transcripts handed to reflection prompts use this so the opening brief and
/// the final exchanges both survive.
pub fn truncate_middle(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let half = max_bytes / 2;

    let mut head_end = half.min(text.len());
    while !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len().saturating_sub(half).max(head_end);
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }

    let elided = tail_start - head_end;
    format!("{}\n... [{} bytes elided] ...\n{}", &text[..head_end], elided, &text[tail_start..])
}
