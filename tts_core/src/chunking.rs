//! Splitting text into pieces a synthesizer will accept.

/// Ceiling used when a single paragraph is too long to synthesize at once.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 4000;

/// Split `text` into ordered chunks of at most `max_len` characters.
///
/// Cuts prefer, in order: right after the last `.`, `!` or `?` inside the
/// window, right after the last space, then a hard cut at `max_len`. A
/// sentence or word cut is only taken if it lies past the middle of the window
/// so no chunk degenerates into a sliver. Whitespace at cut points is dropped.
///
/// Text that already fits is returned unchanged as a single chunk; blank text
/// yields no chunks.
pub fn split_long_paragraph(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    if text.trim().is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let half = max_len as f64 * 0.5;
    let past_half = |pos: &usize| *pos as f64 > half;

    let mut chunks = Vec::new();
    let mut remaining: Vec<char> = text.chars().collect();
    while remaining.len() > max_len {
        let sentence_end = remaining[..max_len]
            .iter()
            .rposition(|&c| matches!(c, '.' | '!' | '?'))
            .filter(past_half);
        let last_space = remaining[..=max_len]
            .iter()
            .rposition(|&c| c == ' ')
            .filter(past_half);

        let cut = match (sentence_end, last_space) {
            (Some(pos), _) | (None, Some(pos)) => pos + 1,
            (None, None) => max_len,
        };

        let head: String = remaining[..cut].iter().collect();
        let head = head.trim();
        if !head.is_empty() {
            chunks.push(head.to_string());
        }
        let rest: String = remaining[cut..].iter().collect();
        remaining = rest.trim().chars().collect();
    }

    if !remaining.is_empty() {
        chunks.push(remaining.into_iter().collect());
    }
    chunks
}

/// Split text into paragraphs on blank lines.
///
/// A single paragraph that still contains line breaks is split per line, and
/// a single over-long paragraph goes through [`split_long_paragraph`].
pub fn split_into_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            push_paragraph(&mut paragraphs, &mut current);
        } else {
            current.push(line);
        }
    }
    push_paragraph(&mut paragraphs, &mut current);

    if paragraphs.len() == 1 && text.contains('\n') {
        return text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
    }
    if paragraphs.len() == 1 && paragraphs[0].chars().count() > DEFAULT_MAX_CHUNK_CHARS {
        return split_long_paragraph(&paragraphs[0], DEFAULT_MAX_CHUNK_CHARS);
    }
    paragraphs
}

fn push_paragraph(paragraphs: &mut Vec<String>, current: &mut Vec<&str>) {
    let joined = current.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        paragraphs.push(trimmed.to_string());
    }
    current.clear();
}
