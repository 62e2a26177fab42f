//! Incremental sentence segmentation over a streamed completion.
//!
//! Fragments arrive in arbitrary pieces (half words, several sentences at
//! once). The segmenter buffers the unterminated tail and hands back every
//! complete sentence as soon as a terminator run followed by whitespace (or the
//! current end of the buffer) shows up. Boundaries are purely punctuation based.

/// Punctuation-free text longer than this is released early, see [`SentenceSegmenter::feed`].
const SOFT_FLUSH_CHARS: usize = 50;

/// Sentence terminators, including the full-width forms.
pub fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
}

/// True when the (trimmed) text ends in terminal punctuation.
pub fn is_response_complete(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.chars().last().is_some_and(is_terminator)
}

/// One emitted sentence together with everything generated up to that point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sentence: String,
    pub full_text: String,
}

#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    full_content: String,
    pending: String,
    last_flushed_len: usize,
}

/// Where a sentence ends inside `pending` and where the remainder starts.
struct Boundary {
    end: usize,
    resume: usize,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every sentence it completes, in order.
    ///
    /// When no boundary is found and nothing has been emitted yet, a buffer of
    /// more than 50 characters that currently ends in whitespace is released as
    /// a sentence so punctuation-free output is not held back indefinitely.
    /// This only applies before the first emission.
    pub fn feed(&mut self, fragment: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        if fragment.is_empty() {
            return out;
        }
        self.full_content.push_str(fragment);
        self.pending.push_str(fragment);

        loop {
            match find_boundary(&self.pending) {
                Some(boundary) => {
                    let sentence = self.pending[..boundary.end].trim().to_string();
                    self.pending = self.pending[boundary.resume..].to_string();
                    if !sentence.is_empty() {
                        out.push(self.emit(sentence));
                    }
                }
                None => {
                    if self.should_soft_flush() {
                        let sentence = self.pending.trim().to_string();
                        if !sentence.is_empty() {
                            self.pending.clear();
                            out.push(self.emit(sentence));
                        }
                    }
                    break;
                }
            }
        }
        out
    }

    /// Release whatever is left once the stream has ended.
    ///
    /// Emits the trimmed pending tail, then any part of the full text past the
    /// last emission that is still unaccounted for. Yields at most two segments.
    pub fn flush(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();

        let rest = self.pending.trim().to_string();
        self.pending.clear();
        if !rest.is_empty() {
            out.push(self.emit(rest));
        }

        if self.full_content.len() > self.last_flushed_len {
            let unaccounted = self.full_content[self.last_flushed_len..].trim().to_string();
            if !unaccounted.is_empty() {
                out.push(self.emit(unaccounted));
            }
        }
        out
    }

    pub fn into_full_content(self) -> String {
        self.full_content
    }

    fn should_soft_flush(&self) -> bool {
        self.full_content.len() == self.pending.len()
            && self.pending.chars().count() > SOFT_FLUSH_CHARS
            && self.pending.ends_with(char::is_whitespace)
    }

    fn emit(&mut self, sentence: String) -> Segment {
        self.last_flushed_len = self.full_content.len();
        Segment {
            sentence,
            full_text: self.full_content.clone(),
        }
    }
}

/// Find the first sentence boundary in `pending`.
///
/// A boundary is a run of terminators followed by whitespace or the end of the
/// buffer, with at least one character in front of its last terminator. If the
/// only such run is a lone leading terminator, fall back to cutting right after
/// the first terminator run.
fn find_boundary(pending: &str) -> Option<Boundary> {
    let chars: Vec<(usize, char)> = pending.char_indices().collect();
    let n = chars.len();
    let offset = |i: usize| chars.get(i).map_or(pending.len(), |&(pos, _)| pos);
    let skip_ws = |mut i: usize| {
        while i < n && chars[i].1.is_whitespace() {
            i += 1;
        }
        i
    };

    let mut first_run_end: Option<usize> = None;
    let mut saw_boundary = false;
    let mut i = 0;
    while i < n {
        if !is_terminator(chars[i].1) {
            i += 1;
            continue;
        }
        while i < n && is_terminator(chars[i].1) {
            i += 1;
        }
        first_run_end.get_or_insert(i);

        if i == n || chars[i].1.is_whitespace() {
            saw_boundary = true;
            if i >= 2 {
                return Some(Boundary {
                    end: offset(i),
                    resume: offset(skip_ws(i)),
                });
            }
        }
    }

    match (saw_boundary, first_run_end) {
        (true, Some(end)) => Some(Boundary {
            end: offset(end),
            resume: offset(skip_ws(end)),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn run(fragments: &[&str]) -> (Vec<Segment>, String) {
        let mut seg = SentenceSegmenter::new();
        let mut out = Vec::new();
        for f in fragments {
            out.extend(seg.feed(f));
        }
        out.extend(seg.flush());
        let full = seg.into_full_content();
        (out, full)
    }

    fn assert_lossless(text: &str, segments: &[Segment]) {
        let joined = segments
            .iter()
            .map(|s| s.sentence.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(strip_ws(&joined), strip_ws(text), "segments: {segments:?}");

        // every sentence occurs in order in the source
        let mut cursor = 0;
        for s in segments {
            let found = text[cursor..]
                .find(&s.sentence)
                .unwrap_or_else(|| panic!("{:?} not found after {cursor}", s.sentence));
            cursor += found + s.sentence.len();
        }
    }

    fn fragments_of(text: &str, size: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars.chunks(size).map(|c| c.iter().collect()).collect()
    }

    #[test]
    fn test_streamed_sentences_carry_cumulative_text() {
        let (segments, full) = run(&["First ", "sentence. ", "Second ", "sentence."]);

        assert_eq!(full, "First sentence. Second sentence.");
        assert_eq!(
            segments,
            vec![
                Segment {
                    sentence: "First sentence.".into(),
                    full_text: "First sentence. ".into(),
                },
                Segment {
                    sentence: "Second sentence.".into(),
                    full_text: "First sentence. Second sentence.".into(),
                },
            ]
        );
    }

    #[test]
    fn test_multiple_sentences_in_one_fragment() {
        let mut seg = SentenceSegmenter::new();
        let out = seg.feed("One. Two! Three? Four");
        let sentences: Vec<_> = out.iter().map(|s| s.sentence.as_str()).collect();
        assert_eq!(sentences, vec!["One.", "Two!", "Three?"]);
        assert!(out.iter().all(|s| s.full_text == "One. Two! Three? Four"));

        let rest = seg.flush();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].sentence, "Four");
    }

    #[test]
    fn test_terminator_run_stays_with_sentence() {
        let (segments, _) = run(&["Really?! ", "Yes..."]);
        let sentences: Vec<_> = segments.iter().map(|s| s.sentence.as_str()).collect();
        assert_eq!(sentences, vec!["Really?!", "Yes..."]);
    }

    #[test]
    fn test_inner_punctuation_is_not_a_boundary() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.feed("Pi is 3.14 and e is 2.71").is_empty());
        let out = seg.feed(" roughly. Next");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sentence, "Pi is 3.14 and e is 2.71 roughly.");
    }

    #[test]
    fn test_full_width_terminators() {
        let (segments, _) = run(&["你好。", "再见！"]);
        let sentences: Vec<_> = segments.iter().map(|s| s.sentence.as_str()).collect();
        assert_eq!(sentences, vec!["你好。", "再见！"]);
    }

    #[test]
    fn test_leading_lone_terminator_uses_fallback() {
        let mut seg = SentenceSegmenter::new();
        let out = seg.feed(". and then");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sentence, ".");
        let rest = seg.flush();
        assert_eq!(rest[0].sentence, "and then");
    }

    #[test]
    fn test_unpunctuated_tail_is_flushed_whole() {
        let (segments, full) = run(&["Incomplete ", "sentence"]);
        assert_eq!(full, "Incomplete sentence");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].sentence, "Incomplete sentence");
    }

    #[test]
    fn test_long_unpunctuated_stream_is_never_dropped() {
        let fragments = [
            "Incomplete sentence ",
            "that keeps going without any punctuation whatsoever and then some more words",
        ];
        let mut seg = SentenceSegmenter::new();
        for f in fragments {
            assert!(seg.feed(f).is_empty());
        }
        let flushed = seg.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].sentence, fragments.concat());
    }

    #[test]
    fn test_soft_flush_before_first_emission() {
        let mut seg = SentenceSegmenter::new();
        let text = "this line has no punctuation at all but it is quite long ";
        assert!(text.len() > SOFT_FLUSH_CHARS);
        let out = seg.feed(text);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sentence, text.trim());
        assert!(seg.flush().is_empty());
    }

    #[test]
    fn test_soft_flush_does_not_fire_after_an_emission() {
        // Documents current behaviour: once a sentence was emitted the buffer
        // and the full text differ in length, so long punctuation-free tails
        // wait for flush().
        let mut seg = SentenceSegmenter::new();
        assert_eq!(seg.feed("Hello. ").len(), 1);
        let tail = "this line has no punctuation at all but it is quite long ";
        assert!(seg.feed(tail).is_empty());
        let flushed = seg.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].sentence, tail.trim());
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        let (segments, full) = run(&["", "   ", "\n"]);
        assert!(segments.is_empty());
        assert_eq!(full, "   \n");
    }

    #[test]
    fn test_any_fragmentation_is_lossless() {
        let texts = [
            "First sentence. Second sentence. Third sentence.",
            "Wait... what?! No way. 3.5 percent of people e.g. say so",
            ". Leading dot. Then text!\n\nNew paragraph? yes",
            "no punctuation here at all just a long run of words that goes on and on ",
            "Mixed 你好。再见！ and English. Done",
        ];
        for text in texts {
            let chars: Vec<char> = text.chars().collect();
            for size in 1..=7 {
                let frags = fragments_of(text, size);
                let refs: Vec<&str> = frags.iter().map(String::as_str).collect();
                let (segments, full) = run(&refs);
                assert_eq!(full, text);
                assert_lossless(text, &segments);
            }
            for split in 0..=chars.len() {
                let head: String = chars[..split].iter().collect();
                let tail: String = chars[split..].iter().collect();
                let (segments, _) = run(&[&head, &tail]);
                assert_lossless(text, &segments);
            }
        }
    }

    #[test]
    fn test_full_text_is_monotonic() {
        let frags = fragments_of("A. B! C? D. E", 2);
        let mut seg = SentenceSegmenter::new();
        let mut last = 0;
        for f in &frags {
            for s in seg.feed(f) {
                assert!(s.full_text.len() >= last);
                last = s.full_text.len();
            }
        }
    }

    #[test]
    fn test_is_response_complete() {
        assert!(is_response_complete("Done."));
        assert!(is_response_complete("Done!  \n"));
        assert!(is_response_complete(""));
        assert!(!is_response_complete("and then"));
    }
}
