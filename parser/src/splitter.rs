//! Recursive separator-based text splitting.
//!
//! Text is first broken into pieces no larger than the target size, preferring paragraph
//! breaks, then line breaks, then sentence punctuation, then spaces, and finally raw
//! character boundaries. Pieces are then merged greedily into chunks, each new chunk
//! re-using the tail of the previous one as overlap.
//!
//! Chunks are returned as byte spans of the input. Separators stay attached to the piece
//! they terminate, so the spans are contiguous: every chunk starts at or before the end of
//! its predecessor and the input can be rebuilt by dropping the overlapping prefixes.

use std::collections::VecDeque;
use std::ops::Range;

const SEPARATOR_LEVELS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Splits `text` into overlapping spans of at most `chunk_size` bytes.
pub fn split_spans(text: &str, chunk_size: usize, overlap: usize) -> Vec<Range<usize>> {
    if text.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    let mut pieces = Vec::new();
    atomize(text, 0..text.len(), SEPARATOR_LEVELS, chunk_size, &mut pieces);
    merge_pieces(&pieces, chunk_size, overlap)
}

fn atomize(
    text: &str,
    span: Range<usize>,
    levels: &[&[&str]],
    chunk_size: usize,
    out: &mut Vec<Range<usize>>,
) {
    if span.len() <= chunk_size {
        out.push(span);
        return;
    }

    let slice = &text[span.clone()];
    for (depth, separators) in levels.iter().enumerate() {
        let cuts = cut_points(slice, separators);
        if cuts.is_empty() {
            continue;
        }

        let mut start = 0;
        for cut in cuts.into_iter().chain(std::iter::once(slice.len())) {
            if cut > start {
                let part = span.start + start..span.start + cut;
                atomize(text, part, &levels[depth + 1..], chunk_size, out);
            }
            start = cut;
        }
        return;
    }

    split_on_chars(text, span, chunk_size, out);
}

/// Offsets just past each separator occurrence, sorted and de-duplicated.
fn cut_points(slice: &str, separators: &[&str]) -> Vec<usize> {
    let mut cuts: Vec<usize> = separators
        .iter()
        .flat_map(|sep| slice.match_indices(sep).map(|(idx, m)| idx + m.len()))
        .filter(|cut| *cut < slice.len())
        .collect();
    cuts.sort_unstable();
    cuts.dedup();
    cuts
}

fn split_on_chars(text: &str, span: Range<usize>, chunk_size: usize, out: &mut Vec<Range<usize>>) {
    let mut start = span.start;
    for (offset, ch) in text[span.clone()].char_indices() {
        let pos = span.start + offset;
        if pos > start && pos + ch.len_utf8() - start > chunk_size {
            out.push(start..pos);
            start = pos;
        }
    }
    if start < span.end {
        out.push(start..span.end);
    }
}

fn merge_pieces(pieces: &[Range<usize>], chunk_size: usize, overlap: usize) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<Range<usize>> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = piece.len();
        if total + len > chunk_size && !window.is_empty() {
            chunks.push(window_span(&window));
            while total > overlap || (total > 0 && total + len > chunk_size) {
                match window.pop_front() {
                    Some(front) => total -= front.len(),
                    None => break,
                }
            }
        }
        window.push_back(piece.clone());
        total += len;
    }

    if !window.is_empty() {
        chunks.push(window_span(&window));
    }
    chunks
}

fn window_span(window: &VecDeque<Range<usize>>) -> Range<usize> {
    let start = window.front().map_or(0, |r| r.start);
    let end = window.back().map_or(start, |r| r.end);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(text: &str, spans: &[Range<usize>]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for span in spans {
            out.push_str(&text[covered.max(span.start)..span.end]);
            covered = span.end;
        }
        out
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        assert_eq!(split_spans("one line", 100, 10), vec![0..8]);
        assert!(split_spans("", 100, 10).is_empty());
    }

    #[test]
    fn test_chunks_respect_size_and_rebuild_input() {
        let text = (0..200)
            .map(|i| format!("line {i} of the sample text. more words follow here"))
            .collect::<Vec<_>>()
            .join("\n");
        let spans = split_spans(&text, 300, 60);

        assert!(spans.len() > 1);
        for span in &spans {
            assert!(span.len() <= 300);
        }
        for pair in spans.windows(2) {
            assert!(pair[1].start <= pair[0].end);
            assert!(pair[1].end > pair[0].end);
        }
        assert_eq!(reconstruct(&text, &spans), text);
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let text = "aaaa\nbbbb\ncccc\ndddd\n";
        let spans = split_spans(text, 10, 5);

        assert!(spans.len() >= 2);
        assert!(spans[1].start < spans[0].end);
    }

    #[test]
    fn test_prefers_line_boundaries() {
        let text = "first line here\nsecond line here\nthird line here\n";
        for span in split_spans(text, 20, 0) {
            assert!(text[span].ends_with('\n'));
        }
    }

    #[test]
    fn test_unbroken_multibyte_text() {
        let text = "日志".repeat(100);
        let spans = split_spans(&text, 16, 4);

        assert!(spans.iter().all(|s| s.len() <= 16));
        assert_eq!(reconstruct(&text, &spans), text);
    }
}
