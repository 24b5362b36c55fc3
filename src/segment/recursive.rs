use tracing::debug;

use crate::error::{Result, TranslatorError};
use crate::tokenizer::TokenCounter;

/// Split `text` into pieces of at most `limit` tokens whose concatenation is `text`.
///
/// Break points are searched at line starts, scanning backward from a
/// proportional estimate so each piece is as large as possible. With
/// `must_break_at_blank_line` only empty lines qualify. When no line break
/// works, `allow_hard_break` falls back to the longest character prefix under
/// the limit; otherwise the call fails with [`TranslatorError::BudgetOverflow`].
pub fn segment(
    text: &str,
    must_break_at_blank_line: bool,
    limit: usize,
    allow_hard_break: bool,
    counter: &dyn TokenCounter,
) -> Result<Vec<String>> {
    let mut pieces = Vec::new();
    let mut rest = text;

    loop {
        let total = counter.count(rest);
        if total <= limit {
            pieces.push(rest.to_string());
            return Ok(pieces);
        }

        let split_at = match line_break_point(rest, total, must_break_at_blank_line, limit, counter) {
            Some(offset) => offset,
            None if allow_hard_break => hard_break_point(rest, limit, counter)?,
            None => return Err(TranslatorError::budget_overflow(limit, rest)),
        };

        pieces.push(rest[..split_at].to_string());
        rest = &rest[split_at..];
    }
}

/// Byte offset of the latest line start whose prefix stays strictly under `limit`
fn line_break_point(
    text: &str,
    total: usize,
    must_break_at_blank_line: bool,
    limit: usize,
    counter: &dyn TokenCounter,
) -> Option<usize> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut starts = Vec::with_capacity(lines.len());
    let mut offset = 0;
    for line in &lines {
        starts.push(offset);
        offset += line.len() + 1;
    }

    let estimate = (limit as f64 / total as f64 * lines.len() as f64).round() as usize;
    let upper = estimate.min(lines.len() - 1);

    (1..=upper).rev().find_map(|i| {
        if must_break_at_blank_line && !lines[i].is_empty() {
            return None;
        }
        (counter.count(&text[..starts[i]]) < limit).then_some(starts[i])
    })
}

/// Byte offset of the longest non-empty prefix counting strictly under `limit`.
///
/// Prefix counts grow with prefix length, so the boundary is binary searched
/// over char offsets instead of counting every prefix.
fn hard_break_point(text: &str, limit: usize, counter: &dyn TokenCounter) -> Result<usize> {
    let ends: Vec<usize> = text.char_indices().map(|(offset, _)| offset).skip(1).collect();
    let fitting = ends.partition_point(|&end| counter.count(&text[..end]) < limit);
    match fitting {
        0 => Err(TranslatorError::budget_overflow(limit, text)),
        n => Ok(ends[n - 1]),
    }
}

/// Ordered fallbacks tried by [`breakdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    BlankLines,
    Lines,
    AsciiStops,
    CjkStops,
    HardBreak,
}

const STRATEGIES: [Strategy; 5] = [
    Strategy::BlankLines,
    Strategy::Lines,
    Strategy::AsciiStops,
    Strategy::CjkStops,
    Strategy::HardBreak,
];

impl Strategy {
    fn run(self, text: &str, limit: usize, counter: &dyn TokenCounter) -> Result<Vec<String>> {
        match self {
            Self::BlankLines => segment(text, true, limit, false, counter),
            Self::Lines => segment(text, false, limit, false, counter),
            // Sentence ends become line ends, then get restored piece by piece
            Self::AsciiStops => {
                let marked = text.replace('.', "。\n");
                let pieces = segment(&marked, false, limit, false, counter)?;
                Ok(pieces.into_iter().map(|p| p.replace("。\n", ".")).collect())
            }
            Self::CjkStops => {
                let marked = text.replace('。', "。。\n");
                let pieces = segment(&marked, false, limit, false, counter)?;
                Ok(pieces.into_iter().map(|p| p.replace("。。\n", "。")).collect())
            }
            Self::HardBreak => segment(text, false, limit, true, counter),
        }
    }
}

/// Split `text` under `limit` trying progressively coarser strategies.
///
/// Paragraph breaks are preferred, then any line break, then sentence ends
/// (ASCII, then full-width) and finally raw characters. Only a budget
/// overflow moves on to the next strategy. The sentence-end strategies turn
/// a pre-existing `。\n` into `.` on the way back, which is the accepted
/// normalization of that path.
pub fn breakdown(text: &str, limit: usize, counter: &dyn TokenCounter) -> Result<Vec<String>> {
    let mut last_overflow = None;
    for strategy in STRATEGIES {
        match strategy.run(text, limit, counter) {
            Ok(pieces) => {
                debug!("Broke {} chars into {} pieces with {:?}", text.len(), pieces.len(), strategy);
                return Ok(pieces);
            }
            Err(e @ TranslatorError::BudgetOverflow { .. }) => last_overflow = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last_overflow.unwrap_or_else(|| TranslatorError::budget_overflow(limit, text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tests::CharCounter;

    #[test]
    fn test_text_under_limit_is_single_piece() {
        let pieces = segment("short", false, 10, false, &CharCounter).unwrap();
        assert_eq!(pieces, vec!["short"]);
    }

    #[test]
    fn test_splits_at_latest_fitting_line() {
        let pieces = segment("aaaa\nbbbb\ncccc", false, 10, false, &CharCounter).unwrap();
        assert_eq!(pieces, vec!["aaaa\n", "bbbb\ncccc"]);
    }

    #[test]
    fn test_blank_line_mode_only_breaks_on_paragraphs() {
        let pieces = segment("para one\n\npara two", true, 12, false, &CharCounter).unwrap();
        assert_eq!(pieces, vec!["para one\n", "\npara two"]);
    }

    #[test]
    fn test_blank_line_mode_fails_without_paragraphs() {
        let err = segment("aaaa\nbbbb\ncccc", true, 10, false, &CharCounter).unwrap_err();
        assert!(matches!(err, TranslatorError::BudgetOverflow { limit: 10, .. }));
    }

    #[test]
    fn test_single_long_line_overflows_without_hard_break() {
        let err = segment("abcdefghijklmnop", false, 5, false, &CharCounter).unwrap_err();
        assert!(matches!(err, TranslatorError::BudgetOverflow { limit: 5, .. }));
    }

    #[test]
    fn test_hard_break_takes_longest_prefix_under_limit() {
        let pieces = segment("abcdefghijkl", false, 5, true, &CharCounter).unwrap();
        assert_eq!(pieces, vec!["abcd", "efgh", "ijkl"]);
    }

    #[test]
    fn test_hard_break_respects_char_boundaries() {
        let pieces = segment("小胶质细胞属于组织", false, 4, true, &CharCounter).unwrap();
        assert_eq!(pieces.concat(), "小胶质细胞属于组织");
        assert!(pieces.iter().all(|p| p.chars().count() <= 4));
    }

    #[test]
    fn test_hard_break_on_a_long_line_counts_few_prefixes() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingCounter(AtomicUsize);

        impl TokenCounter for CountingCounter {
            fn count(&self, text: &str) -> usize {
                self.0.fetch_add(1, Ordering::Relaxed);
                text.chars().count()
            }
        }

        let text = "x".repeat(20_000);
        let counter = CountingCounter(AtomicUsize::new(0));
        let pieces = segment(&text, false, 100, true, &counter).unwrap();

        assert_eq!(pieces.concat(), text);
        assert!(pieces[..pieces.len() - 1].iter().all(|p| p.len() == 99));
        // About log2(20_000) counts per piece rather than one per dropped char
        assert!(counter.0.load(Ordering::Relaxed) < pieces.len() * 25);
    }

    #[test]
    fn test_hard_break_impossible_with_limit_of_one() {
        let err = segment("abc", false, 1, true, &CharCounter).unwrap_err();
        assert!(matches!(err, TranslatorError::BudgetOverflow { .. }));
    }

    #[test]
    fn test_breakdown_falls_back_to_sentence_ends() {
        let text = "First sentence here. Second sentence here. Third one.";
        let pieces = breakdown(text, 25, &CharCounter).unwrap();
        assert_eq!(pieces, vec!["First sentence here.", " Second sentence here.", " Third one."]);
    }

    #[test]
    fn test_breakdown_falls_back_to_full_width_stops() {
        let text = "第一句话在这里。第二句话也在这里。第三句。";
        let pieces = breakdown(text, 12, &CharCounter).unwrap();
        assert_eq!(pieces.concat(), text);
        assert_eq!(pieces[0], "第一句话在这里。");
        assert!(pieces.iter().all(|p| p.chars().count() <= 12));
    }

    #[test]
    fn test_breakdown_prefers_paragraphs() {
        let text = "one two\nthree\n\nfour five";
        let pieces = breakdown(text, 16, &CharCounter).unwrap();
        assert_eq!(pieces, vec!["one two\nthree\n", "\nfour five"]);
    }

    #[test]
    fn test_breakdown_reconstructs_text_under_every_limit() {
        let text = "Microglia belong to tissue-resident macrophages.\nThey constitute ~7% of cells, roughly 3.5 in 50.\n\n\
                    值得注意的是，今天中特估这个板块又飙了。那么，究竟是何缘故呢？ Additionally, progenies derive from sites";
        for limit in 2..80 {
            let pieces = breakdown(text, limit, &CharCounter).unwrap();
            assert_eq!(pieces.concat(), text, "limit {}", limit);
            for piece in &pieces {
                assert!(piece.chars().count() <= limit, "piece {:?} over limit {}", piece, limit);
            }
        }
    }
}
