/// Full-width ideographic full stop
pub const FULL_STOP_CJK: char = '。';
pub const FULL_STOP_ASCII: char = '.';

/// Split `text` into sentences on `。` / `.` boundaries.
///
/// A mark is a boundary only when the character before it is not a digit and
/// the character after it is not a digit (or the text ends), so decimals such
/// as `3.14` stay intact. The mark is consumed and re-appended per fragment:
/// `。` when the fragment contains a CJK ideograph, `.` otherwise. This
/// normalizes mixed punctuation and gives the final fragment a terminal mark
/// even if the input had none.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut fragments = Vec::new();
    let mut start = 0;

    for (pos, &(offset, c)) in chars.iter().enumerate() {
        if c != FULL_STOP_CJK && c != FULL_STOP_ASCII {
            continue;
        }
        let after_non_digit = pos > 0 && !is_decimal_digit(chars[pos - 1].1);
        let before_non_digit = chars.get(pos + 1).map_or(true, |&(_, next)| !is_decimal_digit(next));
        if after_non_digit && before_non_digit {
            fragments.push(&text[start..offset]);
            start = offset + c.len_utf8();
        }
    }
    fragments.push(&text[start..]);

    fragments
        .into_iter()
        .filter(|fragment| !fragment.trim().is_empty())
        .map(|fragment| {
            let mark = if contains_cjk(fragment) { FULL_STOP_CJK } else { FULL_STOP_ASCII };
            format!("{}{}", fragment, mark)
        })
        .collect()
}

/// ASCII and full-width decimal digits. Superscripts and vulgar fractions
/// such as `²` or `½` are not digits here.
fn is_decimal_digit(c: char) -> bool {
    c.is_ascii_digit() || ('\u{ff10}'..='\u{ff19}').contains(&c)
}

/// True when `text` contains a CJK unified ideograph (U+4E00..=U+9FA5)
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fa5}').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_english_sentences() {
        let sentences = split_sentences("Hello world. This is a test. Last one");
        assert_eq!(sentences, vec!["Hello world.", " This is a test.", " Last one."]);
    }

    #[test]
    fn test_decimals_are_not_boundaries() {
        let sentences = split_sentences("Pi is about 3.14 today. Next");
        assert_eq!(sentences, vec!["Pi is about 3.14 today.", " Next."]);
    }

    #[test]
    fn test_only_decimal_digits_guard_a_mark() {
        let sentences = split_sentences("Area is 5 m². Next one");
        assert_eq!(sentences, vec!["Area is 5 m².", " Next one."]);

        let sentences = split_sentences("Add ½. Then stir");
        assert_eq!(sentences, vec!["Add ½.", " Then stir."]);

        // Full-width decimals stay intact
        let sentences = split_sentences("约３.５米。很长");
        assert_eq!(sentences, vec!["约３.５米。", "很长。"]);
    }

    #[test]
    fn test_cjk_fragments_get_full_width_mark() {
        let sentences = split_sentences("今天天气很好。我们去公园吧。");
        assert_eq!(sentences, vec!["今天天气很好。", "我们去公园吧。"]);
    }

    #[test]
    fn test_mixed_punctuation_is_normalized() {
        // ASCII period after CJK text comes back as a full-width mark
        let sentences = split_sentences("你好. Hello。");
        assert_eq!(sentences, vec!["你好。", " Hello."]);
    }

    #[test]
    fn test_whitespace_fragments_are_dropped() {
        let sentences = split_sentences("One.  . Two.\n");
        assert_eq!(sentences, vec!["One.", " Two."]);
    }

    #[test]
    fn test_leading_mark_is_not_a_boundary() {
        // Nothing precedes the first mark, so it stays inside the fragment
        let sentences = split_sentences(".hidden file");
        assert_eq!(sentences, vec![".hidden file."]);
    }

    #[test]
    fn test_empty_text() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_resplitting_is_stable() {
        let first = split_sentences("Alpha beta. Gamma delta. 中文句子。 End here.");
        let joined: String = first.concat();
        assert_eq!(split_sentences(&joined), first);
    }
}
