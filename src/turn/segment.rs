//! Sentence segmentation for streaming synthesis.
//!
//! Generated text arrives as arbitrary deltas; the synthesizer wants
//! sentence-sized chunks. The splitter runs over the buffered tail plus the
//! new delta and hands back complete sentences and the unterminated remainder.

/// Punctuation that closes a sentence-sized synthesis chunk.
///
/// Covers both ASCII and full-width (CJK) sentence punctuation.
const BOUNDARY_CHARS: [char; 8] = [',', '，', '.', '。', '?', '？', '!', '！'];

/// Result of scanning buffered generation text for sentence boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmented {
    /// Complete sentences, in order, each ending with a boundary character.
    pub sentences: Vec<String>,
    /// Unterminated tail to carry into the next delta.
    pub remainder: String,
}

/// Split buffered text into complete sentences plus the unterminated tail.
///
/// Each character is appended to an accumulator; a boundary character closes
/// it. A closed accumulator is emitted only if it contains at least one ASCII
/// alphanumeric character — standalone punctuation or ideograph-only scraps
/// are too small to be worth synthesizing and are discarded. The accumulator
/// resets after every boundary either way. O(n), never blocks.
pub fn split_sentences(text: &str) -> Segmented {
    let mut sentences = Vec::new();
    let mut acc = String::new();

    for c in text.chars() {
        acc.push(c);
        if BOUNDARY_CHARS.contains(&c) {
            if acc.trim().chars().any(|c| c.is_ascii_alphanumeric()) {
                sentences.push(std::mem::take(&mut acc));
            } else {
                acc.clear();
            }
        }
    }

    Segmented {
        sentences,
        remainder: acc,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn splits_on_ascii_punctuation() {
        let out = split_sentences("Hello, world. How are you?");
        assert_eq!(out.sentences, vec!["Hello,", " world.", " How are you?"]);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn keeps_unterminated_tail_as_remainder() {
        let out = split_sentences("Hello, wor");
        assert_eq!(out.sentences, vec!["Hello,"]);
        assert_eq!(out.remainder, " wor");
    }

    #[test]
    fn no_data_loss_across_delta_boundary() {
        let first = split_sentences("Hello, wor");
        let buffered = format!("{}{}", first.remainder, "ld. How are you?");
        let second = split_sentences(&buffered);
        assert_eq!(second.sentences, vec![" world.", " How are you?"]);
        assert_eq!(second.remainder, "");
    }

    #[test]
    fn splits_on_fullwidth_punctuation() {
        let out = split_sentences("你好a，再见b。");
        assert_eq!(out.sentences, vec!["你好a，", "再见b。"]);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn punctuation_only_input_emits_nothing() {
        let out = split_sentences("，。！");
        assert!(out.sentences.is_empty());
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn whitespace_and_punctuation_is_suppressed() {
        let out = split_sentences(" , . ");
        assert!(out.sentences.is_empty());
        assert_eq!(out.remainder, " ");
    }

    #[test]
    fn digits_count_as_meaningful() {
        let out = split_sentences("42.");
        assert_eq!(out.sentences, vec!["42."]);
    }

    #[test]
    fn accumulator_resets_after_suppressed_boundary() {
        // The discarded "!!" scrap must not leak into the next sentence.
        let out = split_sentences("!! ok.");
        assert_eq!(out.sentences, vec![" ok."]);
    }

    #[test]
    fn empty_input() {
        let out = split_sentences("");
        assert!(out.sentences.is_empty());
        assert_eq!(out.remainder, "");
    }
}
