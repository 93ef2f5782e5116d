//! Deterministic token estimation.
//!
//! The router's simple/rag threshold and the generator's context-window truncation
//! both need a token count. Counting exact backend tokens would require bundling that
//! backend's tokenizer; instead we use a word-based heuristic tuned for mixed
//! Arabic/Latin text, same order of magnitude as a real BPE tokenizer and, crucially,
//! deterministic for a fixed input.

/// ~1.3 tokens per whitespace-delimited word for mixed Arabic/Latin prose.
const TOKENS_PER_WORD: f64 = 1.3;

pub fn estimate_tokens(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count();
    ((words as f64) * TOKENS_PER_WORD).ceil() as usize
}

pub fn estimate_messages_tokens<'a>(messages: impl IntoIterator<Item = &'a str>) -> usize {
    messages.into_iter().map(estimate_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
    }

    #[test]
    fn is_deterministic() {
        let text = "ما هي عاصمة مصر";
        assert_eq!(estimate_tokens(text), estimate_tokens(text));
    }

    #[test]
    fn scales_with_word_count() {
        assert!(estimate_tokens("one two three") < estimate_tokens("one two three four five six"));
    }
}
