//! 4.G Query Router: classifies a normalized query into `{greeting, simple,
//! calculator, rag}` so the pipeline can bypass retrieval for queries that do not
//! need it. Rule-based and deterministic, grounded in the teacher's intent-pattern
//! matcher (`services/query_analyzer.rs`) — a plain `contains`/table lookup, not a
//! model call.

use crate::utils::tokens::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Greeting,
    Simple,
    Calculator,
    Rag,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Greeting => "greeting",
            QueryType::Simple => "simple",
            QueryType::Calculator => "calculator",
            QueryType::Rag => "rag",
        }
    }
}

const GREETING_PHRASES: &[&str] = &[
    "مرحبا", "اهلا", "أهلا", "اهلين", "السلام عليكم", "صباح الخير", "مساء الخير",
    "hello", "hi", "hey", "good morning", "good evening", "good afternoon",
];

const QUESTION_WORDS: &[&str] = &[
    "ما", "ماذا", "متى", "أين", "اين", "كيف", "لماذا", "من", "كم", "هل",
    "why", "when", "where", "what is", "what's", "how", "who", "which",
];

const CALCULATOR_VERBS: &[&str] = &["احسب", "calculate", "compute"];

/// Strips common sentence punctuation so a greeting match isn't defeated by a
/// trailing "!" or "؟".
fn strip_punctuation(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '.' | ',' | '!' | '؟' | '?' | ';' | ':' | '،'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_greeting(normalized: &str) -> bool {
    let stripped = strip_punctuation(normalized).to_lowercase();
    GREETING_PHRASES.iter().any(|p| stripped == *p)
}

/// The bounded arithmetic grammar: digits (Western or Arabic-Indic), the four basic
/// operators, parentheses, whitespace, a decimal point, and an optional leading
/// verb like "احسب" / "calculate". Anything outside this alphabet, or an expression
/// longer than the grammar's length bound, falls through to `rag` rather than being
/// misclassified as `calculator` (8. Boundaries: "arithmetic characters longer than
/// the router's calculator grammar limit -> rag, not calculator").
const CALCULATOR_MAX_LEN: usize = 64;

fn strip_calculator_verb(normalized: &str) -> &str {
    let trimmed = normalized.trim();
    for verb in CALCULATOR_VERBS {
        if let Some(rest) = trimmed.strip_prefix(verb) {
            return rest.trim();
        }
    }
    trimmed
}

fn arabic_indic_to_ascii(c: char) -> Option<char> {
    match c {
        '٠'..='٩' => char::from_digit(c as u32 - '٠' as u32, 10),
        _ => None,
    }
}

fn is_calculator_char(c: char) -> bool {
    c.is_ascii_digit()
        || arabic_indic_to_ascii(c).is_some()
        || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.' | ' ')
}

fn is_calculator(normalized: &str) -> bool {
    let expr = strip_calculator_verb(normalized);
    if expr.is_empty() || expr.chars().count() > CALCULATOR_MAX_LEN {
        return false;
    }
    if !expr.chars().all(is_calculator_char) {
        return false;
    }
    // Require at least one digit and one operator so bare punctuation like "()"
    // or a lone number's whitespace doesn't masquerade as an expression; a lone
    // number ("42") is still accepted, matching common calculator-bar behavior.
    expr.chars().any(|c| c.is_ascii_digit() || arabic_indic_to_ascii(c).is_some())
}

fn contains_question_word(normalized: &str) -> bool {
    let lower = normalized.to_lowercase();
    QUESTION_WORDS.iter().any(|w| lower.contains(w))
}

/// Classifies `normalized` (already passed through [`crate::text::normalizer::normalize`]).
/// Tie-breaking order is greeting, then calculator, then simple, then rag. Never
/// fails: empty input classifies as `simple`, and the pipeline's simple handler
/// produces a help message for it.
pub fn classify(normalized: &str, simple_max_tokens: usize) -> QueryType {
    if normalized.trim().is_empty() {
        return QueryType::Simple;
    }
    if is_greeting(normalized) {
        return QueryType::Greeting;
    }
    if is_calculator(normalized) {
        return QueryType::Calculator;
    }
    if estimate_tokens(normalized) <= simple_max_tokens && !contains_question_word(normalized) {
        return QueryType::Simple;
    }
    QueryType::Rag
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_TOKENS: usize = 8;

    #[test]
    fn empty_query_is_simple() {
        assert_eq!(classify("", MAX_TOKENS), QueryType::Simple);
        assert_eq!(classify("   ", MAX_TOKENS), QueryType::Simple);
    }

    #[test]
    fn arabic_and_latin_greetings_are_detected() {
        for g in ["مرحبا", "اهلا", "hello", "hi", "good morning"] {
            assert_eq!(classify(g, MAX_TOKENS), QueryType::Greeting, "failed for {g}");
        }
        assert_eq!(classify("مرحبا!", MAX_TOKENS), QueryType::Greeting);
    }

    #[test]
    fn arithmetic_expressions_are_calculator() {
        assert_eq!(classify("1 + 1", MAX_TOKENS), QueryType::Calculator);
        assert_eq!(classify("احسب 12 * 4", MAX_TOKENS), QueryType::Calculator);
        assert_eq!(classify("(٢+٣)*٤", MAX_TOKENS), QueryType::Calculator);
    }

    #[test]
    fn long_arithmetic_like_string_falls_through_to_rag() {
        let long_expr = "1+".repeat(40);
        assert_eq!(classify(&long_expr, MAX_TOKENS), QueryType::Rag);
    }

    #[test]
    fn short_query_without_question_word_is_simple() {
        assert_eq!(classify("شكرا جزيلا", MAX_TOKENS), QueryType::Simple);
        assert_eq!(classify("thanks a lot", MAX_TOKENS), QueryType::Simple);
    }

    #[test]
    fn question_word_routes_to_rag_even_if_short() {
        assert_eq!(classify("ما هي عاصمة مصر", MAX_TOKENS), QueryType::Rag);
        assert_eq!(classify("what is love", MAX_TOKENS), QueryType::Rag);
    }

    #[test]
    fn long_query_without_question_word_is_rag() {
        let long = "كلمة ".repeat(20);
        assert_eq!(classify(&long, MAX_TOKENS), QueryType::Rag);
    }

    #[test]
    fn tie_break_order_greeting_beats_calculator_beats_simple() {
        // Not realistically ambiguous given disjoint alphabets, but document the
        // precedence: greeting is checked first, calculator second.
        assert_eq!(classify("hello", MAX_TOKENS), QueryType::Greeting);
    }
}
