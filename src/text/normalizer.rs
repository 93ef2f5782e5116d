//! Idempotent Arabic text canonicalization (4.A).
//!
//! Applied to ingested chunks before embedding and to user queries before embedding
//! or routing, so that orthographic variants that a reader treats as identical also
//! compare equal to the embedding model and the router's pattern tables.

/// Diacritics (tashkeel) and the shadda (gemination mark), U+064B..U+0652 plus the
/// superscript alef U+0670.
fn is_diacritic(c: char) -> bool {
    matches!(c, '\u{064B}'..='\u{0652}' | '\u{0670}' | '\u{06D6}'..='\u{06ED}')
}

/// Tatweel / kashida, the elongation character used purely for visual justification.
const TATWEEL: char = '\u{0640}';

fn unify_alef(c: char) -> char {
    match c {
        '\u{0623}' /* أ hamza above */
        | '\u{0625}' /* إ hamza below */
        | '\u{0622}' /* آ madda */
        | '\u{0671}' /* ٱ wasla */ => '\u{0627}', // ا bare alef
        other => other,
    }
}

fn unify_yaa(c: char) -> char {
    match c {
        '\u{0649}' => '\u{064A}', // ى alef-maksura -> ي yaa
        other => other,
    }
}

fn unify_taa_marbuta(c: char) -> char {
    match c {
        '\u{0629}' => '\u{0647}', // ة -> ه
        other => other,
    }
}

/// Normalizes `text` in place: unify Alef/Yaa/Taa-marbuta variants, strip diacritics
/// and tatweel, collapse whitespace runs, and trim. Pure and total: empty input
/// returns empty output, and the function never panics or raises.
///
/// `normalize(normalize(x)) == normalize(x)` for all `x` — every substitution maps
/// onto a character that is itself a fixed point of every rule, and whitespace
/// collapse/trim are themselves idempotent.
pub fn normalize(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut last_was_space = false;

    for c in text.chars() {
        if is_diacritic(c) || c == TATWEEL {
            continue;
        }
        let c = unify_taa_marbuta(unify_yaa(unify_alef(c)));

        if c.is_whitespace() {
            if !last_was_space && !collapsed.is_empty() {
                collapsed.push(' ');
            }
            last_was_space = true;
        } else {
            collapsed.push(c);
            last_was_space = false;
        }
    }

    if collapsed.ends_with(' ') {
        collapsed.pop();
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_empty_output() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \t\n  "), "");
    }

    #[test]
    fn unifies_alef_variants() {
        assert_eq!(normalize("أحمد"), normalize("احمد"));
        assert_eq!(normalize("إبراهيم"), normalize("ابراهيم"));
        assert_eq!(normalize("آمن"), normalize("امن"));
    }

    #[test]
    fn unifies_terminal_yaa() {
        assert_eq!(normalize("على"), normalize("علي"));
    }

    #[test]
    fn unifies_taa_marbuta() {
        assert_eq!(normalize("مدرسة"), normalize("مدرسه"));
    }

    #[test]
    fn strips_diacritics_and_tatweel() {
        assert_eq!(normalize("مَرْحَباً"), normalize("مرحبا"));
        assert_eq!(normalize("مرحـــبا"), normalize("مرحبا"));
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(normalize("  hello    world  "), "hello world");
    }

    #[test]
    fn is_idempotent_on_sample_inputs() {
        for sample in [
            "القاهرة هي عاصمة مصر.",
            "  أَهْلاً    وسَهْلاً  ",
            "hello world",
            "",
            "١٢٣ + ٤٥٦",
        ] {
            let once = normalize(sample);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }
}
