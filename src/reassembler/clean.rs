use once_cell::sync::Lazy;
use regex::Regex;

static BRACED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").expect("valid braced pattern"));
static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\[\]]*\]").expect("valid bracketed pattern"));
/// A removed fragment with the blanks around it.
static GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]*(?:\x{FFFC}[ \t]*)+").expect("valid gap pattern"));

/// Stands in for a stripped fragment until the gaps are closed.
const REMOVED: &str = "\u{FFFC}";

/// Shortest run of characters treated as a duplicated unit.
const MIN_REPEAT_UNIT: usize = 4;

/// Normalizes an assembled response: drops leaked `{..}` / `[..]` fragments,
/// collapses immediately repeated substrings and trims the ends.
///
/// Whitespace is kept as written, except that the blanks on both sides of a
/// removed fragment shrink to a single space.
///
/// Best effort. Text that legitimately contains brackets or repeats loses them.
pub fn clean(text: &str) -> String {
    let stripped = strip_structured(text);
    let collapsed = collapse_repeats(&stripped);
    collapsed.trim().to_string()
}

fn strip_all(pattern: &Regex, text: String) -> String {
    let mut text = text;
    // Innermost first, until nested fragments are gone.
    while pattern.is_match(&text) {
        text = pattern.replace_all(&text, REMOVED).into_owned();
    }
    text
}

fn strip_structured(text: &str) -> String {
    let text = strip_all(&BRACED, text.to_string());
    let text = strip_all(&BRACKETED, text);
    GAP.replace_all(&text, |caps: &regex::Captures<'_>| {
        if caps[0].contains(|c: char| c == ' ' || c == '\t') {
            " "
        } else {
            ""
        }
    })
    .into_owned()
}

fn collapse_repeats(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let longest = (chars.len() - i) / 2;
        let unit = (MIN_REPEAT_UNIT..=longest)
            .find(|&len| chars[i..i + len] == chars[i + len..i + 2 * len]);
        match unit {
            Some(len) => {
                out.extend(&chars[i..i + len]);
                i += len;
                while i + len <= chars.len() && chars[i..i + len] == chars[i - len..i] {
                    i += len;
                }
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    out
}
