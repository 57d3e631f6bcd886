//! Text cleanup shared by the parser and the normalizer.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

static RE_BLOCK_BREAKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*(?:br|/p|/div|/li|/tr|/h[1-6])\b[^>]*>").expect("static regex")
});
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)</?[a-zA-Z][^>]*>").expect("static regex"));

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop markup and decode entities, leaving single-spaced plain text.
pub fn strip_html(input: &str) -> String {
    if !input.contains('<') && !input.contains('&') {
        return collapse_whitespace(input);
    }
    let spaced = RE_BLOCK_BREAKS.replace_all(input, " ");
    let fragment = Html::parse_fragment(&spaced);
    let text = fragment.root_element().text().collect::<String>();
    // Double-escaped markup only becomes tags after the first decode.
    let text = RE_TAGS.replace_all(&text, " ");
    collapse_whitespace(&text)
}

fn strip_prefix_ignore_case<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let head = input.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &input[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(input: &'a str, suffix: &str) -> Option<&'a str> {
    let split = input.len().checked_sub(suffix.len())?;
    let tail = input.get(split..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &input[..split])
}

pub fn clean_title(input: &str, prefixes: &[String], suffixes: &[String]) -> String {
    let mut title = strip_html(input);
    loop {
        let before = title.len();
        for prefix in prefixes.iter().filter(|p| !p.is_empty()) {
            if let Some(rest) = strip_prefix_ignore_case(&title, prefix) {
                title = rest.trim().to_string();
            }
        }
        for suffix in suffixes.iter().filter(|s| !s.is_empty()) {
            if let Some(rest) = strip_suffix_ignore_case(&title, suffix) {
                title = rest.trim().to_string();
            }
        }
        if title.len() == before {
            break;
        }
    }
    title
}

pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out = input.chars().take(keep).collect::<String>();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

pub fn clean_description(input: &str, max_chars: usize) -> String {
    truncate_with_ellipsis(&strip_html(input), max_chars.max(4))
}
