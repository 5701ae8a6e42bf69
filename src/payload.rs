//! PCRE payload generation.
//!
//! A rule's regex patterns are turned into concrete strings by the external
//! `exrex` sampler. The sampler chokes on several constructs that are legal
//! in rule regexes, so patterns are rewritten into generator-friendly
//! equivalents before the subprocess is invoked.

use crate::{GenError, Result};
use std::io::ErrorKind;
use std::process::Command;

/// Negated character classes the sampler cannot generate from.
const NEGATED_CLASSES: [&str; 5] = ["[^&]", "[^\\]", "[^\\n]", "[^\\r\\n]", "[^\\x2f]"];

/// Escapes and quantifier combinations the sampler is known to mishandle;
/// their presence is warned about but generation proceeds.
const FRAGILE_ESCAPES: &str = "CDhHNpRSvVwWX";

/// Rewrites regex constructs the sampler mishandles.
pub fn sanitize_pcre(pattern: &str, sid: &str) -> String {
    // force single-space whitespace
    let mut sanitized = pattern.replace("\\s", " ");

    // lazy quantifiers confuse the sampler
    sanitized = sanitized.replace("+?", "+");
    sanitized = sanitized.replace("*?", "*");

    // unbounded dot quantifiers otherwise sample garbage bytes
    sanitized = sanitized.replace(".+", "[a-z]");
    sanitized = sanitized.replace(".*", "[a-z]");
    sanitized = sanitized.replace(".?", "[a-z]");

    for class in NEGATED_CLASSES {
        sanitized = sanitized.replace(class, "[a-z]");
    }

    sanitized = strip_crlf(&sanitized);
    warn_fragile_constructs(&sanitized, sid);
    sanitized
}

/// Removes `\r\n` escape pairs unless anchored right behind `^`; the sampler
/// only emits one line anyway.
fn strip_crlf(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(pos) = rest.find("\\r\\n") {
        out.push_str(&rest[..pos]);
        if out.ends_with('^') {
            out.push_str("\\r\\n");
        }
        rest = &rest[pos + 4..];
    }
    out.push_str(rest);
    out
}

/// Scans for constructs that survive sanitisation but are known to produce
/// poor samples.
fn warn_fragile_constructs(pattern: &str, sid: &str) {
    let mut flagged: Vec<String> = Vec::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            let next = chars[i + 1];
            if FRAGILE_ESCAPES.contains(next) {
                flagged.push(format!("\\{}", next));
            }
            // an escape always consumes its follower
            i += 2;
            continue;
        }
        if matches!(c, '?' | '*' | '+') && i + 1 < chars.len() {
            let next = chars[i + 1];
            if next == '+' || (c == '?' && next == '?') {
                flagged.push(format!("{}{}", c, next));
            }
        }
        i += 1;
    }
    if !flagged.is_empty() {
        flagged.sort();
        flagged.dedup();
        tracing::warn!(
            sid = %sid,
            "sampler may mishandle regex constructs: {}",
            flagged.join(" ")
        );
    }
}

/// Invokes the external `exrex` sampler and returns one sampled string.
///
/// The sampler is expected on `PATH`; its exit status is not inspected. The
/// captured line is stripped of `\n`, `\r` and `#` characters; an empty
/// result is allowed but warned about.
pub fn generate_payload(regex: &str, sid: &str) -> Result<String> {
    let output = Command::new("exrex")
        .arg("-r")
        .arg(regex)
        .output()
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => {
                GenError::SamplerMissing("exrex not found on PATH".to_string())
            }
            _ => GenError::SamplerMissing(err.to_string()),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let payload: String = stdout
        .lines()
        .next()
        .unwrap_or("")
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '#'))
        .collect();

    if payload.is_empty() {
        tracing::warn!(sid = %sid, regex, "sampler produced an empty payload");
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_class_becomes_space() {
        assert_eq!(sanitize_pcre(r"a\sb", "1"), "a b");
    }

    #[test]
    fn test_lazy_quantifiers_become_greedy() {
        assert_eq!(sanitize_pcre(r"a+?b*?", "1"), "a+b*");
    }

    #[test]
    fn test_dot_quantifiers_become_letter_class() {
        assert_eq!(sanitize_pcre(r"a.+b", "1"), "a[a-z]b");
        assert_eq!(sanitize_pcre(r"a.*b", "1"), "a[a-z]b");
        assert_eq!(sanitize_pcre(r"a.?b", "1"), "a[a-z]b");
    }

    #[test]
    fn test_lazy_dot_quantifier_collapses() {
        // the lazy rewrite runs first, then the dot rewrite
        assert_eq!(sanitize_pcre(r"a.+?b", "1"), "a[a-z]b");
    }

    #[test]
    fn test_negated_classes_become_letter_class() {
        assert_eq!(sanitize_pcre(r"x[^&]y", "1"), "x[a-z]y");
        assert_eq!(sanitize_pcre(r"x[^\r\n]y", "1"), "x[a-z]y");
        assert_eq!(sanitize_pcre(r"x[^\x2f]y", "1"), "x[a-z]y");
    }

    #[test]
    fn test_crlf_stripped_unless_anchored() {
        assert_eq!(sanitize_pcre(r"a\r\nb", "1"), "ab");
        assert_eq!(sanitize_pcre(r"^\r\nb", "1"), "^\\r\\nb");
        // only the anchored pair survives
        assert_eq!(sanitize_pcre(r"^\r\n\r\nb", "1"), "^\\r\\nb");
    }

    #[test]
    fn test_plain_pattern_untouched() {
        assert_eq!(sanitize_pcre(r"admin[0-9]+", "1"), "admin[0-9]+");
    }
}
