//! Lexical helpers for rule lines.
//!
//! Keyword searches over a rule must never match inside a user-supplied
//! quoted pattern, so they run against a masked copy of the line in which
//! escape sequences and quoted spans are blanked out with `X`. Masking
//! preserves byte length, letting offsets found on the masked copy slice the
//! original line directly.

/// Replaces each of the three escape sequences the Snort rule language
/// recognises inside quoted content (`\\`, `\"`, `\;`) with two `X`
/// characters. Other backslashes pass through untouched.
pub fn unescape_mask(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '\\' | '"' | ';') {
                    chars.next();
                    out.push_str("XX");
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Escape-masks the line, then blanks every span between matched double
/// quotes (quotes included) with the same number of `X` characters. An
/// unmatched trailing quote is left as-is.
pub fn quote_mask(s: &str) -> String {
    let mut masked = unescape_mask(s);
    loop {
        let Some(start) = masked.find('"') else { break };
        let Some(rel) = masked[start + 1..].find('"') else { break };
        let end = start + 1 + rel;
        masked.replace_range(start..=end, &"X".repeat(end - start + 1));
    }
    masked
}

/// A rule line paired with its quote-masked twin. Searches run on the masked
/// copy; slicing happens on the original at the same byte offsets.
pub struct MaskedLine<'a> {
    raw: &'a str,
    masked: String,
}

impl<'a> MaskedLine<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            masked: quote_mask(raw),
        }
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    pub fn masked(&self) -> &str {
        &self.masked
    }

    /// Byte offset of `needle` in the masked copy, at or after `from`.
    pub fn find(&self, needle: &str, from: usize) -> Option<usize> {
        self.masked
            .get(from..)
            .and_then(|tail| tail.find(needle))
            .map(|i| from + i)
    }

    /// Single byte of the original line, if in bounds.
    pub fn byte_at(&self, pos: usize) -> Option<u8> {
        self.raw.as_bytes().get(pos).copied()
    }

    /// Slice of the original line at offsets computed on the masked copy.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.raw[start..end]
    }
}
