//! Snort rule reader.
//!
//! Position-driven reader for the single-line Snort rule DSL. It assumes the
//! basic structure of a rule and extracts the subset of fields relevant to
//! HTTP request matching; it is not an in-depth structural validator. Rules
//! using keywords the generator cannot honour are screened out before
//! parsing.
//!
//! Content patterns and pcre patterns carry their HTTP location as a
//! per-match field, so the ordering relationship between the two sequences
//! is preserved without any shared positional index.

use crate::scan::MaskedLine;
use crate::{Config, GenError, Result};
use std::fmt;
use std::path::Path;

/// HTTP request part a content or pcre pattern applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpLocation {
    None,
    Method,
    Uri,
    RawUri,
    StatMsg,
    StatCode,
    Header,
    RawHeader,
    ClientBody,
    Cookie,
    RawCookie,
}

impl HttpLocation {
    /// Maps an `http_*` content modifier keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "http_method" => Some(Self::Method),
            "http_uri" => Some(Self::Uri),
            "http_raw_uri" => Some(Self::RawUri),
            "http_stat_msg" => Some(Self::StatMsg),
            "http_stat_code" => Some(Self::StatCode),
            "http_header" => Some(Self::Header),
            "http_raw_header" => Some(Self::RawHeader),
            "http_client_body" => Some(Self::ClientBody),
            "http_cookie" => Some(Self::Cookie),
            "http_raw_cookie" => Some(Self::RawCookie),
            _ => None,
        }
    }

    /// Maps a Snort pcre modifier letter.
    pub fn from_pcre_flag(flag: char) -> Option<Self> {
        match flag {
            'P' => Some(Self::ClientBody),
            'H' => Some(Self::Header),
            'D' => Some(Self::RawHeader),
            'C' => Some(Self::Cookie),
            'K' => Some(Self::RawCookie),
            'U' => Some(Self::Uri),
            'I' => Some(Self::RawUri),
            'M' => Some(Self::Method),
            'S' => Some(Self::StatCode),
            'Y' => Some(Self::StatMsg),
            _ => None,
        }
    }
}

impl fmt::Display for HttpLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "",
            Self::Method => "http_method",
            Self::Uri => "http_uri",
            Self::RawUri => "http_raw_uri",
            Self::StatMsg => "http_stat_msg",
            Self::StatCode => "http_stat_code",
            Self::Header => "http_header",
            Self::RawHeader => "http_raw_header",
            Self::ClientBody => "http_client_body",
            Self::Cookie => "http_cookie",
            Self::RawCookie => "http_raw_cookie",
        };
        write!(f, "{}", name)
    }
}

/// Traffic direction of a rule header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Unidirectional,
    Bidirectional,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unidirectional => write!(f, "->"),
            Self::Bidirectional => write!(f, "<>"),
        }
    }
}

/// Pre-parenthesis rule header. Endpoints and ports are kept unparsed.
#[derive(Clone, Debug)]
pub struct RuleHeader {
    pub action: String,
    pub protocol: String,
    pub src_addr: String,
    pub src_port: String,
    pub direction: Direction,
    pub dst_addr: String,
    pub dst_port: String,
}

impl fmt::Display for RuleHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.action,
            self.protocol,
            self.src_addr,
            self.src_port,
            self.direction,
            self.dst_addr,
            self.dst_port
        )
    }
}

/// A literal-byte pattern the rule matches, after hex decoding.
#[derive(Clone, Debug)]
pub struct ContentMatch {
    /// Decoded message payload.
    pub pattern: String,

    /// Verbatim value as it appeared in the rule, for diagnostics.
    pub original: String,

    pub negated: bool,
    pub contains_hex: bool,
    pub nocase: bool,
    pub location: HttpLocation,
}

/// A regex attached to a rule, with its HTTP locations in flag order.
#[derive(Clone, Debug)]
pub struct PcreMatch {
    /// Text between the two `/` delimiters.
    pub pattern: String,

    pub negated: bool,
    pub nocase: bool,

    /// One entry per HTTP modifier letter; all share this regex's payload.
    pub locations: Vec<HttpLocation>,
}

/// A rule reduced to the fields relevant for HTTP request synthesis.
#[derive(Clone, Debug)]
pub struct ParsedRule {
    pub header: RuleHeader,
    pub msg: String,
    pub sid: String,
    pub rev: String,
    pub contents: Vec<ContentMatch>,
    pub pcres: Vec<PcreMatch>,

    /// Line number in the rule file, for diagnostics.
    pub line: usize,
}

impl fmt::Display for ParsedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Message:\t\t\t{}", self.msg)?;
        writeln!(f, "Header:\t\t\t\t{}", self.header)?;
        for content in &self.contents {
            let negation = if content.negated { "NOT " } else { "" };
            if content.contains_hex {
                writeln!(f, "{}Content (hex converted):\t{}", negation, content.pattern)?;
            } else {
                writeln!(f, "{}Content:\t\t\t\"{}\"", negation, content.pattern)?;
            }
            writeln!(f, "ContentModifierHttp:\t\t{}", content.location)?;
            writeln!(f, "Nocase:\t\t\t\t{}", content.nocase)?;
        }
        for pcre in &self.pcres {
            let negation = if pcre.negated { "NOT " } else { "" };
            writeln!(f, "{}pcre:\t\t\t\t{}", negation, pcre.pattern)?;
            let locations: Vec<String> = pcre.locations.iter().map(ToString::to_string).collect();
            writeln!(f, "pcreModifierHttp:\t\t{}", locations.join(" "))?;
            writeln!(f, "NocasePcre:\t\t\t{}", pcre.nocase)?;
        }
        writeln!(f, "sid:\t\t\t\t{}", self.sid)?;
        write!(f, "sid rev:\t\t\t{}", self.rev)
    }
}

/// Keywords the generator cannot honour; their presence drops the rule
/// before parsing.
const UNSUPPORTED_KEYWORDS: [&str; 9] = [
    "flowbits:",
    "distance:",
    "within:",
    "offset:",
    "depth:",
    "dce_",
    "threshold:",
    "urilen:",
    "detectionfilter",
];

/// Pre-parse screen. Returns the reason a line must be skipped, or `None`
/// when it should be handed to the parser.
fn screen(line: &str) -> Option<String> {
    if !line.get(..6).unwrap_or(line).contains("alert") {
        return Some("does not contain the alert keyword".to_string());
    }
    if !line.contains("content:") && !line.contains("pcre:") {
        return Some("contains neither content nor pcre keyword".to_string());
    }
    if let Some(keyword) = UNSUPPORTED_KEYWORDS.iter().find(|k| line.contains(*k)) {
        return Some(format!("contains unsupported keyword {}", keyword));
    }
    if line.contains("from_server") || line.contains("to_client") {
        return Some("matches server-to-client traffic".to_string());
    }
    // a space after the colon indicates malformed quoting
    if line.contains("content: ") {
        return Some("malformed quoting after content keyword".to_string());
    }
    None
}

/// Post-parse invariant check over a constructed rule.
pub fn plausibility_check(rule: &ParsedRule) -> Result<()> {
    if rule.contents.is_empty() && rule.pcres.is_empty() {
        return Err(GenError::Plausibility(format!(
            "rule sid {} has no content or pcre to check for",
            rule.sid
        )));
    }
    if rule
        .contents
        .iter()
        .any(|c| c.location == HttpLocation::None)
    {
        return Err(GenError::Plausibility(format!(
            "rule sid {} kept a content without http location",
            rule.sid
        )));
    }
    if rule.pcres.iter().any(|p| p.locations.is_empty()) {
        return Err(GenError::Plausibility(format!(
            "rule sid {} kept a pcre without http location",
            rule.sid
        )));
    }
    for (field, value) in [("sid", &rule.sid), ("rev", &rule.rev)] {
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(GenError::Plausibility(format!(
                "rule at line {} has a non-numeric {}",
                rule.line, field
            )));
        }
    }
    Ok(())
}

/// Snort rule parser
pub struct RuleParser {
    config: Config,

    /// Rules that survived screening and parsing.
    rules: Vec<ParsedRule>,

    /// Lines screened out or dropped.
    skipped: usize,
}

impl RuleParser {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            rules: Vec::new(),
            skipped: 0,
        }
    }

    /// Parse rules from file, one rule per line.
    pub fn parse_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse rules from string.
    pub fn parse_content(&mut self, content: &str) -> Result<usize> {
        for (idx, raw_line) in content.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw_line.trim_end();

            // comments and blank lines are skipped silently
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(reason) = screen(line) {
                tracing::warn!(line = lineno, "rule skipped: {}", reason);
                self.skipped += 1;
                continue;
            }

            match self.parse_single_rule(line, lineno) {
                Ok(Some(rule)) => self.rules.push(rule),
                Ok(None) => self.skipped += 1,
                Err(err) => {
                    if self.config.continue_on_error {
                        tracing::warn!(line = lineno, "skipping rule: {}", err);
                        self.skipped += 1;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        tracing::info!(
            rules = self.rules.len(),
            skipped = self.skipped,
            "rule parsing complete"
        );
        Ok(self.rules.len())
    }

    /// Parse a single rule line. `Ok(None)` means the rule was dropped with
    /// a warning; `Err` is a parse failure the caller decides the fate of.
    pub fn parse_single_rule(&self, line: &str, lineno: usize) -> Result<Option<ParsedRule>> {
        let masked = MaskedLine::new(line);

        let (header, body_start) = parse_header(&masked, lineno)?;
        let (sid, rev) = parse_sid_rev(&masked, body_start, lineno)?;
        let msg = parse_msg(&masked, body_start, lineno)?;

        // the synthesizer cannot craft server-to-client traffic
        if header.src_port == "$HTTP_PORTS" {
            tracing::warn!(
                line = lineno,
                sid = %sid,
                "rule matches traffic from server ports, skipped"
            );
            return Ok(None);
        }

        let contents = if masked.find("content:", body_start).is_some() {
            parse_contents(&masked, body_start, lineno)?
        } else {
            Vec::new()
        };

        let pcres = if masked.find("pcre:", body_start).is_some() {
            parse_pcres(&masked, body_start, lineno, &sid)?
        } else {
            Vec::new()
        };

        if let Some(content) = contents.iter().find(|c| c.location == HttpLocation::None) {
            tracing::warn!(
                line = lineno,
                sid = %sid,
                "content {:?} has no http_* modifier, rule skipped",
                content.original
            );
            return Ok(None);
        }

        let rule = ParsedRule {
            header,
            msg,
            sid,
            rev,
            contents,
            pcres,
            line: lineno,
        };
        plausibility_check(&rule)?;
        Ok(Some(rule))
    }

    /// Get parsed rules.
    pub fn rules(&self) -> &[ParsedRule] {
        &self.rules
    }

    /// Lines screened out or dropped with a warning.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Take parsed rules.
    pub fn into_rules(self) -> Vec<ParsedRule> {
        self.rules
    }
}

/// Splits the pre-parenthesis header into its seven fields and returns it
/// together with the body start offset (the position of `(`).
fn parse_header(line: &MaskedLine, lineno: usize) -> Result<(RuleHeader, usize)> {
    let body_start = line
        .find("(", 0)
        .ok_or_else(|| GenError::ParseStructure(format!("line {}: missing rule body", lineno)))?;
    let prefix = line.slice(0, body_start);

    let mut tokens = prefix.split_ascii_whitespace();
    let mut next_field = |name: &str| {
        tokens.next().map(str::to_string).ok_or_else(|| {
            GenError::ParseStructure(format!("line {}: rule header missing {}", lineno, name))
        })
    };

    let action = next_field("action")?;
    let protocol = next_field("protocol")?;
    let src_addr = next_field("source address")?;
    let src_port = next_field("source port")?;
    let direction = match next_field("direction")?.as_str() {
        "->" => Direction::Unidirectional,
        "<>" => Direction::Bidirectional,
        other => {
            return Err(GenError::ParseStructure(format!(
                "line {}: unrecognized direction operator {:?}",
                lineno, other
            )))
        }
    };
    let dst_addr = next_field("destination address")?;
    let dst_port = next_field("destination port")?;

    let header = RuleHeader {
        action,
        protocol,
        src_addr,
        src_port,
        direction,
        dst_addr,
        dst_port,
    };
    Ok((header, body_start))
}

/// The msg value sits between the first `"` after `msg:` and the next
/// unquoted `;`.
fn parse_msg(line: &MaskedLine, body_start: usize, lineno: usize) -> Result<String> {
    let start = line
        .find("msg:", body_start)
        .ok_or_else(|| GenError::ParseStructure(format!("line {}: missing msg", lineno)))?
        + 4;
    let end = line
        .find(";", start)
        .ok_or_else(|| GenError::ParseStructure(format!("line {}: unterminated msg", lineno)))?;
    let raw = line.slice(start, end).trim();
    let inner = raw
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .ok_or_else(|| GenError::ParseStructure(format!("line {}: msg is not quoted", lineno)))?;
    Ok(inner.to_string())
}

/// Parses the bare numeric `sid:` and `rev:` tokens, searched on the masked
/// copy so a literal `;` inside a message cannot break extraction.
fn parse_sid_rev(line: &MaskedLine, body_start: usize, lineno: usize) -> Result<(String, String)> {
    let mut parse_numeric = |keyword: &str, from: usize| -> Result<(String, usize)> {
        let start = line.find(keyword, from).ok_or_else(|| {
            GenError::ParseStructure(format!("line {}: missing {}", lineno, keyword))
        })? + keyword.len();
        let end = line.find(";", start).ok_or_else(|| {
            GenError::ParseStructure(format!("line {}: unterminated {}", lineno, keyword))
        })?;
        let value = line.slice(start, end).trim().to_string();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(GenError::ParseStructure(format!(
                "line {}: {} value {:?} is not numeric",
                lineno, keyword, value
            )));
        }
        Ok((value, end))
    };

    let (sid, sid_end) = parse_numeric("sid:", body_start)?;
    let (rev, _) = parse_numeric("rev:", sid_end)?;
    Ok((sid, rev))
}

/// Iterates every `content:` occurrence (including the `uricontent:` alias),
/// decoding hex runs and collecting the per-content modifiers from the span
/// up to the next content keyword.
fn parse_contents(
    line: &MaskedLine,
    body_start: usize,
    lineno: usize,
) -> Result<Vec<ContentMatch>> {
    let mut contents = Vec::new();
    let mut cursor = body_start;

    while let Some(token) = line.find("content:", cursor) {
        let uricontent = token >= 3 && line.slice(token - 3, token) == "uri";

        let mut value_start = token + "content:".len();
        let mut negated = false;
        // BEWARE: negation negates the content modifiers too
        if line.byte_at(value_start) == Some(b'!') {
            negated = true;
            value_start += 1;
        }
        let value_end = line.find(";", value_start).ok_or_else(|| {
            GenError::ParseStructure(format!("line {}: unterminated content value", lineno))
        })?;
        let original = line
            .slice(value_start, value_end)
            .trim()
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .ok_or_else(|| {
                GenError::ParseStructure(format!("line {}: content value is not quoted", lineno))
            })?
            .to_string();

        let contains_hex = original.contains('|');
        let decoded = decode_hex_runs(&original, lineno)?;

        // modifier span: from the value's `;` up to the next content
        // keyword, or up to the closing `;)` for the last content
        let span_end = match line.find("content:", value_end) {
            Some(next) => next,
            None => line.find(";)", value_end).ok_or_else(|| {
                GenError::ParseStructure(format!("line {}: rule body is not closed", lineno))
            })?,
        };
        let span = if span_end > value_end + 1 {
            &line.masked()[value_end + 1..span_end]
        } else {
            ""
        };

        let nocase = span.contains("nocase;");

        let mut location = HttpLocation::None;
        if uricontent {
            location = HttpLocation::Uri;
        } else if let Some(rel) = span.find("http_") {
            // the span of the last content ends before the closing `;)`, so
            // end-of-span terminates the keyword as well
            let keyword_end = span[rel..].find(';').map(|i| rel + i).unwrap_or(span.len());
            let keyword = span[rel..keyword_end].trim();
            match HttpLocation::from_keyword(keyword) {
                Some(found) => location = found,
                None => {
                    tracing::warn!(line = lineno, "unrecognized content modifier {:?}", keyword);
                }
            }
        }

        let mut pattern = decoded;
        if location == HttpLocation::Uri {
            // whitespace is never legal in a request line
            pattern = pattern.replace(' ', "+");
        }

        contents.push(ContentMatch {
            pattern,
            original,
            negated,
            contains_hex,
            nocase,
            location,
        });
        cursor = span_end;
    }

    Ok(contents)
}

/// Decodes the `|…|`-bracketed hex runs of a content value.
///
/// CR and LF decode to the two-character sequences `\r` and `\n` rather than
/// the control bytes: the decoded text lands in HTTP fields whose framing
/// layer re-interprets or strips those sequences.
fn decode_hex_runs(value: &str, lineno: usize) -> Result<String> {
    if !value.contains('|') {
        return Ok(value.to_string());
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('|') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('|').ok_or_else(|| {
            GenError::ParseStructure(format!(
                "line {}: hex content without termination sign",
                lineno
            ))
        })?;

        let run: Vec<char> = after[..end].chars().filter(|c| *c != ' ').collect();
        for pair in run.chunks(2) {
            if pair.len() < 2 {
                tracing::warn!(line = lineno, "dropping dangling hex nibble in content");
                break;
            }
            let byte_str: String = pair.iter().collect();
            match u8::from_str_radix(&byte_str, 16) {
                Ok(0x0d) => out.push_str("\\r"),
                Ok(0x0a) => out.push_str("\\n"),
                Ok(byte) if (0x20..=0x7e).contains(&byte) => out.push(byte as char),
                Ok(byte) => {
                    tracing::warn!(
                        line = lineno,
                        "dropping non-printable hex byte {:02x} in content",
                        byte
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        line = lineno,
                        "dropping malformed hex pair {:?} in content",
                        byte_str
                    );
                }
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Iterates every `pcre:` occurrence, splitting the `/regex/flags` form and
/// mapping the Snort HTTP modifier letters to locations.
fn parse_pcres(
    line: &MaskedLine,
    body_start: usize,
    lineno: usize,
    sid: &str,
) -> Result<Vec<PcreMatch>> {
    let mut pcres = Vec::new();
    let mut cursor = body_start;

    while let Some(token) = line.find("pcre:", cursor) {
        let mut value_start = token + "pcre:".len();
        let mut negated = false;
        // a negated pcre negates its modifiers too
        if line.byte_at(value_start) == Some(b'!') {
            negated = true;
            value_start += 1;
        }
        let value_end = line.find(";", value_start).ok_or_else(|| {
            GenError::ParseStructure(format!("line {}: unterminated pcre value", lineno))
        })?;
        let inner = line
            .slice(value_start, value_end)
            .trim()
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .ok_or_else(|| {
                GenError::ParseStructure(format!("line {}: pcre value is not quoted", lineno))
            })?;

        // the regex may contain escaped slashes, so the modifier split is
        // the last `/`
        let body = inner.strip_prefix('/').ok_or_else(|| {
            GenError::ParseStructure(format!("line {}: pcre is not /-delimited", lineno))
        })?;
        let last_slash = body.rfind('/').ok_or_else(|| {
            GenError::ParseStructure(format!("line {}: pcre missing closing delimiter", lineno))
        })?;
        let pattern = body[..last_slash].to_string();
        let mut flags = body[last_slash + 1..].to_string();

        let mut nocase = false;
        if let Some(pos) = flags.find('i') {
            nocase = true;
            flags.remove(pos);
        }

        if flags.is_empty() {
            return Err(GenError::ParseSemantic(format!(
                "line {}, sid {}: pcre with no http modifier",
                lineno, sid
            )));
        }
        if let Some(bad) = flags.chars().find(|c| "smxAEGRBO".contains(*c)) {
            return Err(GenError::ParseSemantic(format!(
                "line {}, sid {}: snort-specific non-http pcre modifier '{}' is not supported",
                lineno, sid, bad
            )));
        }

        let mut locations = Vec::new();
        for flag in flags.chars() {
            match HttpLocation::from_pcre_flag(flag) {
                Some(location) => locations.push(location),
                None => {
                    return Err(GenError::ParseSemantic(format!(
                        "line {}, sid {}: unrecognized pcre modifier '{}'",
                        lineno, sid, flag
                    )))
                }
            }
        }

        pcres.push(PcreMatch {
            pattern,
            negated,
            nocase,
            locations,
        });
        cursor = value_end;
    }

    Ok(pcres)
}
