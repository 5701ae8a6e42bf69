//! HTTP request synthesis.
//!
//! Reconstructs one HTTP request per parsed rule and dispatches it to the
//! target host. A fresh client is built for every request: a reused handle
//! would replay cookies from the previous rule and corrupt the request
//! semantics.

use crate::parser::{HttpLocation, ParsedRule};
use crate::payload::{generate_payload, sanitize_pcre};
use crate::{Config, GenError, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::Method;
use std::time::Duration;

/// Snort runs content matches only against bodies of at least six bytes;
/// the sentinel guarantees any appended fragment clears that floor.
const SENTINEL_BODY: &str = "12345";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Correlates an outgoing request with the rule that produced it.
const RULESID_HEADER: &str = "rulesid";

/// Request verb state machine: GET and POST map to the client's built-in
/// verbs, anything else rides as a custom verb. The last method match wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RequestMethod {
    #[default]
    Get,
    Post,
    Custom(String),
}

impl RequestMethod {
    fn set(&mut self, payload: &str) {
        *self = match payload {
            "GET" => Self::Get,
            "POST" => Self::Post,
            other => Self::Custom(other.to_string()),
        };
    }
}

/// Fully assembled request, ready for dispatch.
#[derive(Clone, Debug)]
pub struct RequestPlan {
    pub method: RequestMethod,
    pub uri: String,
    pub headers: Vec<String>,
    pub cookie: String,
    pub body: String,
    pub body_appended: bool,
    pub sid: String,
}

impl RequestPlan {
    /// Assembles the request for `rule`. `pcre_payloads` holds one generated
    /// payload per pcre match, `None` for negated ones.
    pub fn build(rule: &ParsedRule, pcre_payloads: &[Option<String>]) -> Result<Self> {
        if rule.pcres.len() != pcre_payloads.len() {
            return Err(GenError::Plausibility(format!(
                "sid {}: {} pcre matches but {} generated payloads",
                rule.sid,
                rule.pcres.len(),
                pcre_payloads.len()
            )));
        }

        let mut plan = RequestPlan {
            method: RequestMethod::Get,
            uri: String::new(),
            headers: Vec::new(),
            cookie: String::new(),
            body: SENTINEL_BODY.to_string(),
            body_appended: false,
            sid: rule.sid.clone(),
        };

        for content in &rule.contents {
            // a negated pattern must stay out of the request
            if content.negated {
                continue;
            }
            plan.apply(content.location, &content.pattern, &rule.sid)?;
        }

        for (pcre, payload) in rule.pcres.iter().zip(pcre_payloads) {
            let Some(payload) = payload else { continue };
            for location in &pcre.locations {
                let fragment = if matches!(location, HttpLocation::Uri | HttpLocation::RawUri) {
                    payload.replace(' ', "+")
                } else {
                    payload.clone()
                };
                plan.apply(*location, &fragment, &rule.sid)?;
            }
        }

        Ok(plan)
    }

    fn apply(&mut self, location: HttpLocation, payload: &str, sid: &str) -> Result<()> {
        match location {
            HttpLocation::Method => self.method.set(payload),
            HttpLocation::Uri | HttpLocation::RawUri => {
                if payload.contains("//") {
                    tracing::warn!(sid = %sid, "double slash in uri fragment {:?}", payload);
                }
                self.uri.push_str(payload);
            }
            HttpLocation::Header | HttpLocation::RawHeader => {
                self.headers.push(sanitize_header(payload, sid)?);
            }
            HttpLocation::ClientBody => {
                self.body.push_str(trim_line_markers(payload));
                self.body_appended = true;
            }
            HttpLocation::Cookie | HttpLocation::RawCookie => {
                // the fragment may not be a name=value pair; servers accept
                // that too
                self.cookie.push_str(payload);
            }
            HttpLocation::StatMsg | HttpLocation::StatCode => {
                return Err(GenError::ParseSemantic(format!(
                    "sid {}: cannot control server responses, please remove this rule",
                    sid
                )));
            }
            HttpLocation::None => {
                return Err(GenError::Plausibility(format!(
                    "sid {}: match without http location reached dispatch",
                    sid
                )));
            }
        }
        Ok(())
    }

    /// Final URL with exactly one slash between host and the accumulated
    /// request-URI.
    pub fn url(&self, host: &str) -> String {
        let path = self.uri.trim_start_matches('/');
        warn_uri_charset(path, &self.sid);
        if host.contains("://") {
            format!("{}/{}", host.trim_end_matches('/'), path)
        } else {
            format!("http://{}/{}", host.trim_end_matches('/'), path)
        }
    }
}

/// Trims the literal `\r` / `\n` markers hex decoding leaves at fragment
/// boundaries; inner ones are kept.
fn trim_line_markers(payload: &str) -> &str {
    let mut s = payload;
    loop {
        if let Some(rest) = s.strip_prefix("\\r").or_else(|| s.strip_prefix("\\n")) {
            s = rest;
            continue;
        }
        if let Some(rest) = s.strip_suffix("\\r").or_else(|| s.strip_suffix("\\n")) {
            s = rest;
            continue;
        }
        break;
    }
    s
}

/// A header line with an empty value reads as a delete-header directive to
/// the client library, so bare names get a dummy value.
fn sanitize_header(raw: &str, sid: &str) -> Result<String> {
    let header = trim_line_markers(raw);
    if header.is_empty() {
        return Err(GenError::ParseSemantic(format!(
            "sid {}: cannot sanitize an empty header, check the rule's pcre",
            sid
        )));
    }
    Ok(if header.ends_with(": ") {
        format!("{}DummyValue", header)
    } else if header.ends_with(':') {
        format!("{} DummyValue", header)
    } else if !header.contains(':') {
        format!("DummyHeader: {}", header)
    } else {
        header.to_string()
    })
}

/// RFC 2396 delimiters and unwise characters; flagged because many servers
/// reject them unescaped.
fn warn_uri_charset(path: &str, sid: &str) {
    const DISALLOWED: [char; 5] = ['#', '>', '<', '%', '"'];
    const UNWISE: [char; 7] = ['{', '}', '|', '[', ']', '\\', '`'];

    let mut found: Vec<char> = path.chars().filter(|c| DISALLOWED.contains(c)).collect();
    found.sort_unstable();
    found.dedup();
    if !found.is_empty() {
        tracing::warn!(sid = %sid, "uri contains disallowed characters: {:?}", found);
    }

    let mut found: Vec<char> = path.chars().filter(|c| UNWISE.contains(c)).collect();
    found.sort_unstable();
    found.dedup();
    if !found.is_empty() {
        tracing::warn!(sid = %sid, "uri contains unwise characters: {:?}", found);
    }
}

/// Sequential request dispatcher. Owns the monotonically increasing packet
/// counter.
pub struct PacketSender {
    host: String,
    config: Config,
    packets_sent: u64,
}

impl PacketSender {
    pub fn new(host: impl Into<String>, config: Config) -> Self {
        Self {
            host: host.into(),
            config,
            packets_sent: 0,
        }
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Synthesizes and dispatches the request for one rule.
    pub fn send_rule(&mut self, rule: &ParsedRule) -> Result<()> {
        let payloads = generate_pcre_payloads(rule)?;
        let plan = RequestPlan::build(rule, &payloads)?;
        self.dispatch(&plan)
    }

    fn dispatch(&mut self, plan: &RequestPlan) -> Result<()> {
        let url = plan.url(&self.host);
        let method = match &plan.method {
            RequestMethod::Get => Method::GET,
            RequestMethod::Post => Method::POST,
            RequestMethod::Custom(verb) => Method::from_bytes(verb.as_bytes()).map_err(|err| {
                GenError::Transport(format!(
                    "sid {}: invalid request method {:?}: {}",
                    plan.sid, verb, err
                ))
            })?,
        };

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| GenError::Transport(err.to_string()))?;

        let mut headers = HeaderMap::new();
        for line in &plan.headers {
            // sanitisation guarantees the colon
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|err| {
                GenError::Transport(format!("sid {}: bad header name {:?}: {}", plan.sid, line, err))
            })?;
            let value = HeaderValue::from_str(value.trim()).map_err(|err| {
                GenError::Transport(format!("sid {}: bad header value {:?}: {}", plan.sid, line, err))
            })?;
            headers.append(name, value);
        }
        if !plan.cookie.is_empty() {
            let cookie = HeaderValue::from_str(&plan.cookie).map_err(|err| {
                GenError::Transport(format!("sid {}: bad cookie value: {}", plan.sid, err))
            })?;
            headers.append(COOKIE, cookie);
        }
        let sid_value = HeaderValue::from_str(&plan.sid).map_err(|err| {
            GenError::Transport(format!("sid {}: bad sid header value: {}", plan.sid, err))
        })?;
        headers.append(HeaderName::from_static(RULESID_HEADER), sid_value);

        let mut request = client.request(method, url.as_str()).headers(headers);
        if plan.body_appended {
            request = request.body(plan.body.clone());
        }

        tracing::debug!(sid = %plan.sid, url = %url, "dispatching request");
        if self.config.verbose {
            tracing::debug!(
                sid = %plan.sid,
                "headers: {:?}, cookie: {:?}, body: {:?}",
                plan.headers,
                plan.cookie,
                plan.body
            );
        }

        let response = request.send().map_err(|err| {
            GenError::Transport(format!(
                "sid {}: request to {} failed: {}",
                plan.sid, url, err
            ))
        })?;
        self.packets_sent += 1;

        if self.config.print_response {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            println!("sid {} response: {}", plan.sid, status);
            if !body.is_empty() {
                println!("{}", body);
            }
        }
        Ok(())
    }
}

/// Generates one sampler payload per non-negated pcre match.
fn generate_pcre_payloads(rule: &ParsedRule) -> Result<Vec<Option<String>>> {
    rule.pcres
        .iter()
        .map(|pcre| {
            if pcre.negated {
                // a negated pcre negates its modifiers too; nothing to send
                return Ok(None);
            }
            if pcre.pattern.contains(' ') && !pcre.locations.contains(&HttpLocation::Uri) {
                tracing::warn!(
                    sid = %rule.sid,
                    "non-encoded whitespace in non-uri pcre, generation may misbehave"
                );
            }
            let sanitized = sanitize_pcre(&pcre.pattern, &rule.sid);
            generate_payload(&sanitized, &rule.sid).map(Some)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ContentMatch, Direction, PcreMatch, RuleHeader};

    fn content(pattern: &str, location: HttpLocation) -> ContentMatch {
        ContentMatch {
            pattern: pattern.to_string(),
            original: pattern.to_string(),
            negated: false,
            contains_hex: false,
            nocase: false,
            location,
        }
    }

    fn rule(contents: Vec<ContentMatch>, pcres: Vec<PcreMatch>) -> ParsedRule {
        ParsedRule {
            header: RuleHeader {
                action: "alert".to_string(),
                protocol: "tcp".to_string(),
                src_addr: "any".to_string(),
                src_port: "any".to_string(),
                direction: Direction::Unidirectional,
                dst_addr: "any".to_string(),
                dst_port: "any".to_string(),
            },
            msg: "test".to_string(),
            sid: "42".to_string(),
            rev: "1".to_string(),
            contents,
            pcres,
            line: 1,
        }
    }

    #[test]
    fn test_request_assembly_end_to_end() {
        let rule = rule(
            vec![
                content("GET", HttpLocation::Method),
                content("/a", HttpLocation::Uri),
                content("Host: x", HttpLocation::Header),
            ],
            vec![PcreMatch {
                pattern: "b[cd]".to_string(),
                negated: false,
                nocase: false,
                locations: vec![HttpLocation::Uri],
            }],
        );
        let plan = RequestPlan::build(&rule, &[Some("bc".to_string())]).unwrap();

        assert_eq!(plan.method, RequestMethod::Get);
        assert_eq!(plan.url("target.test"), "http://target.test/abc");
        assert_eq!(plan.headers, vec!["Host: x".to_string()]);
        assert_eq!(plan.sid, "42");
        // nothing was appended to the sentinel, so no body rides along
        assert!(!plan.body_appended);
    }

    #[test]
    fn test_custom_method_verb() {
        let rule = rule(vec![content("WIBBLE", HttpLocation::Method)], vec![]);
        let plan = RequestPlan::build(&rule, &[]).unwrap();
        assert_eq!(plan.method, RequestMethod::Custom("WIBBLE".to_string()));
    }

    #[test]
    fn test_last_method_wins() {
        let rule = rule(
            vec![content("GET", HttpLocation::Method)],
            vec![PcreMatch {
                pattern: "POST".to_string(),
                negated: false,
                nocase: false,
                locations: vec![HttpLocation::Method],
            }],
        );
        let plan = RequestPlan::build(&rule, &[Some("POST".to_string())]).unwrap();
        assert_eq!(plan.method, RequestMethod::Post);
    }

    #[test]
    fn test_negated_matches_stay_out() {
        let mut negated = content("secret", HttpLocation::Uri);
        negated.negated = true;
        let rule = rule(vec![negated, content("/ok", HttpLocation::Uri)], vec![]);
        let plan = RequestPlan::build(&rule, &[]).unwrap();
        assert_eq!(plan.uri, "/ok");
    }

    #[test]
    fn test_body_appends_to_sentinel() {
        let rule = rule(vec![content("\\r\\npayload\\n", HttpLocation::ClientBody)], vec![]);
        let plan = RequestPlan::build(&rule, &[]).unwrap();
        assert!(plan.body_appended);
        assert_eq!(plan.body, "12345payload");
    }

    #[test]
    fn test_cookie_fragments_accumulate() {
        let rule = rule(
            vec![
                content("a=1;", HttpLocation::Cookie),
                content("b=2", HttpLocation::RawCookie),
            ],
            vec![],
        );
        let plan = RequestPlan::build(&rule, &[]).unwrap();
        assert_eq!(plan.cookie, "a=1;b=2");
    }

    #[test]
    fn test_stat_locations_refused() {
        let rule = rule(vec![content("200", HttpLocation::StatCode)], vec![]);
        let err = RequestPlan::build(&rule, &[]).unwrap_err();
        assert!(matches!(err, GenError::ParseSemantic(_)));
        assert!(err.to_string().contains("server responses"));
    }

    #[test]
    fn test_pcre_uri_payload_spaces_become_plus() {
        let rule = rule(
            vec![],
            vec![PcreMatch {
                pattern: "a b".to_string(),
                negated: false,
                nocase: false,
                locations: vec![HttpLocation::Uri],
            }],
        );
        let plan = RequestPlan::build(&rule, &[Some("a b".to_string())]).unwrap();
        assert_eq!(plan.uri, "a+b");
    }

    #[test]
    fn test_pcre_multi_location_payload_shared() {
        let rule = rule(
            vec![],
            vec![PcreMatch {
                pattern: "x".to_string(),
                negated: false,
                nocase: false,
                locations: vec![HttpLocation::Uri, HttpLocation::Cookie],
            }],
        );
        let plan = RequestPlan::build(&rule, &[Some("x".to_string())]).unwrap();
        assert_eq!(plan.uri, "x");
        assert_eq!(plan.cookie, "x");
    }

    #[test]
    fn test_payload_count_mismatch_is_rejected() {
        let rule = rule(
            vec![],
            vec![PcreMatch {
                pattern: "x".to_string(),
                negated: false,
                nocase: false,
                locations: vec![HttpLocation::Uri],
            }],
        );
        let err = RequestPlan::build(&rule, &[]).unwrap_err();
        assert!(matches!(err, GenError::Plausibility(_)));
    }

    #[test]
    fn test_url_normalizes_leading_slashes() {
        let rule = rule(vec![content("//x", HttpLocation::Uri)], vec![]);
        let plan = RequestPlan::build(&rule, &[]).unwrap();
        assert_eq!(plan.url("h"), "http://h/x");
        assert_eq!(plan.url("https://h"), "https://h/x");
    }

    #[test]
    fn test_sanitize_header_variants() {
        assert_eq!(sanitize_header("Host: x", "1").unwrap(), "Host: x");
        assert_eq!(sanitize_header("Host:", "1").unwrap(), "Host: DummyValue");
        assert_eq!(sanitize_header("Host: ", "1").unwrap(), "Host: DummyValue");
        assert_eq!(sanitize_header("stray", "1").unwrap(), "DummyHeader: stray");
        assert!(sanitize_header("", "1").is_err());
        assert!(sanitize_header("\\r\\n", "1").is_err());
    }

    #[test]
    fn test_trim_line_markers() {
        assert_eq!(trim_line_markers("\\r\\nabc\\n"), "abc");
        assert_eq!(trim_line_markers("a\\r\\nb"), "a\\r\\nb");
    }
}
