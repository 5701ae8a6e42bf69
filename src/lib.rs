//! Snort rule reader and HTTP event generator
//!
//! Reads a file of Snort intrusion-detection rules, extracts the fields
//! relevant to HTTP request matching, and optionally crafts one HTTP request
//! per rule against a target host so a rule set can be exercised end-to-end
//! with reproducible traffic.
//!
//! ## Pipeline
//!
//! - **Rule Parser**: position-driven reader of the quoted, `;`-delimited
//!   rule DSL, including hex-interleaved content values and per-pattern
//!   pcre modifiers
//! - **Payload Generator**: rewrites pcre bodies into sampler-friendly form
//!   and invokes the external `exrex` sampler for a matching string
//! - **Request Builder**: assembles method, URI, headers, cookies and body
//!   from the parsed matches and dispatches exactly one request per rule
//!
//! Processing is single-threaded and strictly sequential: each rule is
//! parsed and dispatched to completion before the next rule begins.

pub mod parser;
pub mod payload;
pub mod request;
pub mod scan;

pub use parser::{ContentMatch, HttpLocation, ParsedRule, PcreMatch, RuleParser};
pub use request::{PacketSender, RequestPlan};

use thiserror::Error;

/// Event generator errors
#[derive(Error, Debug)]
pub enum GenError {
    #[error("Rule parsing error: {0}")]
    ParseStructure(String),

    #[error("Unsupported rule construct: {0}")]
    ParseSemantic(String),

    #[error("Rule consistency check failed: {0}")]
    Plausibility(String),

    #[error("Payload sampler unavailable: {0}")]
    SamplerMissing(String),

    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GenError>;

/// Run-wide flags, read-only after CLI parsing.
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
    /// Downgrade fatal parse and dispatch errors to warnings.
    pub continue_on_error: bool,

    /// Verbose dispatch diagnostics.
    pub verbose: bool,

    /// Print server responses to stdout.
    pub print_response: bool,
}
