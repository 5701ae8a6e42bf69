//! snortgen CLI
//!
//! Reads a Snort rule file and optionally crafts one HTTP request per parsed
//! rule against a target host.
//!
//! # Usage
//!
//! ```bash
//! snortgen -f community.rules -p
//! snortgen -f community.rules -s 10.0.0.5 -v
//! snortgen -f community.rules -s ids.lab.test -r -c
//! ```

use anyhow::Context;
use clap::Parser;
use snortgen::parser::RuleParser;
use snortgen::request::PacketSender;
use snortgen::{Config, GenError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "snortgen")]
#[command(version = "0.1.0")]
#[command(about = "Reads Snort rules and sends HTTP requests crafted to trigger them")]
struct Cli {
    /// Path to a file containing Snort rules, one rule per line
    #[arg(short, long)]
    file: PathBuf,

    /// Hostname or IP to send crafted packets to; no packets are sent when absent
    #[arg(short, long)]
    server: Option<String>,

    /// Print rules parsed from the file
    #[arg(short, long)]
    print: bool,

    /// Print the response from the server (requires --server)
    #[arg(short, long)]
    response: bool,

    /// Be verbose when sending packets
    #[arg(short, long)]
    verbose: bool,

    /// Continue on (some) errors, use with caution
    #[arg(short = 'c', long = "continue")]
    continue_on_error: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // help and usage errors both leave through exit code 1
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    // diagnostics go to stderr; stdout is reserved for rule output and
    // summary counts
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config {
        continue_on_error: cli.continue_on_error,
        verbose: cli.verbose,
        print_response: cli.response && cli.server.is_some(),
    };

    println!("Configured to read from file: {}", cli.file.display());
    if let Some(host) = &cli.server {
        println!("Configured to send packets to host: {}", host);
    }
    if cli.print {
        println!("Configured to print parsed rules");
    }
    if cli.continue_on_error {
        println!("Configured to continue on error (use with caution)");
    }
    if cli.response {
        if cli.server.is_some() {
            println!("Configured to print responses from server");
        } else {
            tracing::warn!("--response requires --server, ignoring");
        }
    }

    let mut parser = RuleParser::new(config);
    parser
        .parse_file(&cli.file)
        .with_context(|| format!("failed to parse rules from {}", cli.file.display()))?;
    println!("{} rules successfully parsed", parser.rules().len());

    if cli.print {
        for rule in parser.rules() {
            println!("{}\n", rule);
        }
    } else {
        println!("Not printing rules");
    }

    if let Some(host) = &cli.server {
        let mut sender = PacketSender::new(host.clone(), config);
        for rule in parser.rules() {
            match sender.send_rule(rule) {
                Ok(()) => {}
                // transport failures never stop the run
                Err(GenError::Transport(msg)) => {
                    tracing::warn!(line = rule.line, "{}", msg);
                }
                Err(err @ GenError::SamplerMissing(_)) => return Err(err.into()),
                Err(err) if config.continue_on_error => {
                    tracing::warn!(line = rule.line, sid = %rule.sid, "skipping rule: {}", err);
                }
                Err(err) => return Err(err.into()),
            }
        }
        println!("{} packets sent", sender.packets_sent());
    } else {
        println!("Not sending out packets");
    }

    Ok(())
}
