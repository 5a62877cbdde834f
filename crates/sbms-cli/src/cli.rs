//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use sbms_core::{IdDigest, Priority, StatusCode};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (replaces sbms.toml and ~/.sbms/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Carrier role: accept requests, send them and push statuses back
    Relay {
        /// Address the OBEX listener binds to
        #[arg(short, long)]
        listen: Option<String>,
        /// Address of the peer that receives status responses
        #[arg(short, long)]
        peer: Option<String>,
        /// Also drain pushed objects from this folder
        #[arg(short, long)]
        inbox: Option<PathBuf>,
        /// Log messages instead of running the send command
        #[arg(long)]
        dry_run: bool,
    },
    /// Originating role: push one request and wait for its status
    Send {
        /// Destination address
        #[arg(short, long)]
        to: String,
        /// Message text
        text: String,
        /// Message priority
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
        /// Address of the relay that receives the request
        #[arg(short, long)]
        peer: Option<String>,
        /// Address the status listener binds to
        #[arg(short, long)]
        listen: Option<String>,
        /// Return once the relay accepted the request
        #[arg(long)]
        no_wait: bool,
    },
    /// Print the wire form of a record
    Encode {
        #[command(subcommand)]
        record: EncodeCommand,
    },
    /// Decode records from a file (or stdin) and print them as JSON
    Decode {
        /// Input file, `-` for stdin
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Compute the correlation identifier of a message
    Uuid {
        #[arg(short, long)]
        to: String,
        text: String,
        /// Unix seconds, defaults to now
        #[arg(long)]
        timestamp: Option<i64>,
        #[arg(long, value_enum)]
        digest: Option<DigestArg>,
    },
    /// Print an example configuration file
    Config,
}

#[derive(Subcommand, Debug)]
pub enum EncodeCommand {
    /// A send request
    Request {
        #[arg(short, long)]
        to: String,
        text: String,
        /// Correlation identifier, derived from the message when omitted
        #[arg(long)]
        id: Option<String>,
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
    },
    /// A status response
    Status {
        #[arg(long)]
        id: String,
        #[arg(long, value_enum)]
        status: StatusArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusArg {
    Sent,
    Failed,
    Delivered,
    Rejected,
}

impl From<StatusArg> for StatusCode {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Sent => StatusCode::Sent,
            StatusArg::Failed => StatusCode::Failed,
            StatusArg::Delivered => StatusCode::Delivered,
            StatusArg::Rejected => StatusCode::Rejected,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestArg {
    Sha1,
    Sha256,
}

impl From<DigestArg> for IdDigest {
    fn from(arg: DigestArg) -> Self {
        match arg {
            DigestArg::Sha1 => IdDigest::Sha1,
            DigestArg::Sha256 => IdDigest::Sha256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from(["sbms", "-v", "send", "--to", "+46701234567", "Hello", "--priority", "high"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Send { to, text, priority, no_wait, .. } => {
                assert_eq!(to, "+46701234567");
                assert_eq!(text, "Hello");
                assert_eq!(priority, PriorityArg::High);
                assert!(!no_wait);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_encode_status() {
        let cli = Cli::try_parse_from(["sbms", "encode", "status", "--id", "A3F7E2C1", "--status", "delivered"]).unwrap();
        match cli.command {
            Commands::Encode {
                record: EncodeCommand::Status { id, status },
            } => {
                assert_eq!(id, "A3F7E2C1");
                assert_eq!(StatusCode::from(status), StatusCode::Delivered);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
