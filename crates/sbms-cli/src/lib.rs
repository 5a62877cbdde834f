//! SBMS CLI library
//!
//! Building blocks of the `sbms` binary: argument parsing, layered
//! configuration, OBEX-over-TCP links and the send primitives that hand
//! messages to the cellular network.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod sender;
pub mod transport;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, ConfigError, Overrides};
pub use error::{CliError, Result};
pub use sender::{CommandSender, DryRunSender, NoGateway};
pub use transport::{inbox_sink, spawn_listener, TcpTransport};
