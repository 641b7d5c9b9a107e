//! CLI module for coachlink
//!
//! Provides command-line interface for:
//! - serve: Run the edge functions HTTP server
//! - listen: Print realtime changes for a table
//! - token: Issue a development access token

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{listen, run, run_command, serve, token, ListenArgs};
pub use config::Config;
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{change_line, write_change, write_response};
