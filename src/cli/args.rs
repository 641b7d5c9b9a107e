//! CLI argument definitions using clap
//!
//! Commands:
//! - coachlink serve --config <path>
//! - coachlink listen --config <path> --table <table>
//! - coachlink token --config <path> --sub <uuid>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// coachlink - realtime and edge functions for a coaching app
#[derive(Parser, Debug)]
#[command(name = "coachlink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Minimum log severity (trace, info, warn, error, fatal)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the edge functions over HTTP
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./coachlink.json")]
        config: PathBuf,
    },

    /// Subscribe to a table and print each change as a JSON line
    Listen {
        /// Path to configuration file
        #[arg(long, default_value = "./coachlink.json")]
        config: PathBuf,

        /// Table to listen to
        #[arg(long)]
        table: String,

        /// Change kind: INSERT, UPDATE, DELETE or *
        #[arg(long, default_value = "*")]
        event: String,

        /// Row filter, e.g. `student_id=eq.42`
        #[arg(long)]
        filter: Option<String>,

        /// Debounce key (defaults to the table name)
        #[arg(long)]
        key: Option<String>,

        /// User access token for row-level security
        #[arg(long)]
        access_token: Option<String>,
    },

    /// Print a development access token
    Token {
        /// Path to configuration file
        #[arg(long, default_value = "./coachlink.json")]
        config: PathBuf,

        /// User id (UUID)
        #[arg(long)]
        sub: String,

        /// User email
        #[arg(long)]
        email: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen() {
        let cli = Cli::try_parse_from([
            "coachlink",
            "listen",
            "--table",
            "workouts",
            "--event",
            "INSERT",
            "--filter",
            "student_id=eq.42",
        ])
        .unwrap();

        match cli.command {
            Command::Listen {
                table,
                event,
                filter,
                key,
                ..
            } => {
                assert_eq!(table, "workouts");
                assert_eq!(event, "INSERT");
                assert_eq!(filter.as_deref(), Some("student_id=eq.42"));
                assert_eq!(key, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_token_requires_sub() {
        assert!(Cli::try_parse_from(["coachlink", "token"]).is_err());
    }
}
