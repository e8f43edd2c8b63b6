//! Command line interface for the `relink` binary.
//!
//! Kept free of crate imports so the build script can include it for man
//! page generation.

use std::path::PathBuf;

use clap::Parser;

/// Command line arguments for the `relink` binary.
///
/// Reads lines from standard input, sends each one to the endpoint and logs
/// every session event.
#[derive(Debug, Parser)]
#[command(
    name = "relink",
    version,
    about = "Resilient line-oriented client for named local services"
)]
pub struct Cli {
    /// Endpoint name, for example `fetch` or `mysql-mcp-server`.
    pub endpoint: String,

    /// JSON configuration file. Flags override its values.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Handshakes attempted per connect sequence.
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Deadline for one handshake, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub base_delay_ms: Option<u64>,

    /// Ceiling on retry delays, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub max_delay_ms: Option<u64>,

    /// Log verbosity.
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_endpoint_and_overrides() {
        let cli = Cli::parse_from([
            "relink",
            "mysql-mcp-server",
            "--max-attempts",
            "3",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.endpoint, "mysql-mcp-server");
        assert_eq!(cli.max_attempts, Some(3));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.config.is_none());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = Cli::try_parse_from(["relink", "fetch", "--log-level", "loud"])
            .expect_err("unknown level");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn requires_endpoint() {
        assert!(Cli::try_parse_from(["relink"]).is_err());
    }
}
