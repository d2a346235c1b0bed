use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Decoy - request-matching and stateful scenario engine for fake test traffic
#[derive(Parser, Debug, Clone)]
#[command(name = "decoy", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file; its directory holds `config/`
    #[arg(short, long, env = "DECOY_CONFIG", default_value = "decoy.toml")]
    pub config: PathBuf,

    /// Log filter used when RUST_LOG is unset (overrides logging.level)
    #[arg(long, env = "DECOY_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Load and validate the configuration, then list the stubs
    Check,

    /// Print values generated from a contract schema
    Generate {
        /// Schema name from the contract document
        schema: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Generate a configured dataset of related entities
    Seed {
        dataset: String,
    },

    /// Check a recorded response against the contract; exits 1 when it drifted
    Validate {
        #[arg(long)]
        method: String,
        #[arg(long)]
        path: String,
        #[arg(long, default_value_t = 200)]
        status: u16,
        /// JSON file holding the response body
        #[arg(long)]
        body: Option<PathBuf>,
        /// Response header as NAME=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },

    /// Run a JSON/YAML list of requests through the engine and print each response
    Replay {
        requests: PathBuf,
        /// Scenario to activate before the first request
        #[arg(long)]
        scenario: Option<String>,
        /// Print the Prometheus metrics text afterwards
        #[arg(long)]
        metrics: bool,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{}'", raw));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["decoy", "check"]);
        assert_eq!(cli.config, PathBuf::from("decoy.toml"));
        assert!(cli.log_level.is_none());
        assert_eq!(cli.command, Command::Check);
    }

    #[test]
    fn test_generate_count() {
        let cli = Cli::parse_from(["decoy", "--config", "custom.toml", "generate", "User", "-n", "3"]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(
            cli.command,
            Command::Generate {
                schema: "User".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn test_validate_headers() {
        let cli = Cli::parse_from([
            "decoy",
            "validate",
            "--method",
            "GET",
            "--path",
            "/users/1",
            "--status",
            "404",
            "--header",
            "X-Request-Id=abc=1",
            "--header",
            "Content-Type=application/json",
        ]);
        match cli.command {
            Command::Validate {
                status, headers, body, ..
            } => {
                assert_eq!(status, 404);
                assert!(body.is_none());
                assert_eq!(headers[0], ("X-Request-Id".to_string(), "abc=1".to_string()));
                assert_eq!(headers.len(), 2);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_bad_header_rejected() {
        let result = Cli::try_parse_from(["decoy", "validate", "--method", "GET", "--path", "/", "--header", "novalue"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_replay_flags() {
        let cli = Cli::parse_from(["decoy", "replay", "requests.yaml", "--metrics", "--scenario", "checkout"]);
        assert_eq!(
            cli.command,
            Command::Replay {
                requests: PathBuf::from("requests.yaml"),
                scenario: Some("checkout".to_string()),
                metrics: true,
            }
        );
    }
}
