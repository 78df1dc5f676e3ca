//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Whitelisted command execution over mutual TLS
#[derive(Parser, Debug)]
#[command(name = "httpsh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "HTTPSH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "HTTPSH_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "HTTPSH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Override the listening host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Override the listening port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Issue the CA, server and client certificates described in `cert`
    Cert,

    /// Verify a client certificate against a CA certificate
    Verify {
        /// PEM file holding the CA certificate
        #[arg(long)]
        ca: PathBuf,

        /// PEM file holding the certificate to check
        #[arg(long)]
        certificate: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["httpsh"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn host_and_port_overrides() {
        let cli = Cli::try_parse_from(["httpsh", "--host", "::1", "-p", "9443", "serve"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("::1"));
        assert_eq!(cli.port, Some(9443));
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn port_after_subcommand() {
        let cli = Cli::try_parse_from(["httpsh", "serve", "--port", "9443", "--host", "0.0.0.0"])
            .unwrap();
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.port, Some(9443));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn verify_requires_both_paths() {
        assert!(Cli::try_parse_from(["httpsh", "verify", "--ca", "ca.crt"]).is_err());

        let cli = Cli::try_parse_from([
            "httpsh",
            "verify",
            "--ca",
            "ca.crt",
            "--certificate",
            "client.crt",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Verify { ca, certificate }) => {
                assert_eq!(ca, PathBuf::from("ca.crt"));
                assert_eq!(certificate, PathBuf::from("client.crt"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["httpsh", "cert", "--config", "/etc/httpsh.yaml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Cert)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/httpsh.yaml")));
    }
}
