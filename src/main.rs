//! httpsh - whitelisted command execution over mutual TLS

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use httpsh::{
    cli::{Cli, Command},
    config::Config,
    gateway::{self, Server, Timeouts},
    pki, setup_tracing, tls,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Cert) => run_cert(&config),
        Some(Command::Verify { ca, certificate }) => run_verify(&ca, &certificate),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Issue CA, server and client certificates
fn run_cert(config: &Config) -> ExitCode {
    match pki::issue_all(&config.cert) {
        Ok(issued) => {
            println!("CA certificate:     {}", config.cert.ca.certificate.display());
            println!("Server certificate: {}", config.cert.server.certificate.display());
            println!("Client certificate: {}", config.cert.client.certificate.display());
            info!(server_issuer = ?issued.server.issuer(), "Certificate issuance complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Certificate issuance failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Check a client certificate against a CA
fn run_verify(ca: &std::path::Path, certificate: &std::path::Path) -> ExitCode {
    match tls::verify_client_certificate(ca, certificate) {
        Ok(identity) => {
            println!("Certificate is valid for client authentication");
            println!("  Name:   {}", identity.display_name);
            if let Some(ou) = &identity.organizational_unit {
                println!("  Unit:   {ou}");
            }
            for email in &identity.emails {
                println!("  Email:  {email}");
            }
            println!("  Serial: {}", identity.serial);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Verification failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(config: Config) -> ExitCode {
    let server_config = &config.server;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %server_config.host,
        port = server_config.port,
        executables = server_config.executables.len(),
        "Starting httpsh"
    );

    let tls_config = match tls::build_tls_config(
        &server_config.ca_certificate,
        &server_config.server_certificate,
        &server_config.server_key,
        &server_config.domain,
    ) {
        Ok(tls_config) => tls_config,
        Err(e) => {
            error!("Failed to build TLS configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let router = match gateway::router(server_config) {
        Ok(router) => router,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tls::listen(
        &server_config.network,
        &server_config.host,
        server_config.port,
    )
    .await
    {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to listen: {e}");
            return ExitCode::FAILURE;
        }
    };

    let server = Server::new(listener, tls_config, router, Timeouts::from(server_config));
    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}
