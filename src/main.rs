//! knowledge-mcp: MCP server for knowledge search, analytics and health
//!
//! Serves a knowledge base to AI assistants over stdio or HTTP.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use knowledge_mcp::config::{self, TransportMode};
use knowledge_mcp::mcp::server::{in_memory_services, McpServer};

/// MCP server for knowledge search, analytics and health.
///
/// Exposes search, catalog and health tools plus `resource://` addressed
/// documents to AI assistants.
#[derive(Parser, Debug)]
#[command(name = "knowledge-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve, overriding the configuration file
    #[arg(short, long, value_enum)]
    transport: Option<TransportMode>,

    /// HTTP port, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber. Logs go to stderr so stdout stays
/// reserved for protocol frames.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Startup notice required by the GPL.
fn banner() -> String {
    format!(
        "knowledge-mcp {}  Copyright (C) 2026  The Embedded Society\n\
         This program comes with ABSOLUTELY NO WARRANTY.\n\
         This is free software, licensed under GPL-3.0-or-later.\n\
         Source: {}\n",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY"),
    )
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                    eprintln!("Create one based on config/example-config.json");
                }
            }
            return ExitCode::FAILURE;
        }
    };

    if let Some(mode) = args.transport {
        cfg.transport.mode = mode;
    }
    if let Some(port) = args.port {
        cfg.transport.port = port;
    }
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::FAILURE;
    }

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    eprintln!("{}", banner());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cfg.transport.mode,
        "Starting knowledge-mcp server"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async move {
        let services = match in_memory_services(&cfg.knowledge).await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "Failed to initialise knowledge backend");
                return false;
            }
        };

        let server = match McpServer::new(cfg, services) {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, "Failed to register tools");
                return false;
            }
        };

        match server.run().await {
            Ok(()) => {
                info!("Server shut down gracefully");
                true
            }
            Err(e) => {
                error!(error = %e, "Server error");
                false
            }
        }
    });

    if result {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
