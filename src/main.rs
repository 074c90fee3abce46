//! gitbridge - gateway git execution
//!
//! Usage:
//!   gitbridge serve [--config PATH] [--port N] [--log-json]
//!   gitbridge invoke --gateway ws://127.0.0.1:47800/ws status --path projects/alpha
//!   gitbridge invoke --gateway ... commit --path p --opt message=x --opt authorName=A --opt authorEmail=a@b

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::info;

use gitbridge_core::bridge::{GitScriptModule, ScopeBridge, WebSocketChannel};
use gitbridge_core::config::{GatewayConfig, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "gitbridge")]
#[command(about = "Gateway-side git operations for client and designer scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway WebSocket endpoint
    Serve {
        /// Config file (default ~/.gitbridge/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Listen port, overrides config and GITBRIDGE_PORT
        #[arg(long)]
        port: Option<u16>,

        /// Emit logs as JSON lines
        #[arg(long)]
        log_json: bool,
    },

    /// Call `system.git.call` through the scope bridge and print the result map
    Invoke {
        /// Gateway WebSocket URL
        #[arg(long, default_value_t = format!("ws://127.0.0.1:{}/ws", DEFAULT_PORT))]
        gateway: String,

        /// Gateway per-operation timeout in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,

        /// Seconds to wait for the WebSocket handshake
        #[arg(long, default_value_t = 5)]
        connect_timeout: u64,

        /// Operation: clone, fetch, pull, push, commit, status, branches, close
        operation: String,

        /// Repository path relative to the gateway's repository root
        #[arg(long)]
        path: String,

        /// Extra option as key=value (repeatable); `paths` takes a comma-separated list
        #[arg(long = "opt", value_name = "KEY=VALUE")]
        opts: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve {
            config,
            port,
            log_json,
        } => serve(config, port, log_json),
        Commands::Invoke {
            gateway,
            timeout,
            connect_timeout,
            operation,
            path,
            opts,
        } => invoke(&gateway, timeout, connect_timeout, &operation, path, &opts),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn serve(config: Option<PathBuf>, port: Option<u16>, log_json: bool) -> Result<ExitCode> {
    gitbridge_core::util::init_logging(log_json);

    let mut config = GatewayConfig::load(config.as_deref()).context("loading configuration")?;
    if let Some(port) = port {
        config.server.port = port;
    }
    info!(
        root = %config.repositories.root.display(),
        addr = %config.listen_addr(),
        "Starting gitbridge gateway"
    );

    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    runtime
        .block_on(gitbridge_core::server::run_server(&config))
        .map_err(|e| anyhow!("gateway stopped: {}", e))?;
    Ok(ExitCode::SUCCESS)
}

fn parse_options(path: String, opts: &[String]) -> Result<Map<String, Value>> {
    let mut options = Map::new();
    options.insert("path".to_string(), Value::String(path));
    for opt in opts {
        let (key, value) = opt
            .split_once('=')
            .ok_or_else(|| anyhow!("option '{}' is not KEY=VALUE", opt))?;
        let value = if key == "paths" {
            Value::Array(
                value
                    .split(',')
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            )
        } else {
            Value::String(value.to_string())
        };
        options.insert(key.to_string(), value);
    }
    Ok(options)
}

fn invoke(
    gateway: &str,
    timeout: u64,
    connect_timeout: u64,
    operation: &str,
    path: String,
    opts: &[String],
) -> Result<ExitCode> {
    let options = parse_options(path, opts)?;
    let channel =
        WebSocketChannel::new(gateway)?.with_connect_timeout(Duration::from_secs(connect_timeout));
    let bridge = ScopeBridge::new(Arc::new(channel), Duration::from_secs(timeout));
    let module = GitScriptModule::new(bridge);

    match module.call(operation, &options) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            let body = json!({
                "error_kind": failure.kind,
                "error_message": failure.message,
            });
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            Ok(ExitCode::FAILURE)
        }
    }
}
