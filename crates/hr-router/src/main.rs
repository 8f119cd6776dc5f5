//! Hybrid Router CLI: routes one chat request or checks the local gateway.
//!
//! ```text
//! hybrid-router [--config FILE] health
//! hybrid-router [--config FILE] route [FILE|-]
//! ```

use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hr_gateway::GatewayClient;
use hr_protocol::ChatRequest;
use hr_router::{OpenAiCompatProvider, RouteError, RouterConfig, RoutingEngine};

const USAGE: &str = "usage: hybrid-router [--config FILE] <health | route [FILE|-]>";

enum Command {
    Health,
    Route { input: Option<String> },
}

struct Args {
    config_path: Option<String>,
    command: Command,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut config_path = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = Some(args.next().context("--config requires a path")?);
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("health") => Command::Health,
        Some("route") => Command::Route {
            input: positional.next().filter(|p| p != "-"),
        },
        _ => bail!(USAGE),
    };
    Ok(Args {
        config_path,
        command,
    })
}

fn read_request(input: Option<&str>) -> anyhow::Result<ChatRequest> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    serde_json::from_str(&raw).context("parsing chat request")
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = RouterConfig::load(args.config_path.as_deref())?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        gateway_url = %config.policy.gateway_url,
        local_enabled = config.policy.enable_local_inference,
        cloud_model = %config.cloud.model,
        "hybrid-router starting"
    );

    // One connection pool for both backends.
    let http = reqwest::Client::new();
    let gateway = GatewayClient::with_http_client(http.clone(), config.policy.gateway_config());
    let cloud = Arc::new(OpenAiCompatProvider::with_http_client(http, config.cloud));
    let engine = RoutingEngine::with_gateway(config.policy, gateway, cloud);

    match args.command {
        Command::Health => {
            if engine.check_gateway_health().await {
                println!("healthy");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("unhealthy");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Route { input } => {
            let request = read_request(input.as_deref())?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown signal received");
                    on_signal.cancel();
                }
            });

            match engine.route(&request, &cancel).await {
                Ok(routed) => {
                    println!("{}", serde_json::to_string_pretty(&routed.completion)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(RouteError::Cancelled) => {
                    eprintln!("cancelled");
                    Ok(ExitCode::from(130))
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}
