//! llm-gateway: a multi-provider LLM gateway binary entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "Multi-provider LLM gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "GATEWAY_CONFIG", default_value = "config/gateway.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match llm_gateway::server::run_server(&cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
