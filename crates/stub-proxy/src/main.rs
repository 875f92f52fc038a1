use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use stub_proxy::{logging, Config, ProxyServer};

#[derive(Parser, Debug)]
#[command(name = "stub-proxy")]
#[command(author, version, about = "Record/replay HTTP proxy with fault injection hooks")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "STUB_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Listening port (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error, off
    #[arg(long)]
    log_level: Option<String>,

    /// Origin host (required without a configuration file)
    #[arg(long)]
    origin_host: Option<String>,

    /// Origin port (required without a configuration file)
    #[arg(long)]
    origin_port: Option<u16>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => {
            let host = args
                .origin_host
                .clone()
                .context("--origin-host is required without --config")?;
            let port = args
                .origin_port
                .context("--origin-port is required without --config")?;
            Config::for_origin(host, port)
        }
    };

    if args.config.is_some() {
        if let Some(host) = &args.origin_host {
            config.origin.host = host.clone();
        }
        if let Some(port) = args.origin_port {
            config.origin.port = port;
        }
    }
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    logging::init(&config.logging, args.log_level.as_deref())?;

    let server = ProxyServer::new(config)?.bind().await?;
    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
