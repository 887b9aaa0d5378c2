// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::GatewayConfig;
use serving::{DispatcherConfig, ModelRegistry, RuntimeManager};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "modelgate", version, about = "model serving gateway")]
struct Cli {
    /// optional path to a toml config file (applies to all subcommands)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// load the startup models and serve the http api
    Serve(ServeOpts),

    /// validate the config and load every startup model once, then exit
    Check,
}

#[derive(Parser, Debug)]
struct ServeOpts {
    /// address to bind (overrides config)
    #[arg(long)]
    host: Option<IpAddr>,

    /// port to bind (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// inference worker count (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// json file listing startup models (overrides config)
    #[arg(long)]
    models_file: Option<PathBuf>,
}

impl ServeOpts {
    fn apply(self, cfg: &mut GatewayConfig) {
        if let Some(host) = self.host {
            cfg.host = host.to_string();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(workers) = self.workers {
            cfg.workers = Some(workers);
        }
        if let Some(path) = self.models_file {
            cfg.models_file = Some(path);
        }
    }
}

fn dispatcher_config(cfg: &GatewayConfig) -> DispatcherConfig {
    DispatcherConfig {
        workers: cfg.workers.unwrap_or_else(serving::dispatcher::default_workers),
        queue_depth: cfg.queue_depth,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Serve(opts) => {
            opts.apply(&mut cfg);
            util::logging::init_tracing(&cfg.log_level);
            cfg.validate()?;
            serve(cfg).await
        }
        Commands::Check => {
            util::logging::init_tracing(&cfg.log_level);
            cfg.validate()?;
            check(cfg).await
        }
    }
}

async fn serve(cfg: GatewayConfig) -> Result<()> {
    let listen = cfg.socket_addr()?;
    let models = cfg.bootstrap_models()?;
    info!(
        "starting modelgate on {} with {} startup model(s)",
        listen,
        models.len()
    );

    let runtime = RuntimeManager::new(dispatcher_config(&cfg));
    if let Err(e) = runtime.bootstrap(&models).await {
        error!("startup model load failed: {e}");
        runtime.shutdown().await;
        return Err(e).context("failed to load startup models");
    }

    let config = gateway::Config {
        listen,
        default_batch_size: cfg.default_batch_size,
        credentials: gateway::auth::from_settings(cfg.require_api_key, &cfg.api_keys),
    };
    gateway::run(config, runtime).await
}

async fn check(cfg: GatewayConfig) -> Result<()> {
    let models = cfg.bootstrap_models()?;
    let registry = ModelRegistry::new();

    let outcome = registry.load_all(&models).await;
    for model in registry.list().await {
        info!(
            "ok: {}:{} ({}) input {:?} output {:?}",
            model.name, model.version, model.kind, model.input_shape, model.output_shape
        );
    }
    registry.unload_all().await;

    let loaded = outcome.context("startup model check failed")?;
    info!(
        "config ok: listen {}, {} model(s) loadable",
        cfg.socket_addr()?,
        loaded
    );
    Ok(())
}
