//! inference-guard
//!
//! # Commands
//!
//! ```text
//! run    load config → build proxies → call one proxy N times → print stats
//! serve  load config → build proxies → metrics + admin API + config watcher
//!        → Ctrl+C → stop admin API → clear registry
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use inference_guard::admin::{serve_admin, AdminState};
use inference_guard::config::watcher::ConfigWatcher;
use inference_guard::config::{load_config, BackendProfile, GuardConfig};
use inference_guard::observability::{logging, metrics};
use inference_guard::{InvokeOptions, ProxyRegistry};

#[derive(Parser)]
#[command(name = "inference-guard", version)]
#[command(about = "Cache, rate-limit and circuit-break calls to inference backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt through one proxy
    Run {
        /// Config file. Without one a single echo backend is used.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Proxy to call. Defaults to the first configured backend.
        #[arg(short, long)]
        proxy: Option<String>,

        /// Stream the response chunk by chunk
        #[arg(long)]
        stream: bool,

        /// Send the same prompt this many times
        #[arg(long, default_value_t = 1)]
        repeat: u32,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Run the admin API and hot-reload the config until Ctrl+C
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            proxy,
            stream,
            repeat,
            model,
            temperature,
            prompt,
        } => {
            let mut options = InvokeOptions::new();
            if let Some(model) = model {
                options.insert("model", model);
            }
            if let Some(temperature) = temperature {
                options.insert("temperature", temperature);
            }
            let request = RunRequest {
                proxy,
                stream,
                repeat,
                prompt: prompt.join(" "),
                options,
            };
            run(config.as_deref(), request).await
        }
        Commands::Serve { config } => serve(&config).await,
    }
}

struct RunRequest {
    proxy: Option<String>,
    stream: bool,
    repeat: u32,
    prompt: String,
    options: InvokeOptions,
}

async fn run(config_path: Option<&Path>, request: RunRequest) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    if config.backends.is_empty() {
        config.backends.push(BackendProfile::echo("echo"));
    }
    logging::init_logging(&config.observability.log_level, config.observability.log_format);

    let registry = ProxyRegistry::new();
    registry.sync_profiles(&config)?;

    let name = request
        .proxy
        .unwrap_or_else(|| config.backends[0].name.clone());
    let proxy = registry
        .get(&name)
        .ok_or_else(|| format!("no backend named '{name}' in config"))?;

    for attempt in 1..=request.repeat {
        if request.stream {
            match proxy.stream(&request.prompt, &request.options).await {
                Ok(mut chunks) => {
                    let mut stdout = std::io::stdout();
                    while let Some(chunk) = chunks.next().await {
                        match chunk {
                            Ok(text) => {
                                print!("{text}");
                                stdout.flush()?;
                            }
                            Err(e) => {
                                eprintln!("\n[{attempt}] stream failed: {e}");
                                break;
                            }
                        }
                    }
                    println!();
                }
                Err(e) => print_failure(attempt, &e),
            }
        } else {
            match proxy.invoke(&request.prompt, &request.options).await {
                Ok(text) => println!("{text}"),
                Err(e) => print_failure(attempt, &e),
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&proxy.stats())?);
    registry.clear_all();
    Ok(())
}

fn print_failure(attempt: u32, error: &inference_guard::ProxyError) {
    match error.retry_after() {
        Some(retry_after) => eprintln!(
            "[{attempt}] {error} (retry after {:.1}s)",
            retry_after.as_secs_f64()
        ),
        None => eprintln!("[{attempt}] {error}"),
    }
}

async fn serve(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    logging::init_logging(&config.observability.log_level, config.observability.log_format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backends = config.backends.len(),
        "inference-guard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Arc::new(ProxyRegistry::new());
    let report = registry.sync_profiles(&config)?;
    tracing::info!(proxies = ?report.added, "Proxies ready");

    let live_config = Arc::new(ArcSwap::from_pointee(config.clone()));

    // Dropping the handle stops the watch, so keep it until shutdown.
    let (watcher, mut updates) = ConfigWatcher::new(config_path);
    let _watch_handle = watcher.run()?;
    {
        let registry = registry.clone();
        let live_config = live_config.clone();
        tokio::spawn(async move {
            while let Some(new_config) = updates.recv().await {
                match registry.sync_profiles(&new_config) {
                    Ok(report) => {
                        tracing::info!(
                            added = ?report.added,
                            replaced = ?report.replaced,
                            removed = ?report.removed,
                            "Registry updated from config"
                        );
                        live_config.store(Arc::new(new_config));
                    }
                    Err(e) => tracing::error!(error = %e, "Config reload rejected, keeping current proxies"),
                }
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(registry.clone(), live_config.clone());
        Some(tokio::spawn(serve_admin(listener, state, async move {
            let _ = shutdown_rx.await;
        })))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    if let Some(task) = admin_task {
        if let Err(e) = task.await? {
            tracing::error!(error = %e, "Admin API exited with error");
        }
    }

    registry.clear_all();
    tracing::info!("Shutdown complete");
    Ok(())
}
