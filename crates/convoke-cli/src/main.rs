mod config;
mod demo;
mod http_planner;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use convoke_core::event::EventFn;
use convoke_core::planner::Planner;
use convoke_core::{ExpertRegistry, Orchestrator};

use config::{ConfigFile, ConvokeConfig};
use http_planner::HttpPlanner;

#[derive(Parser)]
#[command(name = "convoke", about = "Multi-agent task orchestrator")]
struct Cli {
    /// Config file path (overrides CONVOKE_CONFIG env var)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// List the registered experts and their capabilities
    Experts,
    /// Process one request through the orchestrator
    Run {
        /// The request text
        request: String,
        /// Override the aggregator language hint (zh or en)
        #[arg(long)]
        language: Option<String>,
        /// Print raw event payloads instead of a summary stream
        #[arg(long)]
        verbose_events: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => cmd_init(cli.config.as_deref(), force),
        Commands::Experts => cmd_experts(),
        Commands::Run {
            request,
            language,
            verbose_events,
        } => cmd_run(cli.config.as_deref(), &request, language, verbose_events).await,
    }
}

fn cmd_init(cli_config: Option<&std::path::Path>, force: bool) -> Result<()> {
    let path = cli_config
        .map(|p| p.to_path_buf())
        .unwrap_or_else(config::config_path);

    if path.exists() && !force {
        bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    config::save_config(&path, &ConfigFile::default())?;
    println!("wrote {}", path.display());
    println!("set CONVOKE_API_KEY to authenticate the planner backend");
    Ok(())
}

fn cmd_experts() -> Result<()> {
    let registry = demo::demo_registry();
    let mut names = registry.list();
    names.sort();

    for name in names {
        let info = registry.get_config(&name).context("expert disappeared")?;
        println!("{name} ({})", info.display_name);
        if !info.description.is_empty() {
            println!("  {}", info.description);
        }
        for capability in &info.capabilities {
            let triggers = info
                .triggers
                .get(capability)
                .map(|t| t.join(", "))
                .unwrap_or_default();
            println!("  capability: {capability} [{triggers}]");
        }
    }
    Ok(())
}

async fn cmd_run(
    cli_config: Option<&std::path::Path>,
    request: &str,
    language: Option<String>,
    verbose_events: bool,
) -> Result<()> {
    let resolved = ConvokeConfig::resolve(cli_config)?;
    let Some(api_key) = resolved.planner_api_key.clone() else {
        bail!("CONVOKE_API_KEY is not set; the planner backend needs an API key");
    };

    let mut engine_config = resolved.engine.clone();
    if let Some(language) = language {
        engine_config.default_language = language;
    }
    engine_config
        .validate()
        .context("invalid orchestrator configuration")?;

    let planner: Arc<dyn Planner> = Arc::new(HttpPlanner::new(
        resolved.planner_base_url.clone(),
        api_key,
        resolved.planner_model.clone(),
    )?);
    let registry: Arc<dyn ExpertRegistry> = Arc::new(demo::demo_registry());
    let orchestrator = Orchestrator::new(registry, planner, engine_config);

    let on_event: EventFn = Arc::new(move |event_type: &str, payload: &str| {
        if verbose_events {
            println!("[{event_type}] {payload}");
            return;
        }
        match event_type {
            "decompose_start" => println!("· planning…"),
            "plan" => {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) {
                    if let Some(analysis) = value.get("analysis").and_then(|a| a.as_str()) {
                        if !analysis.is_empty() {
                            println!("· plan: {analysis}");
                        }
                    }
                }
            }
            "task_start" => println!("· task started: {}", compact(payload, "task_id")),
            "task_end" => println!("· task finished: {}", compact(payload, "task_id")),
            "handoff_start" => println!("· handing off: {}", compact(payload, "to")),
            "handoff_fail" => println!("· handoff failed: {}", compact(payload, "reason")),
            "aggregation_fallback" => println!("· aggregation degraded to concatenation"),
            _ => {}
        }
    });

    // Ctrl-C cancels the run; the orchestrator drains and returns.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let result = orchestrator.process(cancel, request, on_event).await?;

    println!();
    println!("{}", result.final_response);

    if !result.errors.is_empty() {
        println!();
        for error in &result.errors {
            println!("! {error}");
        }
    }

    let usage = result.token_usage;
    if usage.input_tokens + usage.output_tokens > 0 {
        tracing::info!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "planner token usage"
        );
    }

    Ok(())
}

/// Pull one string field out of a JSON payload for compact display.
fn compact(payload: &str, field: &str) -> String {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get(field).and_then(|f| f.as_str()).map(String::from))
        .unwrap_or_else(|| payload.to_string())
}
