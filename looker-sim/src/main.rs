use anyhow::{Context, Result};
use clap::Parser;
use looker_client::EngineConfig;
use looker_sim::args::Args;
use looker_sim::{run, SimulationOptions};
use tracing::{info, warn};

fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "looker_sim={},looker_client=info,looker_cache=info",
                    log_level
                )
                .into()
            }),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))
        }
        None => {
            let config = EngineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    info!("Starting looker-sim {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    info!(
        max_hidden_items = config.instance_cache.max_hidden_items,
        chunk_size = config.frame_stream.chunk_size,
        num_workers = config.label_rendering.num_workers,
        "Engine configured"
    );

    let report = run(
        &config,
        SimulationOptions {
            samples: args.samples,
            frames: args.frames,
            jobs: args.jobs,
        },
    )
    .await?;

    if !report.video.errors.is_empty() {
        warn!(errors = report.video.errors.len(), "Playback reported errors");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
