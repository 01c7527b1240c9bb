mod backoff;
mod checkpoint;
mod collector;
mod config;
mod derive;
mod error;
mod harvest;
mod models;
mod parser;
mod pipeline;
mod session;
mod tasks;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::HarvestConfig;
use crate::session::chrome::ChromeLauncher;

#[derive(Parser)]
#[command(name = "harvester", about = "Incremental post harvester for rendered social feeds")]
struct Cli {
    /// Configuration file (default: ./harvest.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every task in the task file, then deep-dive each hit
    Search,
    /// Deep-dive the top quote repost of every first-pass artifact, stage by stage
    Stages,
    /// Harvest profile headers and recent posts for every handle in the users file
    Profiles,
    /// Rebuild one stage's deep-dive manifest without harvesting
    Derive {
        /// Stage folder holding first-pass artifacts
        #[arg(short, long)]
        stage: PathBuf,
    },
    /// Show total / completed / pending per search task and stage
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = HarvestConfig::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Search => {
            let launcher = ChromeLauncher::from_config(&cfg);
            pipeline::run_search_pipeline(&cfg, &launcher).await
        }
        Commands::Stages => {
            let launcher = Arc::new(ChromeLauncher::from_config(&cfg));
            pipeline::run_stage_pipeline(&cfg, launcher).await
        }
        Commands::Profiles => {
            let launcher = ChromeLauncher::from_config(&cfg);
            pipeline::run_profile_pipeline(&cfg, &launcher).await
        }
        Commands::Derive { stage } => pipeline::derive_stage(&stage, &cfg).map(|tasks| {
            println!(
                "Derived {} deep-dive tasks for {}",
                tasks.len(),
                stage.display()
            );
        }),
        Commands::Status => pipeline::report_status(&cfg),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
