use assetgate::config::{ConfigStore, PublishConfig, RootOverrides};
use assetgate::publish::{PublishManager, ReadyStatus};
use assetgate::registry::AssetRegistry;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "assetgate")]
#[command(about = "Diagnostics for the asset publish pipeline")]
#[command(long_about = "\
Diagnostics for the asset publish pipeline

Publishing depends on three detected roots:

  project root   the web project (detected from markers like .git,
                 package.json; override with --project-root)
  publish root   where published files land (<project>/public/gen by
                 convention; override with --publish-root)
  output root    the rendering engine's output directory (persisted via
                 'set-output-root'; override with --output-root)

'info' shows every root, how it was detected, and every output-root
candidate that was tried. 'check' answers whether a publish would work
right now. 'set-output-root' validates a directory and persists it.")]
#[command(version)]
struct Cli {
    /// Override project-root detection
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Override the publish root
    #[arg(long, global = true)]
    publish_root: Option<PathBuf>,

    /// Override output-root detection
    #[arg(long, global = true)]
    output_root: Option<PathBuf>,

    /// Config file location (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print detected roots, detection methods, and tried candidates
    Info,
    /// Check whether a publish would succeed right now
    Check,
    /// Validate an engine output directory and persist it
    SetOutputRoot {
        /// The rendering engine's output directory
        path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = match &cli.config {
        Some(path) => ConfigStore::at(path),
        None => ConfigStore::default_location()?,
    };
    let config = PublishConfig::detect(
        RootOverrides {
            project_root: cli.project_root.clone(),
            publish_root: cli.publish_root.clone(),
            output_root: cli.output_root.clone(),
        },
        store,
    )?;
    let manager = PublishManager::new(config, Arc::new(AssetRegistry::new()));

    match cli.command {
        Command::Info => {
            let info = manager.publish_info();
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Check => {
            let status = manager.ensure_ready();
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !matches!(status, ReadyStatus::Ready { .. }) {
                std::process::exit(1);
            }
        }
        Command::SetOutputRoot { path } => {
            let outcome = manager.set_output_root(&path)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}
