//! Event store migration CLI
//!
//! CLI tool for migrating legacy commit-oriented event stores.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use eventstore_migrate::connectors::create_store;
use eventstore_migrate::{
    ArtifactsMap, LogProgressSink, MigrationConfig, MigratorBuilder, ProgressSink,
    TerminalProgressSink,
};

#[derive(Parser)]
#[command(name = "eventstore-migrate")]
#[command(version)]
#[command(about = "Migrate commit-oriented legacy event stores to per-event versioned event stores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dry run mode (commit into memory instead of the runtime)
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Batch size override
    #[arg(long)]
    batch_size: Option<usize>,

    /// Show progress next to a spinner instead of logging it
    #[arg(long)]
    progress_bar: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run migration from config file
    Run {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Count commits and events in every configured event store
    Count {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Generate example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "migration.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let overrides = Overrides {
        dry_run: cli.dry_run,
        batch_size: cli.batch_size,
        progress_bar: cli.progress_bar,
    };

    match cli.command {
        Some(Commands::Run { config }) => {
            run_migration(&config, &overrides).await?;
        }
        Some(Commands::Validate { config }) => {
            validate_config(&config)?;
        }
        Some(Commands::Count { config }) => {
            count_commits(&config).await?;
        }
        Some(Commands::Init { output }) => {
            generate_config(&output)?;
        }
        None => {
            // Default: run migration if config provided
            if let Some(config) = cli.config {
                run_migration(&config, &overrides).await?;
            } else {
                eprintln!("Usage: eventstore-migrate --config <FILE> or eventstore-migrate <COMMAND>");
                eprintln!("Try 'eventstore-migrate --help' for more information.");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

struct Overrides {
    dry_run: bool,
    batch_size: Option<usize>,
    progress_bar: bool,
}

fn load_config(config_path: &Path, overrides: &Overrides) -> anyhow::Result<MigrationConfig> {
    info!("Loading configuration from {:?}", config_path);

    let mut config = MigrationConfig::from_file(config_path)?;

    if overrides.dry_run {
        config.options.dry_run = true;
    }

    if let Some(bs) = overrides.batch_size {
        config.options.batch_size = bs;
    }

    config.validate()?;
    Ok(config)
}

fn load_artifacts(config: &MigrationConfig) -> anyhow::Result<ArtifactsMap> {
    match &config.artifacts {
        Some(path) => {
            info!("Loading artifacts from {:?}", path);
            Ok(ArtifactsMap::from_file(path)?)
        }
        None => Ok(ArtifactsMap::empty()),
    }
}

async fn run_migration(config_path: &Path, overrides: &Overrides) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let artifacts = load_artifacts(&config)?;

    let progress: Arc<dyn ProgressSink> = if overrides.progress_bar {
        Arc::new(TerminalProgressSink::new())
    } else {
        Arc::new(LogProgressSink)
    };

    let migrator = MigratorBuilder::from_config(&config, artifacts)?
        .with_progress_sink(progress)
        .build()?;

    let stats = migrator.run().await?;

    println!("\n✅ Migration Complete!");
    println!("   Event stores:     {}", stats.sources);
    println!("   Commits:          {}", stats.commits);
    println!("   Commits skipped:  {}", stats.commits_skipped);
    println!("   Events read:      {}", stats.events_read);
    println!("   Events committed: {}", stats.events_committed);
    println!("   Events skipped:   {}", stats.events_skipped);
    println!("   Duration:         {:.2}s", stats.duration_secs);
    println!("   Throughput:       {:.0} events/sec", stats.throughput());
    if config.options.dry_run {
        println!("   (dry run, nothing was written to the runtime)");
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> anyhow::Result<()> {
    info!("Validating configuration from {:?}", config_path);

    let config = MigrationConfig::from_file(config_path)?;
    config.validate()?;
    let artifacts = load_artifacts(&config)?;

    println!("✅ Configuration is valid!");
    println!("   Microservice: {}", config.microservice);
    println!("   Sources:      {}", config.sources.len());
    println!("   Event stores: {}", config.event_store_count());
    println!(
        "   Destination:  {}:{}",
        config.destination.host, config.destination.port
    );
    println!("   Features:     {}", artifacts.features().len());

    Ok(())
}

async fn count_commits(config_path: &Path) -> anyhow::Result<()> {
    let config = MigrationConfig::from_file(config_path)?;
    config.validate()?;

    println!("\n📊 Legacy Event Stores:");
    for source in &config.sources {
        let store = create_store(&source.store)?;
        for event_store in &source.event_stores {
            store.connect(&event_store.name).await?;
            let totals = store.count_commits_and_events(&event_store.name).await?;
            println!(
                "   {} (tenant {}): {} commits, {} events",
                event_store.name, event_store.tenant, totals.commits, totals.events
            );
        }
    }

    Ok(())
}

fn generate_config(output: &Path) -> anyhow::Result<()> {
    std::fs::write(output, CONFIG_TEMPLATE)?;
    println!("✅ Generated configuration: {:?}", output);
    println!(
        "   Edit the file and run: eventstore-migrate run --config {:?}",
        output
    );

    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# Event store migration configuration
# Microservice the migrated events are committed on behalf of
microservice: 00000000-0000-0000-0000-000000000000

sources:
  - store:
      type: mongodb
      data_api_url: https://data.mongodb-api.com/app/YOUR_APP_ID/endpoint/data/v1
      api_key: YOUR_API_KEY
      data_source: mongodb-atlas
      collection: commits
    event_stores:
      # One entry per tenant; a tenant may only appear once
      - name: event_store
        tenant: 00000000-0000-0000-0000-000000000000

destination:
  host: localhost
  port: 50053

# Artifact catalog used to resolve event type names (optional)
# artifacts: ./artifacts.json

options:
  batch_size: 1000
  progress_interval_secs: 10
  environment: Production
  max_retries: 3
  dry_run: false
"#;
