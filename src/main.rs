use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use nsdrain::{
    cloning::{CloneSettings, clone_namespace},
    config::AppConfig,
    inventory::{filter_containing, list_namespaces, storage_report, write_namespace_file},
    observability::{init_tracing, metrics},
    purge::{CheckpointFile, DriverExit, PurgeDriver},
    store::{Datastore, Key, create_store},
};

const DEFAULT_CONFIG_PATH: &str = "nsdrain.toml";

/// CLI arguments for nsdrain
#[derive(Parser, Debug)]
#[command(version, about = "Bulk namespace purge and clone for Cloud Datastore", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./nsdrain.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Purge every namespace listed in the checkpoint file
    Purge {
        /// Run a single pass over the checkpoint
        #[arg(long)]
        once: bool,
        /// Count records without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Copy all kinds of one namespace into another
    Clone {
        #[arg(long)]
        source_namespace: String,
        #[arg(long)]
        dest_namespace: String,
    },
    /// Write every namespace of the project to a file, one per line
    ListNamespaces {
        #[arg(short, long, default_value = "todos.txt")]
        output: PathBuf,
        /// Keep only namespaces containing this text (case-insensitive)
        #[arg(long)]
        contains: Option<String>,
    },
    /// Sum the storage used by the namespaces listed in a file
    StorageReport {
        #[arg(short, long)]
        file: PathBuf,
        /// Namespaces queried concurrently
        #[arg(long, default_value = "100")]
        concurrency: usize,
    },
    /// Print one entity as JSON
    Get {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        kind: String,
        #[arg(long, conflicts_with = "name", required_unless_present = "name")]
        id: Option<i64>,
        #[arg(long)]
        name: Option<String>,
    },
}

fn exit_with(message: impl std::fmt::Display) -> ! {
    tracing::error!("{}", message);
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn load_config(explicit_path: Option<&Path>) -> AppConfig {
    let path = match explicit_path {
        Some(path) => path.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => PathBuf::from(DEFAULT_CONFIG_PATH),
        None => return AppConfig::default(),
    };

    match AppConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref());

    if let Command::Purge { once, dry_run } = &args.command {
        if *once {
            config.purge.max_passes = 1;
        }
        if *dry_run {
            config.purge.safety.dry_run = true;
        }
    }

    if let Err(e) = init_tracing(&config.observability.logging) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = metrics::init_metrics(&config.observability.metrics) {
        exit_with(format!("Failed to initialize metrics: {e}"));
    }

    if matches!(args.command, Command::Purge { .. } | Command::Clone { .. })
        && let Err(e) = config.require_store_data()
    {
        exit_with(e);
    }

    tracing::info!(store = %config.store.describe(), "Connecting to store");
    let store = match create_store(&config.store).await {
        Ok(store) => store,
        Err(e) => exit_with(format!("Failed to create store client: {e}")),
    };

    match args.command {
        Command::Purge { .. } => run_purge(store, config).await,
        Command::Clone {
            source_namespace,
            dest_namespace,
        } => run_clone(store, &config, &source_namespace, &dest_namespace).await,
        Command::ListNamespaces { output, contains } => {
            run_list_namespaces(store, &output, contains.as_deref()).await
        }
        Command::StorageReport { file, concurrency } => {
            run_storage_report(store, &file, concurrency).await
        }
        Command::Get {
            namespace,
            kind,
            id,
            name,
        } => {
            let key = match (id, name) {
                (Some(id), _) => Key::id(kind, namespace, id),
                (None, Some(name)) => Key::name(kind, namespace, name),
                (None, None) => exit_with("either --id or --name is required"),
            };
            run_get(store, &key).await
        }
    }
}

async fn run_purge(store: Arc<dyn Datastore>, config: AppConfig) {
    let driver = PurgeDriver::new(store, config.purge);
    match driver.run().await {
        Ok(DriverExit::Completed { passes }) => {
            tracing::info!(passes = passes, "Purge complete, checkpoint is empty");
        }
        Ok(DriverExit::PassesExhausted { passes, remaining }) => {
            tracing::warn!(
                passes = passes,
                remaining = remaining,
                "Pass limit reached with namespaces still pending"
            );
        }
        Err(e) => exit_with(format!("Purge failed: {e}")),
    }
}

async fn run_clone(
    source: Arc<dyn Datastore>,
    config: &AppConfig,
    source_namespace: &str,
    dest_namespace: &str,
) {
    let destination = match &config.clone.destination {
        Some(destination) => {
            tracing::info!(destination = %destination.describe(), "Connecting to clone destination");
            match create_store(destination).await {
                Ok(store) => store,
                Err(e) => exit_with(format!("Failed to create destination store client: {e}")),
            }
        }
        None => {
            tracing::info!("No clone destination configured, cloning within the source store");
            source.clone()
        }
    };

    let settings = CloneSettings::from_config(&config.clone);
    match clone_namespace(source, destination, source_namespace, dest_namespace, &settings).await {
        Ok(report) if report.is_complete() => {
            println!("Cloned {} records", report.total());
        }
        Ok(report) => {
            for (kind, error) in &report.failed {
                eprintln!("  {kind}: {error}");
            }
            exit_with(format!(
                "Cloned {} records, {} kinds failed",
                report.total(),
                report.failed.len()
            ));
        }
        Err(e) => exit_with(format!("Clone failed: {e}")),
    }
}

async fn run_list_namespaces(store: Arc<dyn Datastore>, output: &Path, contains: Option<&str>) {
    let namespaces = match list_namespaces(&store).await {
        Ok(namespaces) => namespaces,
        Err(e) => exit_with(format!("Failed to list namespaces: {e}")),
    };
    let namespaces = match contains {
        Some(needle) => filter_containing(namespaces, needle),
        None => namespaces,
    };

    if let Err(e) = write_namespace_file(output, &namespaces).await {
        exit_with(format!("Failed to write {}: {e}", output.display()));
    }
    println!("Wrote {} namespaces to {}", namespaces.len(), output.display());
}

async fn run_storage_report(store: Arc<dyn Datastore>, file: &Path, concurrency: usize) {
    let namespaces = match CheckpointFile::new(file).load().await {
        Ok(namespaces) => namespaces,
        Err(e) => exit_with(e),
    };

    let report = storage_report(store, namespaces, concurrency).await;
    println!(
        "Total storage: {:.2} GiB across {} namespaces ({} failed)",
        report.total_gib(),
        report.namespaces.len(),
        report.failures.len()
    );
}

async fn run_get(store: Arc<dyn Datastore>, key: &Key) {
    match store.lookup(key).await {
        Ok(Some(entity)) => match serde_json::to_string_pretty(&entity) {
            Ok(json) => println!("{json}"),
            Err(e) => exit_with(format!("Failed to serialize entity: {e}")),
        },
        Ok(None) => exit_with(format!("Entity not found: {key}")),
        Err(e) => exit_with(format!("Lookup failed: {e}")),
    }
}
