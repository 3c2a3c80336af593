//! ghost-migrate CLI - online schema evolution with ghost tables.

use clap::{Parser, Subcommand};
use ghost_migrate::config::StateBackendKind;
use ghost_migrate::{
    ChangelogDefinition, Config, FileStateBackend, LoggingStepRunner, MigrateError, Migrator,
    NoOpStateBackend, SchemaDefinition, StateBackend, DEFAULT_CONFIG_PATH,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "ghost-migrate")]
#[command(about = "Online schema evolution with ghost tables")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Path to the state file (overrides state.path)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a schema
    Init {
        /// YAML schema definition
        #[arg(long)]
        schema: PathBuf,
    },

    /// Show active versions and the tables backing them
    Status,

    /// List change sets and their versions
    Changelog,

    /// Append the change sets of a file to the changelog
    Add {
        /// YAML changeset file
        file: PathBuf,
    },

    /// Show the migration plan to a version without running it
    Plan {
        /// Target version or change set id
        to: String,

        /// Source version [default: newest active version]
        #[arg(long)]
        from: Option<String>,
    },

    /// Fork to a version, populating its ghost tables
    Fork {
        /// Target version or change set id
        to: String,

        /// Source version [default: newest active version]
        #[arg(long)]
        from: Option<String>,

        /// Dry run: show the plan without migrating
        #[arg(long)]
        dry_run: bool,
    },

    /// Drop a version and the tables only it uses
    Drop {
        /// Version to drop
        version: String,
    },

    /// Rename ghost tables back to their logical names
    Cleanup {
        /// Dry run: show the plan without migrating
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Serialize)]
struct StatusReport {
    root: String,
    tip: String,
    active_versions: Vec<String>,
    /// Logical table name to physical id, per active version.
    tables: BTreeMap<String, BTreeMap<String, String>>,
    syncs: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    let backend = make_backend(&config, cli.state_file.clone());
    let config = config.with_auto_tuning();

    match cli.command {
        Commands::Init { schema } => {
            let catalog = SchemaDefinition::load(&schema)?.to_catalog()?;
            let migrator = Migrator::init(config, backend, catalog).await?;
            let root = &migrator.state().changelog.root().id;
            if cli.output_json {
                println!("{}", serde_json::json!({ "root": root }));
            } else {
                println!("Initialized schema tracking at root version {}", root);
            }
        }

        Commands::Status => {
            let migrator = Migrator::open(config, backend).await?;
            let state = migrator.state();
            let mut tables = BTreeMap::new();
            for version in state.ref_log.active_versions() {
                let refs = state
                    .ref_log
                    .table_refs(version)
                    .into_iter()
                    .map(|table_ref| (table_ref.name.clone(), table_ref.table_id.clone()))
                    .collect();
                tables.insert(version.clone(), refs);
            }
            let report = StatusReport {
                root: state.changelog.root().id.clone(),
                tip: state.changelog.tip().id.clone(),
                active_versions: state.ref_log.active_versions().iter().cloned().collect(),
                tables,
                syncs: state.ref_log.syncs().count(),
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Root version: {}", report.root);
                println!("Tip version: {}", report.tip);
                println!("Syncs: {}", report.syncs);
                for (version, refs) in &report.tables {
                    println!("\nActive version {}:", version);
                    for (name, table_id) in refs {
                        if name == table_id {
                            println!("  {}", name);
                        } else {
                            println!("  {} -> {}", name, table_id);
                        }
                    }
                }
            }
        }

        Commands::Changelog => {
            let migrator = Migrator::open(config, backend).await?;
            let changelog = &migrator.state().changelog;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(changelog)?);
            } else {
                println!("Root version: {}", changelog.root().id);
                for change_set in changelog.change_sets() {
                    println!(
                        "\n{} by {} at {}",
                        change_set.id,
                        change_set.author,
                        change_set.created.format("%Y-%m-%d %H:%M:%S")
                    );
                    if let Some(description) = &change_set.description {
                        println!("  {}", description);
                    }
                    for id in &change_set.versions {
                        let version = changelog.version(id)?;
                        match &version.operation {
                            Some(operation) => println!("  {}: {}", id, operation),
                            None => println!("  {}", id),
                        }
                    }
                }
            }
        }

        Commands::Add { file } => {
            let definition = ChangelogDefinition::load(&file)?;
            let mut migrator = Migrator::open(config, backend).await?;
            let imported = definition.import_into(&mut migrator.state_mut().changelog)?;
            migrator.persist().await?;

            if cli.output_json {
                println!("{}", serde_json::json!({ "imported": imported }));
            } else if imported.is_empty() {
                println!("No new change sets in {:?}", file);
            } else {
                println!("Added {} change sets:", imported.len());
                for id in &imported {
                    println!("  {}", id);
                }
            }
        }

        Commands::Plan { to, from } => {
            let mut migrator = Migrator::open(config, backend).await?;
            let (from, to) = resolve_fork(&migrator, from, &to)?;
            let plan = migrator.plan(&from, &to)?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("Plan from {} to {}:", from, to);
                print!("{}", plan);
            }
        }

        Commands::Fork { to, from, dry_run } => {
            let mut migrator = Migrator::open(config, backend).await?;
            let (from, to) = resolve_fork(&migrator, from, &to)?;

            if dry_run {
                let plan = migrator.plan(&from, &to)?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("Dry run: plan from {} to {}:", from, to);
                    print!("{}", plan);
                }
                return Ok(());
            }

            let cancel_token = setup_signal_handler().await?;
            let result = migrator
                .migrate(&from, &to, Arc::new(LoggingStepRunner::new()), cancel_token)
                .await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nFork completed!");
                println!("  From: {}", result.from);
                println!("  To: {}", result.to);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Ghost tables: {}", result.ghost_tables.len());
                println!("  Steps: {}", result.steps_executed);
                println!("  Data operations: {}", result.data_operations);
                println!("  Syncs: {}", result.syncs_created.len());
                println!("  Active versions: {:?}", result.active_versions);
            }
        }

        Commands::Drop { version } => {
            let mut migrator = Migrator::open(config, backend).await?;
            let result = migrator.drop(&version).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("Dropped version {}", result.version);
                if !result.dropped_tables.is_empty() {
                    println!("  Tables to drop: {}", result.dropped_tables.join(", "));
                }
                println!("  Syncs dropped: {}", result.syncs_dropped.len());
                println!("  Syncs created: {}", result.syncs_created.len());
                println!("  Active versions: {:?}", result.active_versions);
            }
        }

        Commands::Cleanup { dry_run } => {
            let mut migrator = Migrator::open(config, backend).await?;

            if dry_run {
                let (from, to) = migrator.prepare_cleanup()?;
                let plan = migrator.plan(&from, &to)?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("Dry run: cleanup plan from {} to {}:", from, to);
                    print!("{}", plan);
                }
                return Ok(());
            }

            let cancel_token = setup_signal_handler().await?;
            let result = migrator
                .cleanup(Arc::new(LoggingStepRunner::new()), cancel_token)
                .await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nCleanup completed!");
                println!("  Version: {}", result.to);
                println!("  Tables renamed: {}", result.ghost_tables.len());
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!(
                    "  Drop version {} once no client uses it",
                    result.from
                );
            }
        }
    }

    Ok(())
}

/// The state file is signed with the hash of the config as loaded, so a
/// `--state-file` override does not change the key.
fn make_backend(config: &Config, state_file: Option<PathBuf>) -> Arc<dyn StateBackend> {
    match config.state.backend {
        StateBackendKind::File => {
            let path = state_file.unwrap_or_else(|| PathBuf::from(&config.state.path));
            Arc::new(FileStateBackend::new(path, config.hash()))
        }
        StateBackendKind::Noop => {
            if state_file.is_some() {
                warn!("--state-file is ignored by the noop state backend");
            }
            Arc::new(NoOpStateBackend::new())
        }
    }
}

/// Resolve the source and target of a fork. The target may name a change
/// set, which stands for its last version. The source defaults to the
/// newest active version.
fn resolve_fork(
    migrator: &Migrator,
    from: Option<String>,
    to: &str,
) -> Result<(String, String), MigrateError> {
    let state = migrator.state();
    let to = match state.changelog.change_set(to) {
        Some(change_set) if !state.changelog.contains_version(to) => change_set
            .last_version()
            .map(str::to_string)
            .ok_or_else(|| MigrateError::NoSuchVersion(to.to_string()))?,
        _ => state.changelog.version(to)?.id.clone(),
    };

    let from = match from {
        Some(from) => state.changelog.version(&from)?.id.clone(),
        None => state
            .ref_log
            .active_versions()
            .iter()
            .filter_map(|version| {
                state
                    .changelog
                    .position(version)
                    .ok()
                    .map(|position| (position, version))
            })
            .max()
            .map(|(_, version)| version.clone())
            .ok_or_else(|| MigrateError::IllegalState("No version is active".to_string()))?,
    };
    Ok((from, to))
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Waiting for running steps to finish...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Waiting for running steps to finish...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only SIGINT/Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Waiting for running steps to finish...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
