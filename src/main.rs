use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depsentry::daemon::is_daemon_running;
use depsentry::sync::{DependencyOutcome, RepositoryOutcome};
use depsentry::{Config, Daemon, SqliteStore, SyncEngine};

#[derive(Parser)]
#[command(name = "depsentry")]
#[command(about = "Dependency freshness mirror for organization repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Init {
        /// Organization or account to mirror
        #[arg(short, long)]
        org: String,
    },

    /// Run one synchronization pass
    Sync {
        /// Process every repository regardless of recent activity
        #[arg(long)]
        force: bool,
    },

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },

    /// Show mirrored repositories and their dependency freshness
    Status,
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting DepSentry v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Init { org } => cmd_init(org, &config),
        Commands::Sync { force } => block_on(cmd_sync(force, &config)),
        Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, &config),
        Commands::Status => block_on(cmd_status(&config)),
    }
}

/// Build the async runtime and drive a command to completion. The runtime
/// is created here, after any daemonize fork, so its worker threads belong
/// to the surviving process.
fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::runtime::Runtime::new()
        .context("Failed to create async runtime")?
        .block_on(future)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Write a configuration file with the organization set
fn cmd_init(org: String, config: &Config) -> Result<()> {
    let mut new_config = config.clone();
    new_config.github.org = org;

    let config_path = Config::default_config_path()?;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    new_config.save(&config_path)?;

    println!("✅ DepSentry initialized");
    println!("   Config: {:?}", config_path);
    println!("   Organization: {}", new_config.github.org);
    println!("   Next: set GITHUB_TOKEN and run 'depsentry sync --force'");

    Ok(())
}

/// Run one synchronization pass and print the summary
async fn cmd_sync(force: bool, config: &Config) -> Result<()> {
    config.validate()?;

    let store: Arc<dyn depsentry::Store> = match &config.store.db_path {
        Some(path) => Arc::new(SqliteStore::open_at(PathBuf::from(path))?),
        None => Arc::new(SqliteStore::open_default()?),
    };

    let engine = SyncEngine::new(config.clone(), store)?;

    if force {
        println!("⚡ Forced pass: activity gating bypassed");
    }

    let summary = engine.run_sync(force).await?;

    println!("\n🎉 Sync pass complete!");
    println!("   📊 Repositories listed: {}", summary.repositories_listed);
    println!("   ✅ Processed: {}", summary.repositories_processed);
    println!("   ⏭️  Skipped: {}", summary.repositories_skipped);
    println!("   ❌ Failed: {}", summary.repositories_failed);
    println!(
        "   📦 Dependencies reconciled: {}",
        summary.dependencies_reconciled
    );
    println!(
        "   ⏭️  Dependencies skipped: {}",
        summary.dependencies_skipped
    );
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.repositories_failed > 0 || summary.dependencies_skipped > 0 {
        println!("\n🔍 Problems:");
        for outcome in &summary.outcomes {
            match outcome {
                RepositoryOutcome::Failed { full_name, error } => {
                    println!("   ❌ {}: {}", full_name, error);
                }
                RepositoryOutcome::Processed {
                    full_name,
                    dependencies,
                } => {
                    for dep in dependencies {
                        if let DependencyOutcome::Skipped { name, reason } = dep {
                            println!("   ⏭️  {} / {}: {}", full_name, name, reason);
                        }
                    }
                }
                RepositoryOutcome::Skipped { .. } => {}
            }
        }
    }

    Ok(())
}

/// Handle daemon commands
fn cmd_daemon(daemon_command: DaemonCommands, config: &Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            println!("🚀 Starting DepSentry daemon...");

            if is_daemon_running(config)? {
                println!("⚠️  Daemon is already running!");
                println!("   Use 'depsentry daemon stop' to stop it first");
                return Ok(());
            }

            if foreground {
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
            } else {
                #[cfg(unix)]
                {
                    // Fork first: the runtime and the database handle are
                    // created below, in the surviving child.
                    depsentry::daemon::daemonize(config)?;
                }

                #[cfg(not(unix))]
                {
                    println!("❌ Background daemon mode not supported on this platform");
                    println!("   Use --foreground to run in foreground mode");
                    return Ok(());
                }
            }

            let mut daemon = Daemon::new(config.clone())?;
            block_on(async move { daemon.run().await })?;
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping DepSentry daemon...");

            if !is_daemon_running(config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            let daemon = Daemon::new(config.clone())?;
            daemon.stop()?;

            println!("✅ Daemon stop signal sent");
        }

        DaemonCommands::Status => {
            println!("📊 DepSentry Daemon Status");

            if is_daemon_running(config)? {
                println!("   🟢 Status: Running");
                println!("   🔄 Sync interval: {}", config.daemon.interval);
                println!("   🕐 Lookback window: {}", config.sync.lookback);
                if !config.daemon.log_file.is_empty() {
                    println!("   📄 Log file: {}", config.daemon.log_file);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'depsentry daemon start' to start the daemon");
            }
        }
    }

    Ok(())
}

/// Print mirrored repositories and their dependency freshness
async fn cmd_status(config: &Config) -> Result<()> {
    let store = match &config.store.db_path {
        Some(path) => SqliteStore::open_at(PathBuf::from(path))?,
        None => SqliteStore::open_default()?,
    };

    let repositories = depsentry::Store::repositories(&store).await?;

    if repositories.is_empty() {
        println!("No repositories mirrored yet. Run 'depsentry sync --force' first.");
        return Ok(());
    }

    println!("Repositories ({}):", repositories.len());

    for repo in repositories {
        println!("📁 {}", repo.full_name);
        if let Some(language) = &repo.language {
            println!("   🔤 {}", language);
        }

        let dependencies = depsentry::Store::dependencies_for(&store, repo.id).await?;
        for dep in dependencies {
            let marker = if dep.outdated { "⚠️ " } else { "✅" };
            println!(
                "   {} {} {} (latest: {})",
                marker,
                dep.name,
                dep.current_version,
                dep.latest_version.as_deref().unwrap_or("unknown")
            );
        }
    }

    Ok(())
}
