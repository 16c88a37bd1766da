//! Daemon Infrastructure - recurring synchronization passes
//!
//! Runs one pass at process start (forced full refresh by default), then
//! one pass per configured interval. Handles PID file management and
//! graceful shutdown. Passes are not mutually exclusive if one overruns
//! the interval; every reconciliation is idempotent, so the next pass is
//! the retry mechanism.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::store::SqliteStore;
use crate::sync::{PassSummary, SyncEngine};

/// Daemon state and control
pub struct Daemon {
    config: Arc<Config>,
    sync_engine: SyncEngine,
    shutdown_sender: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    pid_file_path: Option<PathBuf>,
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn crate::store::Store> = match &config.store.db_path {
            Some(path) => Arc::new(SqliteStore::open_at(PathBuf::from(path))?),
            None => Arc::new(SqliteStore::open_default()?),
        };

        let sync_engine = SyncEngine::new(config.clone(), store)
            .context("Failed to create sync engine for daemon")?;

        let (shutdown_sender, _) = broadcast::channel(1);
        let is_running = Arc::new(AtomicBool::new(false));

        let pid_file_path = if !config.daemon.pid_file.is_empty() {
            Some(PathBuf::from(&config.daemon.pid_file))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            sync_engine,
            shutdown_sender,
            is_running,
            pid_file_path,
        })
    }

    /// Start the daemon in the foreground
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting DepSentry daemon");

        self.write_pid_file().context("Failed to write PID file")?;
        self.is_running.store(true, Ordering::SeqCst);

        // A daily cadence with an hourly lookback would silently miss most
        // commit activity between passes; surface the mismatch up front.
        let interval_duration = self.config.interval_duration()?;
        let lookback_duration = self.config.lookback_duration()?;
        if interval_duration > lookback_duration {
            warn!(
                "Sync interval ({}) exceeds the activity lookback window ({}); \
                 commits landing between passes will not trigger processing",
                self.config.daemon.interval, self.config.sync.lookback
            );
        }

        let shutdown_receiver = self.shutdown_sender.subscribe();
        let is_running = self.is_running.clone();

        // Spawn shutdown signal handler
        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("Shutdown signal received, stopping daemon...");
            is_running.store(false, Ordering::SeqCst);
            let _ = shutdown_sender.send(());
        });

        let result = self.daemon_loop(shutdown_receiver, interval_duration).await;

        self.cleanup().context("Failed to cleanup daemon")?;

        result
    }

    /// Stop a running daemon by sending a shutdown signal
    pub fn stop(&self) -> Result<()> {
        info!("Sending shutdown signal to daemon");

        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                let pid_str = fs::read_to_string(pid_file).context("Failed to read PID file")?;

                let pid: u32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

                #[cfg(unix)]
                {
                    use nix::sys::signal::{self, Signal};
                    use nix::unistd::Pid;

                    let pid = Pid::from_raw(pid as i32);
                    signal::kill(pid, Signal::SIGTERM)
                        .context("Failed to send SIGTERM to daemon process")?;
                }

                #[cfg(not(unix))]
                {
                    warn!("Daemon stop not implemented for this platform");
                }

                info!("Shutdown signal sent to daemon process {}", pid);
            } else {
                warn!("PID file not found, daemon may not be running");
            }
        } else {
            warn!("No PID file configured, cannot stop daemon");
        }

        Ok(())
    }

    /// Main daemon loop: one pass at start, then one per interval.
    async fn daemon_loop(
        &self,
        mut shutdown_receiver: broadcast::Receiver<()>,
        sync_interval: Duration,
    ) -> Result<()> {
        let mut interval_timer = interval(sync_interval);

        info!("Daemon loop started with interval: {:?}", sync_interval);

        // The first tick fires immediately: this is the startup pass, which
        // forces a full refresh when configured to.
        let mut first_pass = true;

        loop {
            tokio::select! {
                // Shutdown signal received
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received in daemon loop");
                    break;
                }

                // Sync interval elapsed
                _ = interval_timer.tick() => {
                    if !self.is_running.load(Ordering::SeqCst) {
                        break;
                    }

                    let force = first_pass && self.config.sync.force_on_start;
                    first_pass = false;

                    debug!("Starting scheduled sync pass (force: {})", force);

                    match self.sync_engine.run_sync(force).await {
                        Ok(summary) => {
                            self.log_pass_success(&summary);
                        }
                        Err(e) => {
                            error!("Sync pass failed: {:?}", e);
                        }
                    }
                }
            }
        }

        info!("Daemon loop exiting");
        Ok(())
    }

    /// Wait for shutdown signals (Ctrl+C / SIGINT)
    async fn wait_for_shutdown_signal() {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        debug!("Ctrl+C received");
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file and perform cleanup
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Daemon cleanup completed");
        Ok(())
    }

    /// Log a completed sync pass
    fn log_pass_success(&self, summary: &PassSummary) {
        info!(
            "Pass completed in {:.2}s: {} listed, {} processed, {} skipped, {} failed, {} deps reconciled, {} deps skipped",
            summary.duration.as_secs_f64(),
            summary.repositories_listed,
            summary.repositories_processed,
            summary.repositories_skipped,
            summary.repositories_failed,
            summary.dependencies_reconciled,
            summary.dependencies_skipped,
        );
    }
}

/// Fork into the background, redirecting output to the configured log
/// file. Must run before the async runtime and the database handle are
/// created; neither survives a fork intact, so both are built afterwards
/// in the surviving child.
#[cfg(unix)]
pub fn daemonize(config: &Config) -> Result<()> {
    use daemonize::Daemonize;

    let mut daemonize = Daemonize::new();

    if !config.daemon.log_file.is_empty() {
        if let Some(parent) = std::path::Path::new(&config.daemon.log_file).parent() {
            fs::create_dir_all(parent).context("Failed to create log file directory")?;
        }
        let log_file = std::fs::File::create(&config.daemon.log_file)
            .context("Failed to create log file")?;
        daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
    }

    daemonize.start().context("Failed to daemonize process")?;

    info!("DepSentry daemon started as background service");
    Ok(())
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    if !config.daemon.pid_file.is_empty() {
        let pid_file = PathBuf::from(&config.daemon.pid_file);

        if pid_file.exists() {
            let pid_str = fs::read_to_string(&pid_file).context("Failed to read PID file")?;

            let pid: u32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

            // Check if process is actually running
            #[cfg(unix)]
            {
                use nix::errno::Errno;
                use nix::sys::signal;
                use nix::unistd::Pid;

                let pid = Pid::from_raw(pid as i32);
                match signal::kill(pid, None) {
                    Ok(_) => return Ok(true), // Process exists
                    Err(Errno::ESRCH) => {
                        // Process doesn't exist, remove stale PID file
                        let _ = fs::remove_file(&pid_file);
                        return Ok(false);
                    }
                    Err(_) => return Ok(true), // Assume running if we can't check
                }
            }

            #[cfg(not(unix))]
            {
                // On non-Unix platforms, just check if PID file exists
                return Ok(true);
            }
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.github.org = "acme".to_string();
        config.daemon.pid_file = dir.join("test.pid").to_string_lossy().to_string();
        config.store.db_path = Some(dir.join("state.db").to_string_lossy().to_string());
        config
    }

    #[test]
    fn test_daemon_creation() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path());

        let daemon = Daemon::new(config).unwrap();
        assert!(!daemon.is_running.load(Ordering::SeqCst));
        assert!(daemon.pid_file_path.is_some());
    }

    #[test]
    fn test_daemon_creation_requires_org() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.github.org = String::new();

        assert!(Daemon::new(config).is_err());
    }

    #[test]
    fn test_is_daemon_running_without_pid_file() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path());

        let is_running = is_daemon_running(&config).unwrap();
        assert!(!is_running);
    }

    #[test]
    fn test_pid_file_write_and_cleanup() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path());
        let pid_path = PathBuf::from(&config.daemon.pid_file);

        let daemon = Daemon::new(config).unwrap();

        daemon.write_pid_file().unwrap();
        assert!(pid_path.exists());

        let written = fs::read_to_string(&pid_path).unwrap();
        assert_eq!(written, std::process::id().to_string());

        daemon.cleanup().unwrap();
        assert!(!pid_path.exists());
    }
}
