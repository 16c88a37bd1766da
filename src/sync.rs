//! Sync Engine - reconciles remote repositories and dependencies into the store
//!
//! One pass: list the organization's repositories, then for each one gate
//! on recent commit activity (unless forced), upsert the repository record,
//! parse its manifest, and reconcile every declared dependency against the
//! registry's latest release. Failures are isolated per repository and per
//! dependency; only a failed listing aborts the pass.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SyncError;
use crate::github::{HostingClient, RemoteRepository};
use crate::manifest::{self, MANIFEST_PATH};
use crate::registry::RegistryClient;
use crate::store::{NewDependency, NewRepository, Store};

/// Why a repository was passed over without manifest work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Name matched a configured exclusion pattern
    Excluded,
    /// No qualifying commits inside the lookback window
    NoRecentActivity,
    /// The commit-activity probe itself failed (fail-closed)
    ActivityCheckFailed(String),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Excluded => "excluded",
            SkipReason::NoRecentActivity => "no recent activity",
            SkipReason::ActivityCheckFailed(_) => "activity check failed",
        }
    }
}

/// Whether a reconciliation created or refreshed a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
}

/// Outcome for one dependency unit of work
#[derive(Debug, Clone)]
pub enum DependencyOutcome {
    /// Stored state now matches observed data
    Reconciled {
        name: String,
        action: ReconcileAction,
        outdated: bool,
    },
    /// Not reconciled this pass (resolution or store failure)
    Skipped { name: String, reason: String },
}

/// Outcome for one repository
#[derive(Debug, Clone)]
pub enum RepositoryOutcome {
    /// Repository record upserted; dependency outcomes attached
    Processed {
        full_name: String,
        dependencies: Vec<DependencyOutcome>,
    },
    /// Passed over before any store write
    Skipped {
        full_name: String,
        reason: SkipReason,
    },
    /// Repository-level failure; dependency processing abandoned
    Failed { full_name: String, error: String },
}

/// Results from one complete sync pass
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub repositories_listed: usize,
    pub repositories_processed: usize,
    pub repositories_skipped: usize,
    pub repositories_failed: usize,
    pub dependencies_reconciled: usize,
    pub dependencies_skipped: usize,
    pub duration: Duration,
    pub outcomes: Vec<RepositoryOutcome>,
}

/// The sync engine: drives one pass across all listed repositories.
#[derive(Clone)]
pub struct SyncEngine {
    config: Arc<Config>,
    hosting: HostingClient,
    registry: RegistryClient,
    store: Arc<dyn Store>,
}

impl SyncEngine {
    /// Create an engine from configuration and a store handle.
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        let hosting = HostingClient::new(&config).context("Failed to create hosting client")?;
        let registry = RegistryClient::new(&config).context("Failed to create registry client")?;

        Ok(Self {
            config: Arc::new(config),
            hosting,
            registry,
            store,
        })
    }

    /// Run one synchronization pass.
    ///
    /// `force` bypasses the activity gate and fully processes every listed
    /// repository. Only a failed listing surfaces as an error; every other
    /// failure is contained in the returned summary.
    pub async fn run_sync(&self, force: bool) -> Result<PassSummary, SyncError> {
        let start_time = Instant::now();
        let org = &self.config.github.org;

        info!(
            "Starting sync pass for organization {} (force: {})",
            org, force
        );

        let repositories = self.hosting.list_org_repositories(org).await?;
        let repositories_listed = repositories.len();
        info!("Listed {} repositories", repositories_listed);

        // The lookback window is anchored to wall-clock now at pass start,
        // not to a stored watermark.
        let lookback = self
            .config
            .lookback_duration()
            .map_err(|e| SyncError::UpstreamUnavailable(e.to_string()))?;
        let since =
            Utc::now() - chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut outcomes = Vec::with_capacity(repositories.len());
        for repo in repositories {
            let outcome = self.process_repository(&repo, force, since).await;

            match &outcome {
                RepositoryOutcome::Skipped { full_name, reason } => {
                    debug!("Skipped {}: {}", full_name, reason.as_str());
                }
                RepositoryOutcome::Failed { full_name, error } => {
                    error!("Repository {} failed: {}", full_name, error);
                }
                RepositoryOutcome::Processed { full_name, dependencies } => {
                    debug!(
                        "Processed {} ({} dependency outcomes)",
                        full_name,
                        dependencies.len()
                    );
                }
            }

            outcomes.push(outcome);
        }

        let summary = compile_summary(repositories_listed, outcomes, start_time.elapsed());

        info!(
            "Sync pass completed in {:.2}s: {} processed, {} skipped, {} failed, {} dependencies reconciled, {} dependencies skipped",
            summary.duration.as_secs_f64(),
            summary.repositories_processed,
            summary.repositories_skipped,
            summary.repositories_failed,
            summary.dependencies_reconciled,
            summary.dependencies_skipped,
        );

        Ok(summary)
    }

    /// Process one repository: gate, upsert its record, fetch and parse its
    /// manifest,
    /// reconcile its dependencies. Never returns an error; every failure is
    /// folded into the outcome.
    async fn process_repository(
        &self,
        repo: &RemoteRepository,
        force: bool,
        since: chrono::DateTime<Utc>,
    ) -> RepositoryOutcome {
        let full_name = repo.full_name.clone();

        if matches_exclusion_pattern(&repo.name, &self.config.github.exclude_patterns) {
            return RepositoryOutcome::Skipped {
                full_name,
                reason: SkipReason::Excluded,
            };
        }

        // Activity gate: the cost-control mechanism against rate-limited
        // upstream APIs. Bypassed on forced passes.
        if !force {
            match self
                .hosting
                .has_recent_commits(&repo.owner.login, &repo.name, since)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    return RepositoryOutcome::Skipped {
                        full_name,
                        reason: SkipReason::NoRecentActivity,
                    };
                }
                Err(e) => {
                    warn!("{}", e);
                    return RepositoryOutcome::Skipped {
                        full_name,
                        reason: SkipReason::ActivityCheckFailed(e.to_string()),
                    };
                }
            }
        }

        // The repository record must exist before any dependency write.
        let record = match self
            .store
            .upsert_repository(&NewRepository {
                full_name: &repo.full_name,
                name: &repo.name,
                html_url: &repo.html_url,
                description: repo.description.as_deref(),
                language: repo.language.as_deref(),
                owner: &repo.owner.login,
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                return RepositoryOutcome::Failed {
                    full_name,
                    error: e.to_string(),
                };
            }
        };

        // A missing manifest is a normal condition: zero dependencies.
        // A fetched-but-unreadable one fails the repository for this pass.
        let contents = match self
            .hosting
            .fetch_manifest(&repo.owner.login, &repo.name, MANIFEST_PATH)
            .await
        {
            Ok(Some(contents)) => contents,
            Ok(None) => {
                return RepositoryOutcome::Processed {
                    full_name,
                    dependencies: Vec::new(),
                };
            }
            Err(e) => {
                return RepositoryOutcome::Failed {
                    full_name,
                    error: e.to_string(),
                };
            }
        };

        let dependencies = match manifest::parse_dependencies(&full_name, &contents) {
            Ok(deps) => deps,
            Err(e) => {
                return RepositoryOutcome::Failed {
                    full_name,
                    error: e.to_string(),
                };
            }
        };

        // Bounded fan-out with per-unit error capture: a failing dependency
        // must not cancel its siblings.
        let unit_timeout = self.config.call_timeout() * 2;
        let outcomes: Vec<DependencyOutcome> = stream::iter(dependencies)
            .map(|(name, version)| {
                let engine = self.clone();
                let repository_id = record.id;
                async move {
                    let result = timeout(
                        unit_timeout,
                        engine.reconcile_dependency(repository_id, &name, &version),
                    )
                    .await;

                    match result {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!("Dependency {} timed out during reconciliation", name);
                            DependencyOutcome::Skipped {
                                name,
                                reason: format!(
                                    "timed out after {}s",
                                    unit_timeout.as_secs()
                                ),
                            }
                        }
                    }
                }
            })
            .buffer_unordered(self.config.sync.max_parallel.max(1))
            .collect()
            .await;

        RepositoryOutcome::Processed {
            full_name,
            dependencies: outcomes,
        }
    }

    /// Reconcile one dependency: resolve its latest release, compute the
    /// outdated flag, and create-or-update the stored record keyed on
    /// (name, repository_id). Idempotent; failures stay inside the outcome.
    async fn reconcile_dependency(
        &self,
        repository_id: i64,
        name: &str,
        current_version: &str,
    ) -> DependencyOutcome {
        // Without an authoritative latest version an outdated determination
        // would be meaningless, so the dependency is skipped outright.
        let latest_version = match self.registry.latest_version(name).await {
            Ok(version) => version,
            Err(e) => {
                warn!("{}", e);
                return DependencyOutcome::Skipped {
                    name: name.to_string(),
                    reason: e.to_string(),
                };
            }
        };

        // Exact string comparison; no semantic-version interpretation.
        let outdated = latest_version != current_version;

        let action = match self.store.find_dependency(name, repository_id).await {
            Ok(Some(_)) => ReconcileAction::Updated,
            Ok(None) => ReconcileAction::Created,
            Err(e) => {
                warn!("Store lookup failed for dependency {}: {}", name, e);
                return DependencyOutcome::Skipped {
                    name: name.to_string(),
                    reason: e.to_string(),
                };
            }
        };

        match self
            .store
            .upsert_dependency(&NewDependency {
                repository_id,
                name,
                current_version,
                latest_version: &latest_version,
                outdated,
            })
            .await
        {
            Ok(_) => DependencyOutcome::Reconciled {
                name: name.to_string(),
                action,
                outdated,
            },
            Err(e) => {
                warn!("Store write failed for dependency {}: {}", name, e);
                DependencyOutcome::Skipped {
                    name: name.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Get configuration for external inspection
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Check if a repository name matches any exclusion pattern
fn matches_exclusion_pattern(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        // Simple glob pattern matching
        if pattern.contains('*') {
            let pattern_regex = pattern.replace('.', r"\.").replace('*', ".*");

            regex::Regex::new(&format!("^{}$", pattern_regex))
                .map(|re| re.is_match(name))
                .unwrap_or(false)
        } else {
            name == pattern
        }
    })
}

/// Compile pass summary from per-repository outcomes
fn compile_summary(
    repositories_listed: usize,
    outcomes: Vec<RepositoryOutcome>,
    duration: Duration,
) -> PassSummary {
    let mut repositories_processed = 0;
    let mut repositories_skipped = 0;
    let mut repositories_failed = 0;
    let mut dependencies_reconciled = 0;
    let mut dependencies_skipped = 0;

    for outcome in &outcomes {
        match outcome {
            RepositoryOutcome::Processed { dependencies, .. } => {
                repositories_processed += 1;
                for dep in dependencies {
                    match dep {
                        DependencyOutcome::Reconciled { .. } => dependencies_reconciled += 1,
                        DependencyOutcome::Skipped { .. } => dependencies_skipped += 1,
                    }
                }
            }
            RepositoryOutcome::Skipped { .. } => repositories_skipped += 1,
            RepositoryOutcome::Failed { .. } => repositories_failed += 1,
        }
    }

    PassSummary {
        repositories_listed,
        repositories_processed,
        repositories_skipped,
        repositories_failed,
        dependencies_reconciled,
        dependencies_skipped,
        duration,
        outcomes,
    }
}
