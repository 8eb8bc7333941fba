//! Crawl coordinator - wires a run together from configuration
//!
//! This module owns run setup and teardown:
//! - Opening the state store and deciding whether to resume or start fresh
//! - Recovering frontier, retry, in-flight and dead-letter state
//! - Seeding the frontier from configuration
//! - Choosing the frontier, politeness policy and runner
//! - Recording the final run status

use crate::config::{Config, FrontierKind, RunnerKind};
use crate::crawler::backoff::RetryPolicy;
use crate::crawler::control::RunControl;
use crate::crawler::executor::TaskExecutor;
use crate::crawler::fetcher::{Fetcher, ReqwestFetcher};
use crate::crawler::parser::{LinkFollowStep, TitleStep};
use crate::crawler::pipeline::{Route, Routes};
use crate::crawler::runner::{PooledRunner, Runner, SingleThreadRunner};
use crate::crawler::scheduler::{RunSummary, Scheduler, SchedulerOptions};
use crate::events::EventBus;
use crate::politeness::{KeyedPolitenessPolicy, PolitenessPolicy};
use crate::state::{FifoFrontier, Frontier, PriorityFrontier, RunState};
use crate::storage::{RunStatus, SqliteStore, StateStore};
use crate::task::{ProcessingTask, TaskOrigin};
use crate::url::normalize_url;
use crate::LoomError;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Route used when a task carries no hint
pub const DEFAULT_ROUTE: &str = "default";

/// Main crawl coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    state: Arc<RunState>,
    fetcher: Arc<dyn Fetcher>,
    routes: Arc<Routes>,
    bus: EventBus,
    control: Arc<RunControl>,
    resumed: bool,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash of the configuration file, stored with the run
    /// * `store` - Backend holding the journal, snapshots and dead letters
    /// * `fetcher` - Fetch boundary used by every task
    /// * `routes` - Pipelines selected by task hint
    /// * `fresh` - Whether to discard stored state and start a new run
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(LoomError)` - Failed to initialize
    pub fn new(
        config: Config,
        config_hash: &str,
        store: Arc<dyn StateStore>,
        fetcher: Arc<dyn Fetcher>,
        routes: Routes,
        fresh: bool,
    ) -> Result<Self, LoomError> {
        if fresh {
            tracing::info!("Fresh run requested, clearing stored state");
            store.reset()?;
        }

        let frontier = build_frontier(config.scheduler.frontier);
        let latest = if fresh { None } else { store.latest_run()? };

        let (state, resumed) = match latest {
            Some(run) if run.status.is_resumable() => {
                tracing::info!(
                    "Resuming {} run {}",
                    run.status.to_db_string(),
                    run.id
                );
                if run.config_hash != config_hash {
                    tracing::warn!("Configuration changed since run {} started", run.id);
                }
                let state = RunState::recover(run.id, frontier, Arc::clone(&store))?;
                (state, true)
            }
            Some(run) => {
                tracing::info!("Previous run {} completed, starting new run", run.id);
                (new_state(frontier, &store)?, false)
            }
            None => {
                tracing::info!("No previous runs found, starting new run");
                (new_state(frontier, &store)?, false)
            }
        };

        store.begin_run(state.run_id(), config_hash)?;

        let state = Arc::new(state);
        let added = seed_frontier(&state, &config)?;
        tracing::info!(
            "Run {}: {} seeds added, {} queued, {} awaiting retry",
            state.run_id(),
            added,
            state.frontier_len(),
            state.retry_len()
        );

        Ok(Self {
            config: Arc::new(config),
            state,
            fetcher,
            routes: Arc::new(routes),
            bus: EventBus::new(),
            control: Arc::new(RunControl::new()),
            resumed,
        })
    }

    /// Creates a coordinator backed by SQLite and HTTP with the default pipeline
    pub fn from_config(config: Config, config_hash: &str, fresh: bool) -> Result<Self, LoomError> {
        let store: Arc<dyn StateStore> =
            Arc::new(SqliteStore::open(Path::new(&config.output.database_path))?);
        let fetcher: Arc<dyn Fetcher> =
            Arc::new(ReqwestFetcher::from_config(&config.user_agent, &config.fetch)?);
        Self::new(config, config_hash, store, fetcher, default_routes(), fresh)
    }

    /// Handle for cancelling the run from outside
    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Whether stored state from an earlier run was recovered
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Runs the crawl until it drains, is cancelled, or fails
    pub async fn run(self) -> Result<RunSummary, LoomError> {
        let scheduler_config = &self.config.scheduler;
        let politeness: Arc<dyn PolitenessPolicy> = Arc::new(KeyedPolitenessPolicy::per_key(
            self.config.politeness.interval(),
            self.config.politeness.key,
        ));

        let executor = Arc::new(
            TaskExecutor::new(
                Arc::clone(&self.state),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.routes),
                RetryPolicy::from(&self.config.retry),
                self.bus.clone(),
                Arc::clone(&self.control),
            )
            .with_max_depth(scheduler_config.max_depth),
        );

        let runner: Box<dyn Runner> = match scheduler_config.runner {
            RunnerKind::SingleThread => Box::new(SingleThreadRunner::new(executor)),
            RunnerKind::Pooled => Box::new(PooledRunner::new(executor, scheduler_config.workers)),
        };

        let scheduler = Scheduler::new(
            Arc::clone(&self.state),
            politeness,
            runner,
            Arc::clone(&self.control),
            self.bus.clone(),
            SchedulerOptions::from(scheduler_config),
        );

        let run_id = self.state.run_id();
        let result = scheduler.run().await;
        let status = match &result {
            Ok(summary) => summary.status,
            Err(_) => RunStatus::Failed,
        };

        if let Err(e) = self.state.store().finish_run(run_id, status) {
            tracing::warn!("Failed to record status for run {}: {}", run_id, e);
        }

        if let Ok(summary) = &result {
            tracing::info!(
                "Run {} finished: {} completed, {} stopped, {} retried, {} dead-lettered, {} discarded",
                run_id,
                summary.completed,
                summary.stopped,
                summary.retried,
                summary.dead_lettered,
                summary.discarded
            );
        }

        result
    }
}

/// Pipeline that follows links and records page titles
pub fn default_routes() -> Routes {
    Routes::new(
        Route::new(DEFAULT_ROUTE)
            .step(LinkFollowStep::new())
            .step(TitleStep::new()),
    )
}

/// Builds seed tasks from configuration, normalizing each URL
pub fn seed_tasks(config: &Config) -> Result<Vec<ProcessingTask>, LoomError> {
    config
        .seeds
        .iter()
        .map(|entry| -> Result<ProcessingTask, LoomError> {
            let url = normalize_url(&entry.url)?;
            let mut task = ProcessingTask::new(url.as_str(), TaskOrigin::seed("config"))
                .with_priority(entry.priority);
            if let Some(hint) = &entry.hint {
                task = task.with_hint(hint.clone());
            }
            Ok(task)
        })
        .collect()
}

fn seed_frontier(state: &RunState, config: &Config) -> Result<usize, LoomError> {
    let mut added = 0;
    for task in seed_tasks(config)? {
        if state.submit(task)? {
            added += 1;
        }
    }
    Ok(added)
}

fn new_state(frontier: Box<dyn Frontier>, store: &Arc<dyn StateStore>) -> Result<RunState, LoomError> {
    let state = RunState::new(Uuid::new_v4(), frontier, Arc::clone(store));
    // Covers whatever a completed earlier run left in the journal.
    state.checkpoint()?;
    Ok(state)
}

fn build_frontier(kind: FrontierKind) -> Box<dyn Frontier> {
    match kind {
        FrontierKind::Fifo => Box::new(FifoFrontier::new()),
        FrontierKind::Priority => Box::new(PriorityFrontier::new()),
    }
}

/// Runs a complete crawl from a configuration
///
/// Ctrl-C cancels the run: tasks already executing finish and are recorded,
/// tasks not yet started stay journaled for the next resume.
pub async fn run_crawl(config: Config, config_hash: &str, fresh: bool) -> Result<RunSummary, LoomError> {
    let coordinator = Coordinator::from_config(config, config_hash, fresh)?;
    let control = coordinator.control();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling run");
            control.cancel();
        }
    });

    coordinator.run().await
}
