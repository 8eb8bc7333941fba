use crate::url::KeyMode;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Loom
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "seed")]
    pub seeds: Vec<SeedEntry>,
}

/// Which runner executes dispatched tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerKind {
    /// Executes each task inline on the scheduler task
    SingleThread,
    /// Executes tasks on a bounded worker pool
    #[default]
    Pooled,
}

/// Frontier ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrontierKind {
    #[default]
    Fifo,
    /// Lowest `priority` first, ties in insertion order
    Priority,
}

/// Scheduler and runner behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchedulerConfig {
    pub runner: RunnerKind,

    /// Worker pool size (pooled runner only)
    pub workers: usize,

    /// Maximum number of tasks executing at once
    pub max_in_flight: usize,

    /// Due retries moved to the frontier per loop iteration
    pub retry_drain_batch: usize,

    /// Longest time the scheduler sleeps when there is nothing to dispatch
    pub max_park_ms: u64,

    /// Finished tasks between snapshots
    pub snapshot_every: u64,

    pub frontier: FrontierKind,

    /// Maximum depth to crawl from seed URLs (unlimited if absent)
    pub max_depth: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            runner: RunnerKind::default(),
            workers: 4,
            max_in_flight: 8,
            retry_drain_batch: 32,
            max_park_ms: 250,
            snapshot_every: 100,
            frontier: FrontierKind::default(),
            max_depth: None,
        }
    }
}

impl SchedulerConfig {
    pub fn max_park(&self) -> Duration {
        Duration::from_millis(self.max_park_ms)
    }
}

/// Per-key rate limiting
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PolitenessConfig {
    /// Minimum time between dispatches to the same key (milliseconds)
    pub interval_ms: u64,

    /// How URLs map to keys
    pub key: KeyMode,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            key: KeyMode::default(),
        }
    }
}

impl PolitenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Retry and backoff behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    /// Failures retried per task before it is dead-lettered
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// HTTP fetch timeouts
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// A seed URL
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub url: String,

    /// Route selecting the pipeline for this seed and its discoveries
    #[serde(default)]
    pub hint: Option<String>,

    #[serde(default)]
    pub priority: u32,
}
