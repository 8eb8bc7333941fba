//! Crawler module for dispatching and executing crawl tasks
//!
//! This module contains the core crawling logic, including:
//! - The scheduler loop and its dispatch state machine
//! - Runners that bound concurrency
//! - Task execution: fetch, pipeline steps, retry and dead-letter decisions
//! - HTTP fetching and HTML link extraction
//! - Overall run coordination

mod backoff;
mod control;
mod coordinator;
mod executor;
mod fetcher;
mod parser;
mod pipeline;
mod runner;
mod scheduler;

pub use backoff::RetryPolicy;
pub use control::{RunControl, RunCounters};
pub use coordinator::{default_routes, run_crawl, seed_tasks, Coordinator, DEFAULT_ROUTE};
pub use executor::TaskExecutor;
pub use fetcher::{
    build_http_client, user_agent_string, FetchError, FetchRequest, FetchResult, Fetcher,
    ReqwestFetcher,
};
pub use parser::{parse_html, LinkFollowStep, ParsedPage, TitleStep};
pub use pipeline::{
    Discovery, PipelineResult, PipelineStep, ProcessingContext, Route, Routes, StepError,
};
pub use runner::{Dispatch, PooledRunner, Runner, SingleThreadRunner};
pub use scheduler::{RunSummary, Scheduler, SchedulerOptions, SchedulerState};
