//! Statistics generation from the state store
//!
//! This module provides functionality for extracting and displaying
//! run statistics: what is still pending after recovery, what was dead
//! lettered and why, and the totals of the last run when available.

use crate::crawler::RunSummary;
use crate::state::DeadLetterEntry;
use crate::storage::{replay, RunRecord, StateStore};
use crate::LoomError;
use std::collections::BTreeMap;

/// Run statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Latest run recorded in the store
    pub run: Option<RunRecord>,

    /// Tasks queued in the frontier, including requeued in-flight tasks
    pub queued: u64,

    /// Tasks that were executing when state was last persisted
    pub in_flight: u64,

    /// Tasks waiting for a retry
    pub awaiting_retry: u64,

    pub discovered: u64,
    pub processed: u64,

    /// Total number of dead letters
    pub dead_letters: u64,

    /// Dead letters by reason
    pub dead_letter_reasons: BTreeMap<String, u64>,

    /// Totals reported by a run that just ended
    pub summary: Option<RunSummary>,
}

impl CrawlStatistics {
    /// Attaches the totals of a run that just ended
    pub fn with_summary(mut self, summary: RunSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Tasks that a resume would execute
    pub fn pending(&self) -> u64 {
        self.queued + self.in_flight + self.awaiting_retry
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The state store to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(LoomError)` - Failed to read the store
pub fn load_statistics(store: &dyn StateStore) -> Result<CrawlStatistics, LoomError> {
    let run = store.latest_run()?;
    let recovered = replay::load(store)?;
    let dead_letters = store.dead_letters()?;

    let mut dead_letter_reasons = BTreeMap::new();
    for entry in &dead_letters {
        *dead_letter_reasons
            .entry(entry.item.reason.clone())
            .or_insert(0) += 1;
    }

    Ok(CrawlStatistics {
        run,
        queued: recovered.frontier.len() as u64,
        in_flight: recovered.in_flight.len() as u64,
        awaiting_retry: recovered.retry.len() as u64,
        discovered: recovered.discovered.len() as u64,
        processed: recovered.processed.len() as u64,
        dead_letters: dead_letters.len() as u64,
        dead_letter_reasons,
        summary: None,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    match &stats.run {
        Some(run) => {
            println!("Run {}:", run.id);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!("  Config hash: {}", run.config_hash);
        }
        None => println!("No runs recorded"),
    }
    println!();

    println!("Pending Work:");
    println!("  Queued: {}", stats.queued);
    println!("  In flight: {}", stats.in_flight);
    println!("  Awaiting retry: {}", stats.awaiting_retry);
    println!();

    println!("Seen:");
    println!("  Discovered: {}", stats.discovered);
    println!("  Processed: {}", stats.processed);
    println!();

    if let Some(summary) = &stats.summary {
        println!("Last Run:");
        println!("  Dispatched: {}", summary.dispatched);
        println!("  Completed: {}", summary.completed);
        println!("  Stopped: {}", summary.stopped);
        println!("  Retried: {}", summary.retried);
        println!("  Dead-lettered: {}", summary.dead_lettered);
        println!("  Discarded: {}", summary.discarded);
        println!("  Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
        println!();
    }

    if !stats.dead_letter_reasons.is_empty() {
        println!("Dead Letters ({}):", stats.dead_letters);
        // Sort reasons by count (descending)
        let mut reasons: Vec<_> = stats.dead_letter_reasons.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1));

        for (reason, count) in reasons {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    let processed_rate = if stats.discovered > 0 {
        (stats.processed as f64 / stats.discovered as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Processed: {:.1}% ({} / {} discovered tasks)",
        processed_rate, stats.processed, stats.discovered
    );
}

/// Prints each dead letter with the stage and error that ended it
pub fn print_dead_letters(entries: &[DeadLetterEntry]) {
    println!("=== Dead Letters ({}) ===\n", entries.len());

    for entry in entries {
        println!("{}", entry.task.url);
        println!("  Task: {}", entry.task.id);
        println!(
            "  Reason: {} at stage {} (attempt {})",
            entry.item.reason, entry.item.stage_id, entry.item.attempt
        );
        if let Some(route) = &entry.item.route_id {
            println!("  Route: {}", route);
        }
        println!("  Error: {}", entry.item.error);
        println!("  Failed at: {}", entry.item.failed_at.to_rfc3339());
        for rejection in entry.decisions.rejections() {
            println!("  Rejected: {} ({})", rejection.code, rejection.message);
        }
        println!();
    }
}
