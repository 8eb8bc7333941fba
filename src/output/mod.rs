//! Output module for run statistics and reports
//!
//! This module handles:
//! - Loading statistics about a run from its state store
//! - Printing statistics and dead letters for the command line

pub mod stats;

pub use stats::{load_statistics, print_dead_letters, print_statistics, CrawlStatistics};
