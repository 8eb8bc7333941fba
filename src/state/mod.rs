//! State module for tracking crawl progress
//!
//! This module provides the in-memory buffers a run works from, and the
//! journaled facade that keeps them recoverable.
//!
//! # Components
//!
//! - `SeenStore`: Deduplication of discovered and processed identifiers
//! - `Frontier`: Tasks awaiting dispatch (FIFO or priority ordered)
//! - `RetryBuffer`: Tasks waiting for a future retry attempt
//! - `DeadLetterQueue`: Tasks that exhausted their retries
//! - `InFlightBuffer`: Tasks currently being executed
//! - `RunState`: All of the above behind one write-ahead journal

mod dead_letter;
mod frontier;
mod in_flight;
mod retry;
mod run_state;
mod seen;

// Re-export main types
pub use dead_letter::{DeadLetterEntry, DeadLetterItem, DeadLetterQueue};
pub use frontier::{FifoFrontier, Frontier, PriorityFrontier};
pub use in_flight::InFlightBuffer;
pub use retry::{RetryBuffer, RetryEntry};
pub use run_state::RunState;
pub use seen::SeenStore;
