//! Per-origin rate limiting
//!
//! A [`TimeGate`] reserves dispatch slots for one key without locking; a
//! [`PolitenessPolicy`] maps tasks to keys and keeps one gate per key.

mod gate;
mod policy;

pub use gate::{IntervalGate, OpenGate, TimeGate};
pub use policy::{KeyedPolitenessPolicy, PolitenessPolicy, Unrestricted};
