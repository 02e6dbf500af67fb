//! Shared building blocks for the skymesh orchestration crates.
//!
//! This crate carries the pieces every other crate needs: process-wide
//! settings read from the environment, the naming/identifier rules, and
//! the single scatter→gather primitive all fan-outs go through.

pub mod config;
pub mod fanout;
pub mod names;

pub use config::Settings;
pub use fanout::{for_each_bounded, MAX_CONCURRENCY};
