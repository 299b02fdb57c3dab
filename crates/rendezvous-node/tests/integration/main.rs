//! Integration test entry point for rendezvous-node.
//!
//! Run with: cargo test --test integration

mod lifecycle;
mod relay_scenario;
mod sharing;
