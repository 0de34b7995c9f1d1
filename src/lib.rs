//! Wager Ledger: ledger & wagering engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod odds;
pub mod simulation;
pub mod storage;
pub mod types;

pub use engine::WageringEngine;
