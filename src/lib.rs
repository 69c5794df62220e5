//! brandscout - resumable batch orchestration for brand report collection
//!
//! A session tracks every brand through collect, download and summarize,
//! checkpoints to disk, and retries unfinished brands over timed phases.
//! The binary in `main.rs` is a thin CLI over these modules.

pub mod artifacts;
pub mod config;
pub mod export;
pub mod llm;
pub mod logging;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod sources;
pub mod steps;
