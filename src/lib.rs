//! # simdrive
//!
//! Drives long-running, LLM-backed agent simulations in checkpointed
//! windows. Every generation call goes through a retrying generator that
//! validates outputs and falls back to a fail-safe value; failed windows are
//! rewound to the last checkpoint and retried within a bounded stepback
//! budget.
//!
//! ## Usage
//!
//! ```bash
//! simdrive run --origin base --destination july1 [-n steps] [-f frequency]
//! simdrive checkpoints [simulation]
//! ```
//!
//! ## Modules
//!
//! - `generation` - Retrying generator, output handlers and the schema adapter
//! - `checkpoint` - Durable, ordered checkpoint store with fork and discard
//! - `engine` - Simulation engine contract and the bundled agent simulation
//! - `executor` - Checkpointed execution loop and viewer supervision
//! - `accounting` - Token usage ledger and cost reports
//! - `config` - TOML configuration with environment overrides
//! - `error` - Unified error type and exit codes
//! - `app` / `cli` - Process setup and command-line interface

pub mod accounting;
pub mod app;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod generation;
