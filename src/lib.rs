//! ClaudeStation - token-economy client core for the Claude API
//!
//! The differentiating value of this crate is token economy: each turn is
//! assembled as a four-layer request that maximises the provider's
//! prefix-cache hit rate, while a background worker incrementally folds old
//! turns into a rolling summary. Raw messages stay untouched in SQLite —
//! the summary is lossy by design, the transcript is the source of truth.
//!
//! ## Layout
//!
//! - **db** — durable state: projects, conversations, messages, summaries
//! - **pricing** — per-model pricing and cost from observed usage counters
//! - **context** — the four-layer assembler and cost estimates
//! - **compress** — when and what to fold into the rolling summary
//! - **api** — streaming chat and background compression transport
//! - **orchestrator** — the turn state machine and compression worker
//! - **services** — the project/conversation/document facade for the shell
//!
//! The GUI shell, Markdown rendering and document text extraction are
//! external collaborators; the CLI in this crate drives the same facade
//! headlessly.

pub mod api;
pub mod cli;
pub mod compress;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pricing;
pub mod services;
pub mod tokenizer;

pub use error::StationError;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
