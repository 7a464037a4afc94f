//! # LTM Memory
//!
//! Durable per-user long-term memory for conversational agents.
//!
//! ## Architecture
//!
//! Each user has exactly one free-text memory string:
//! - **MemoryStore** - SQLite-backed upsert/read/delete of that string
//! - **MemoryReconciler** - asks a language model to merge new information
//!   into the existing text, annotating facts with temporal markers
//! - **MemoryUpdater** - read, merge, write, serialized per user
//! - **MemoryAgent** - a chat loop where the model decides when to call the
//!   `update_memory` tool
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ltm_memory::{AnthropicClient, Config, MemoryReconciler, MemoryStore, MemoryUpdater};
//!
//! let config = Config::from_env()?;
//! let store = Arc::new(MemoryStore::new(&config)?);
//! let client = Arc::new(AnthropicClient::from_config(&config)?);
//! let updater = MemoryUpdater::new(store.clone(), MemoryReconciler::from_config(client, &config));
//!
//! updater.update("alice", "I just adopted a cat named Luna").await?;
//! println!("{}", store.read("alice")?);
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod reconcile;
pub mod storage;
pub mod store;
pub mod temporal;

pub use agent::MemoryAgent;
pub use config::Config;
pub use error::{Error, Result};
pub use llm::{AnthropicClient, ChatModel, CompletionService};
pub use reconcile::{MemoryReconciler, MemoryUpdater, MergeGuard};
pub use store::{MemoryRecord, MemoryStore};
pub use temporal::{MarkerDate, TemporalMarker};
