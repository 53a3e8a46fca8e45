//! Streamscribe is the streaming ingestion core of a multi-provider LLM chat
//! client.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`api`] defines the OpenAI and Gemini wire payloads.
//! - [`core`] owns the pipeline: provider adapters, delta normalization,
//!   inline `<think>` extraction, reasoning timing, the shared transcript
//!   store, and per-chat generation control.
//! - [`cli`] is the one-shot `say` front end.
//! - [`utils`] holds URL and logging helpers.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
