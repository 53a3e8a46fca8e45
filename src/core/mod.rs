pub mod chat;
pub mod config;
pub mod delta;
pub mod generation;
pub mod ingest;
pub mod message;
pub mod persistence;
pub mod providers;
pub mod reasoning_timer;
pub mod think_parser;
pub mod title;
pub mod transcript;
