// src/lib.rs
// Library interface for cert-inventory
pub mod cert_parser;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod job;
pub mod probe;
pub mod progress;
pub mod recorder;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod targets;
pub mod types;
