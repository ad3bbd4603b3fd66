// Core modules
pub mod audit;
pub mod broker;
pub mod config;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod strategy;

// Re-export commonly used types
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
