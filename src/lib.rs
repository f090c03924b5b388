// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod risk;
pub mod stats;
pub mod strategy;

// Re-export commonly used types
pub use models::*;
