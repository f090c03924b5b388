// Entry scoring and signal generation
pub mod scoring;
pub mod signals;

pub use scoring::{Score, ScoreBreakdown, ScoringError, ScoringModel, ScoringWeights};
pub use signals::{SignalConfig, SignalGenerator};
