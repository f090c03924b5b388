// Data fetching, position tracking and the scan loop
pub mod position_manager;
pub mod price_feed;
pub mod rate_limiter;
pub mod scheduler;

pub use position_manager::{
    ExitContext, ExitReason, ExitRules, Position, PositionClosed, PositionError, PositionManager,
    PositionStatus,
};
pub use price_feed::{Backoff, FetchPolicy, RateLimitedFetcher};
pub use rate_limiter::{Acquire, ProviderRateLimiter, RateLimiterState};
pub use scheduler::{AssetOutcome, Collaborators, ScanError, ScanReport, ScanScheduler, ScanSettings};
