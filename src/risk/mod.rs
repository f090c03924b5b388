// Risk management module
pub mod pump_filter;
pub mod signal_budget;

pub use pump_filter::PumpFilter;
pub use signal_budget::{
    BudgetError, BudgetSettings, BudgetTrip, SignalBudget, TierBudget, MAX_REENTRY_COOLDOWN_SECS,
};
