use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    RsiOverbought,
    TimeLimit,
    TrailingStop,
    AiBearish, // Score or knowledge base turned against the position
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::RsiOverbought => "RSI_OVERBOUGHT",
            ExitReason::TimeLimit => "TIME_LIMIT",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::AiBearish => "AI_BEARISH",
            ExitReason::Manual => "MANUAL",
        };
        f.write_str(name)
    }
}

/// Exit thresholds shared by every position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitRules {
    pub trailing_stop_percent: f64,
    /// Unrealized gain that arms the trailing stop
    pub trailing_activation_percent: f64,
    pub rsi_overbought: f64,
    pub time_limit_hours: u32,
    pub bearish_score: f64,
    pub bearish_kb_delta: f64,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            trailing_stop_percent: 5.0,
            trailing_activation_percent: 15.0,
            rsi_overbought: 75.0,
            time_limit_hours: 72,
            bearish_score: 25.0,
            bearish_kb_delta: -15.0,
        }
    }
}

impl ExitRules {
    pub fn validate(&self) -> Result<(), PositionError> {
        let invalid = |msg: String| Err(PositionError::InvalidRules(msg));

        if !(self.trailing_stop_percent > 0.0 && self.trailing_stop_percent < 100.0) {
            return invalid(format!(
                "trailing_stop_percent must be in (0, 100), got {}",
                self.trailing_stop_percent
            ));
        }
        if !(self.trailing_activation_percent > 0.0 && self.trailing_activation_percent.is_finite())
        {
            return invalid(format!(
                "trailing_activation_percent must be positive, got {}",
                self.trailing_activation_percent
            ));
        }
        if !(self.rsi_overbought > 0.0 && self.rsi_overbought <= 100.0) {
            return invalid(format!(
                "rsi_overbought must be in (0, 100], got {}",
                self.rsi_overbought
            ));
        }
        if self.time_limit_hours == 0 {
            return invalid("time_limit_hours must be positive".into());
        }
        if !(0.0..=100.0).contains(&self.bearish_score) {
            return invalid(format!(
                "bearish_score must be in [0, 100], got {}",
                self.bearish_score
            ));
        }
        if !self.bearish_kb_delta.is_finite() {
            return invalid("bearish_kb_delta must be finite".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub asset: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss_pct: f64,     // percent units
    pub take_profit_pct: f64,   // from the entry signal
    pub trailing_stop_pct: f64, // distance below the high watermark
    pub status: PositionStatus,
    pub exit_reason: Option<ExitReason>,
    pub high_watermark: f64,
    pub trailing_armed: bool,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl Position {
    /// Unrealized (or realized, once closed) gain in percent
    pub fn pnl_pct(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0
    }

    pub fn stop_loss_price(&self) -> f64 {
        self.entry_price * (1.0 - self.stop_loss_pct / 100.0)
    }

    pub fn take_profit_price(&self) -> f64 {
        self.entry_price * (1.0 + self.take_profit_pct / 100.0)
    }

    pub fn trailing_stop_price(&self) -> f64 {
        self.high_watermark * (1.0 - self.trailing_stop_pct / 100.0)
    }
}

/// Emitted exactly once per position, when it closes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionClosed {
    pub position_id: Uuid,
    pub asset: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub reason: ExitReason,
    pub pnl_pct: f64,
    pub high_watermark: f64,
}

impl PositionClosed {
    pub fn holding_hours(&self) -> f64 {
        (self.exit_time - self.entry_time).num_seconds() as f64 / 3600.0
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("already have an open position for {0}")]
    AlreadyOpen(String),

    #[error("position {0} not found")]
    NotFound(Uuid),

    #[error("position {0} is already closed")]
    AlreadyClosed(Uuid),

    #[error("invalid entry price {0}")]
    InvalidPrice(f64),

    #[error("invalid exit rules: {0}")]
    InvalidRules(String),
}

/// What the scheduler observed for an asset this tick
///
/// `rsi`, `score` and `kb_adjustment` are absent when indicators could
/// not be computed; only the price and time rules run then.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitContext {
    pub price: f64,
    pub now: DateTime<Utc>,
    pub rsi: Option<f64>,
    pub score: Option<f64>,
    pub kb_adjustment: Option<f64>,
}

impl ExitContext {
    pub fn price_only(price: f64, now: DateTime<Utc>) -> Self {
        Self {
            price,
            now,
            rsi: None,
            score: None,
            kb_adjustment: None,
        }
    }
}

pub struct PositionManager {
    positions: Vec<Position>,
    stop_loss_pct: f64,
    rules: ExitRules,
}

impl PositionManager {
    pub fn new(stop_loss_pct: f64, rules: ExitRules) -> Self {
        Self {
            positions: Vec::new(),
            stop_loss_pct,
            rules,
        }
    }

    pub fn rules(&self) -> &ExitRules {
        &self.rules
    }

    /// Open a position from an accepted signal
    ///
    /// Entry time is the signal timestamp.
    pub fn open(&mut self, signal: &Signal, entry_price: f64) -> Result<Uuid, PositionError> {
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(PositionError::InvalidPrice(entry_price));
        }
        if self.has_open_position(&signal.asset) {
            return Err(PositionError::AlreadyOpen(signal.asset.clone()));
        }

        let id = Uuid::new_v4();
        self.positions.push(Position {
            id,
            asset: signal.asset.clone(),
            entry_price,
            entry_time: signal.timestamp,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: signal.take_profit_pct,
            trailing_stop_pct: self.rules.trailing_stop_percent,
            status: PositionStatus::Open,
            exit_reason: None,
            high_watermark: entry_price,
            trailing_armed: false,
            exit_price: None,
            exit_time: None,
        });

        tracing::info!(
            asset = %signal.asset,
            entry_price,
            score = signal.score,
            take_profit_pct = signal.take_profit_pct,
            stop_loss_pct = self.stop_loss_pct,
            "Position opened"
        );

        Ok(id)
    }

    /// Check if we have open position for asset
    pub fn has_open_position(&self, asset: &str) -> bool {
        self.get_open_position(asset).is_some()
    }

    pub fn get_open_position(&self, asset: &str) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.asset == asset && p.status == PositionStatus::Open)
    }

    pub fn get_position(&self, position_id: Uuid) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    fn get_position_mut(&mut self, position_id: Uuid) -> Result<&mut Position, PositionError> {
        self.positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or(PositionError::NotFound(position_id))
    }

    /// Update the open position for `asset` with this tick's observation and
    /// close it on the first exit rule that matches
    pub fn evaluate(&mut self, asset: &str, ctx: &ExitContext) -> Option<PositionClosed> {
        let rules = self.rules.clone();
        let position = self
            .positions
            .iter_mut()
            .find(|p| p.asset == asset && p.status == PositionStatus::Open)?;

        if ctx.price > position.high_watermark {
            position.high_watermark = ctx.price;
        }
        if !position.trailing_armed
            && position.pnl_pct(position.high_watermark) >= rules.trailing_activation_percent
        {
            position.trailing_armed = true;
            tracing::debug!(
                asset = %asset,
                high_watermark = position.high_watermark,
                "Trailing stop armed"
            );
        }

        let reason = Self::exit_reason(position, &rules, ctx)?;
        let id = position.id;

        self.close_position_at(id, ctx.price, reason, ctx.now).ok()
    }

    /// Exit rules in priority order, first match wins
    fn exit_reason(position: &Position, rules: &ExitRules, ctx: &ExitContext) -> Option<ExitReason> {
        let price = ctx.price;

        if price <= position.stop_loss_price() {
            return Some(ExitReason::StopLoss);
        }
        if price >= position.take_profit_price() {
            return Some(ExitReason::TakeProfit);
        }
        if ctx.rsi.is_some_and(|rsi| rsi > rules.rsi_overbought) {
            return Some(ExitReason::RsiOverbought);
        }
        if ctx.now - position.entry_time >= Duration::hours(i64::from(rules.time_limit_hours)) {
            return Some(ExitReason::TimeLimit);
        }
        if position.trailing_armed && price < position.trailing_stop_price() {
            return Some(ExitReason::TrailingStop);
        }

        let bearish_score = ctx.score.is_some_and(|s| s <= rules.bearish_score);
        let bearish_kb = ctx.kb_adjustment.is_some_and(|kb| kb <= rules.bearish_kb_delta);
        if bearish_score || bearish_kb {
            return Some(ExitReason::AiBearish);
        }

        None
    }

    /// Close position now
    pub fn close_position(
        &mut self,
        position_id: Uuid,
        exit_price: f64,
        reason: ExitReason,
    ) -> Result<PositionClosed, PositionError> {
        self.close_position_at(position_id, exit_price, reason, Utc::now())
    }

    /// Close position with explicit timestamp
    ///
    /// Status, reason, exit price and exit time are set together.
    pub fn close_position_at(
        &mut self,
        position_id: Uuid,
        exit_price: f64,
        reason: ExitReason,
        timestamp: DateTime<Utc>,
    ) -> Result<PositionClosed, PositionError> {
        let position = self.get_position_mut(position_id)?;

        if position.status == PositionStatus::Closed {
            return Err(PositionError::AlreadyClosed(position_id));
        }

        position.status = PositionStatus::Closed;
        position.exit_reason = Some(reason);
        position.exit_price = Some(exit_price);
        position.exit_time = Some(timestamp);

        let closed = PositionClosed {
            position_id,
            asset: position.asset.clone(),
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time: timestamp,
            reason,
            pnl_pct: position.pnl_pct(exit_price),
            high_watermark: position.high_watermark,
        };

        tracing::info!(
            asset = %closed.asset,
            reason = %reason,
            entry_price = closed.entry_price,
            exit_price,
            pnl_pct = %format!("{:.2}", closed.pnl_pct),
            "Position closed"
        );

        Ok(closed)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
            .collect()
    }

    pub fn closed_positions(&self) -> Vec<&Position> {
        self.positions
            .iter()
            .filter(|p| p.status == PositionStatus::Closed)
            .collect()
    }

    /// Sum of percent returns over all closed positions
    pub fn realized_pnl_pct(&self) -> f64 {
        self.closed_positions()
            .iter()
            .filter_map(|p| p.exit_price.map(|exit| p.pnl_pct(exit)))
            .sum()
    }
}
