use serde::{Deserialize, Serialize};

/// Rejects entries into a move that is already overextended on heavy volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpFilter {
    pub enabled: bool,
    pub max_rsi: f64,
    /// Last volume over its 20-bar average
    pub max_volume_ratio: f64,
}

impl Default for PumpFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rsi: 72.0,
            max_volume_ratio: 2.5,
        }
    }
}

impl PumpFilter {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Both limits must be exceeded; without a volume ratio nothing is rejected
    pub fn rejects(&self, rsi: f64, volume_ratio: Option<f64>) -> bool {
        if !self.enabled {
            return false;
        }
        match volume_ratio {
            Some(ratio) => rsi > self.max_rsi && ratio > self.max_volume_ratio,
            None => false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_rsi > 0.0 && self.max_rsi <= 100.0) {
            return Err(format!("pump max_rsi must be in (0, 100], got {}", self.max_rsi));
        }
        if !(self.max_volume_ratio > 0.0 && self.max_volume_ratio.is_finite()) {
            return Err(format!(
                "pump max_volume_ratio must be positive, got {}",
                self.max_volume_ratio
            ));
        }
        Ok(())
    }
}
