use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Named speed setting, from most to least conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    #[default]
    Safe,
    Normal,
    Fast,
}

impl fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedTier::Safe => write!(f, "safe"),
            SpeedTier::Normal => write!(f, "normal"),
            SpeedTier::Fast => write!(f, "fast"),
        }
    }
}

impl FromStr for SpeedTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(SpeedTier::Safe),
            "normal" => Ok(SpeedTier::Normal),
            "fast" => Ok(SpeedTier::Fast),
            other => Err(format!("unknown speed tier '{other}' (expected safe, normal or fast)")),
        }
    }
}

/// Inter-action delay per tier. Does not react to pulse health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingPolicy {
    pub safe_ms: u64,
    pub normal_ms: u64,
    pub fast_ms: u64,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            safe_ms: 8000,
            normal_ms: 4000,
            fast_ms: 2000,
        }
    }
}

impl PacingPolicy {
    pub fn delay(&self, tier: SpeedTier) -> Duration {
        let ms = match tier {
            SpeedTier::Safe => self.safe_ms,
            SpeedTier::Normal => self.normal_ms,
            SpeedTier::Fast => self.fast_ms,
        };
        Duration::from_millis(ms)
    }

    /// Checks that slower tiers never wait less than faster ones.
    pub fn is_ordered(&self) -> bool {
        self.safe_ms >= self.normal_ms && self.normal_ms >= self.fast_ms
    }
}
