//! Human-pulse safety monitor.
//!
//! [`PulseMonitor`] owns the process-wide [`PulseState`] and publishes every
//! change on a `watch` channel so the engine can park on it while paused.
//! Legal transitions:
//!
//! ```text
//! active -> cooldown -> active
//! active -> awaiting_approval -> cooldown
//! (any) -> halted -> active        (halt / external reset)
//! ```

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{EngineError, PulseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseStatus {
    Active,
    Cooldown,
    Halted,
    AwaitingApproval,
}

impl fmt::Display for PulseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PulseStatus::Active => write!(f, "ACTIVE"),
            PulseStatus::Cooldown => write!(f, "COOLDOWN"),
            PulseStatus::Halted => write!(f, "HALTED"),
            PulseStatus::AwaitingApproval => write!(f, "NEEDS APPROVAL"),
        }
    }
}

/// Why the engine may not submit right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    Cooldown { remaining_secs: u64 },
    AwaitingApproval,
    LowHealth { health: u8, floor: u8 },
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::Cooldown { remaining_secs } => {
                write!(f, "cooldown ({}m {}s left)", remaining_secs / 60, remaining_secs % 60)
            }
            PauseReason::AwaitingApproval => write!(f, "batch limit reached, awaiting approval"),
            PauseReason::LowHealth { health, floor } => {
                write!(f, "health {health} is below floor {floor}")
            }
        }
    }
}

/// What the engine should do given the current pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Pause(PauseReason),
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseState {
    pub status: PulseStatus,
    pub batch_index: u32,
    pub batch_total: u32,
    pub health: u8,
    pub cooldown_remaining_secs: u64,
}

impl PulseState {
    pub fn new(batch_total: u32) -> Self {
        Self {
            status: PulseStatus::Active,
            batch_index: 0,
            batch_total,
            health: 100,
            cooldown_remaining_secs: 0,
        }
    }

    pub fn gate(&self, health_floor: u8) -> Gate {
        match self.status {
            PulseStatus::Halted => Gate::Halt,
            PulseStatus::Cooldown => Gate::Pause(PauseReason::Cooldown {
                remaining_secs: self.cooldown_remaining_secs,
            }),
            PulseStatus::AwaitingApproval => Gate::Pause(PauseReason::AwaitingApproval),
            PulseStatus::Active if self.health < health_floor => Gate::Pause(PauseReason::LowHealth {
                health: self.health,
                floor: health_floor,
            }),
            PulseStatus::Active => Gate::Proceed,
        }
    }
}

/// On-disk form of the pulse. The timestamp lets a cooldown keep running between invocations.
#[derive(Debug, Serialize, Deserialize)]
struct SavedPulse {
    state: PulseState,
    saved_at: DateTime<Utc>,
}

/// Cloneable handle to the shared pulse state.
#[derive(Debug, Clone)]
pub struct PulseMonitor {
    tx: Arc<watch::Sender<PulseState>>,
}

impl PulseMonitor {
    pub fn new(batch_total: u32) -> Self {
        let (tx, _rx) = watch::channel(PulseState::new(batch_total));
        Self { tx: Arc::new(tx) }
    }

    /// Resumes from a previously observed state, e.g. one read back from disk.
    pub fn from_state(mut state: PulseState) -> Result<Self, PulseError> {
        if state.health > 100 {
            return Err(PulseError::HealthOutOfRange(state.health));
        }
        if state.status != PulseStatus::Cooldown {
            state.cooldown_remaining_secs = 0;
        } else if state.cooldown_remaining_secs == 0 {
            state.status = PulseStatus::Active;
        }
        let (tx, _rx) = watch::channel(state);
        Ok(Self { tx: Arc::new(tx) })
    }

    /// Restores the monitor saved at `path`, counting down the cooldown by the
    /// time spent on disk. A missing file starts a fresh monitor.
    pub fn open(path: &Path, batch_total: u32) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::new(batch_total));
        }
        let saved: SavedPulse = serde_json::from_str(&fs::read_to_string(path)?)?;
        let mut state = saved.state;
        state.batch_total = batch_total;
        let monitor = Self::from_state(state)?;

        let away = (Utc::now() - saved.saved_at).num_seconds().max(0) as u64;
        monitor.tick(away);
        Ok(monitor)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let saved = SavedPulse {
            state: self.snapshot(),
            saved_at: Utc::now(),
        };
        fs::write(path, serde_json::to_string_pretty(&saved)?)?;
        Ok(())
    }

    pub fn snapshot(&self) -> PulseState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PulseState> {
        self.tx.subscribe()
    }

    /// Applies `f` to the state, publishing only when it returns `Ok`.
    fn transition<F>(&self, f: F) -> Result<(), PulseError>
    where
        F: FnOnce(&mut PulseState) -> Result<(), PulseError>,
    {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            let mut next = state.clone();
            result = f(&mut next);
            if result.is_ok() && next != *state {
                *state = next;
                true
            } else {
                false
            }
        });
        result
    }

    pub fn set_health(&self, health: u8) -> Result<(), PulseError> {
        if health > 100 {
            return Err(PulseError::HealthOutOfRange(health));
        }
        self.transition(|s| {
            s.health = health;
            Ok(())
        })
    }

    /// Starts a cooldown from `active`. A zero-length cooldown leaves the status untouched.
    pub fn start_cooldown(&self, secs: u64) -> Result<(), PulseError> {
        self.transition(|s| {
            if s.status != PulseStatus::Active {
                return Err(PulseError::IllegalTransition {
                    from: s.status,
                    to: PulseStatus::Cooldown,
                });
            }
            if secs > 0 {
                s.status = PulseStatus::Cooldown;
                s.cooldown_remaining_secs = secs;
            }
            Ok(())
        })?;
        info!(secs, "pulse cooldown started");
        Ok(())
    }

    /// Counts a running cooldown down by `secs`; reaching zero returns to `active`.
    pub fn tick(&self, secs: u64) {
        let _ = self.transition(|s| {
            if s.status == PulseStatus::Cooldown {
                s.cooldown_remaining_secs = s.cooldown_remaining_secs.saturating_sub(secs);
                if s.cooldown_remaining_secs == 0 {
                    s.status = PulseStatus::Active;
                    info!("pulse cooldown finished");
                }
            }
            Ok(())
        });
    }

    /// Counts one submission towards the current batch.
    pub fn record_submission(&self) {
        let _ = self.transition(|s| {
            if s.status != PulseStatus::Active {
                return Ok(());
            }
            s.batch_index = s.batch_index.saturating_add(1);
            if s.batch_total > 0 && s.batch_index >= s.batch_total {
                s.status = PulseStatus::AwaitingApproval;
                info!(batch = s.batch_index, "batch limit reached, awaiting approval");
            }
            Ok(())
        });
    }

    /// Human sign-off on a finished batch: resets it and enters cooldown.
    pub fn approve_batch(&self, cooldown_secs: u64) -> Result<(), PulseError> {
        self.transition(|s| {
            if s.status != PulseStatus::AwaitingApproval {
                return Err(PulseError::IllegalTransition {
                    from: s.status,
                    to: PulseStatus::Cooldown,
                });
            }
            s.batch_index = 0;
            if cooldown_secs > 0 {
                s.status = PulseStatus::Cooldown;
                s.cooldown_remaining_secs = cooldown_secs;
            } else {
                s.status = PulseStatus::Active;
            }
            Ok(())
        })
    }

    pub fn halt(&self) -> Result<(), PulseError> {
        self.transition(|s| {
            if s.status == PulseStatus::Halted {
                return Err(PulseError::IllegalTransition {
                    from: s.status,
                    to: PulseStatus::Halted,
                });
            }
            s.status = PulseStatus::Halted;
            s.cooldown_remaining_secs = 0;
            Ok(())
        })?;
        warn!("pulse halted");
        Ok(())
    }

    /// External reset out of `halted`: fresh batch, full health.
    pub fn reset(&self) -> Result<(), PulseError> {
        self.transition(|s| {
            if s.status != PulseStatus::Halted {
                return Err(PulseError::IllegalTransition {
                    from: s.status,
                    to: PulseStatus::Active,
                });
            }
            *s = PulseState::new(s.batch_total);
            Ok(())
        })
    }

    /// Drives [`PulseMonitor::tick`] every `period` until `cancel` fires.
    pub fn spawn_ticker(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        let step = period.as_secs().max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => monitor.tick(step),
                }
            }
        })
    }
}
