//! Append-only application ledger shared by the engine and the manual apply flow.
//!
//! The ledger is the dedup source of truth: no two records may share a
//! [`JobIdentity`]. [`Ledger::submit`] checks and appends under one lock so
//! concurrent writers cannot both win.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, LedgerError};
use crate::jobs::{JobCandidate, JobIdentity};

/// Column order of [`Ledger::rows`].
pub const EXPORT_COLUMNS: [&str; 7] = ["id", "company", "title", "date", "status", "score", "source"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Applied,
    Response,
    Interview,
    Rejected,
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationStatus::Applied => write!(f, "Applied"),
            ApplicationStatus::Response => write!(f, "Response"),
            ApplicationStatus::Interview => write!(f, "Interview"),
            ApplicationStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: String,
    #[serde(flatten)]
    pub identity: JobIdentity,
    pub submitted_at: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub match_score: u8,
    pub source: String,
}

impl ApplicationRecord {
    /// Flat export row in [`EXPORT_COLUMNS`] order.
    pub fn row(&self) -> [String; 7] {
        [
            self.id.clone(),
            self.identity.company.clone(),
            self.identity.title.clone(),
            self.submitted_at.format("%Y-%m-%d").to_string(),
            self.status.to_string(),
            self.match_score.to_string(),
            self.source.clone(),
        ]
    }
}

/// Aggregate numbers shown on the analytics view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub applied: usize,
    pub responses: usize,
    pub interviews: usize,
    pub rejected: usize,
    /// Percentage of records that got any reply (response, interview or rejection).
    pub response_rate: f64,
    pub interview_rate: f64,
    pub avg_match_score: f64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    records: Vec<ApplicationRecord>,
    identities: HashSet<JobIdentity>,
    ids: HashSet<String>,
}

/// Cloneable handle to a shared ledger.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    inner: Arc<Mutex<LedgerInner>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a ledger saved by [`Ledger::save`]. A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let ledger = Self::new();
        if !path.exists() {
            return Ok(ledger);
        }
        let contents = fs::read_to_string(path)?;
        let records: Vec<ApplicationRecord> = serde_json::from_str(&contents)?;
        for record in records {
            ledger.append(record)?;
        }
        Ok(ledger)
    }

    /// Writes every record as a JSON array, replacing the file.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.records())?;
        fs::write(path, json)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        // Mutations validate before touching any collection, so a poisoned
        // lock still guards a consistent ledger.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a fully-formed record, e.g. history imported from elsewhere.
    pub fn append(&self, record: ApplicationRecord) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.identities.contains(&record.identity) {
            return Err(LedgerError::Duplicate(record.identity));
        }
        if inner.ids.contains(&record.id) {
            return Err(LedgerError::DuplicateId(record.id));
        }
        inner.identities.insert(record.identity.clone());
        inner.ids.insert(record.id.clone());
        inner.records.push(record);
        Ok(())
    }

    /// Records a new `Applied` submission for `job`, assigning the next sequential id.
    pub fn submit(&self, job: &JobCandidate) -> Result<ApplicationRecord, LedgerError> {
        let mut inner = self.lock();
        if inner.identities.contains(&job.identity) {
            return Err(LedgerError::Duplicate(job.identity.clone()));
        }

        let mut seq = inner.records.len() + 1;
        let id = loop {
            let candidate = format!("APP_{seq:03}");
            if !inner.ids.contains(&candidate) {
                break candidate;
            }
            seq += 1;
        };

        let record = ApplicationRecord {
            id,
            identity: job.identity.clone(),
            submitted_at: Utc::now(),
            status: ApplicationStatus::Applied,
            match_score: job.match_score,
            source: job.source.clone(),
        };
        inner.identities.insert(record.identity.clone());
        inner.ids.insert(record.id.clone());
        inner.records.push(record.clone());
        Ok(record)
    }

    pub fn contains(&self, identity: &JobIdentity) -> bool {
        self.lock().identities.contains(identity)
    }

    /// Point-in-time copy of every identity in the ledger.
    pub fn snapshot(&self) -> HashSet<JobIdentity> {
        self.lock().identities.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<ApplicationRecord> {
        self.lock().records.clone()
    }

    pub fn rows(&self) -> Vec<[String; 7]> {
        self.lock().records.iter().map(ApplicationRecord::row).collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let inner = self.lock();
        let total = inner.records.len();
        let count = |status: ApplicationStatus| inner.records.iter().filter(|r| r.status == status).count();
        let applied = count(ApplicationStatus::Applied);
        let responses = count(ApplicationStatus::Response);
        let interviews = count(ApplicationStatus::Interview);
        let rejected = count(ApplicationStatus::Rejected);

        let pct = |n: usize| if total == 0 { 0.0 } else { n as f64 * 100.0 / total as f64 };
        let avg_match_score = if total == 0 {
            0.0
        } else {
            inner.records.iter().map(|r| f64::from(r.match_score)).sum::<f64>() / total as f64
        };

        LedgerSummary {
            total,
            applied,
            responses,
            interviews,
            rejected,
            response_rate: pct(total - applied),
            interview_rate: pct(interviews),
            avg_match_score,
        }
    }
}
