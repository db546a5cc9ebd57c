//! Job candidates, their `(company, title)` identity, and the caller-side filter.
//!
//! Listings are immutable once fetched. The engine only reads them; the
//! [`CandidateFilter`] narrows a listing down before a run starts and never
//! reorders it.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Dedup key for candidates and ledger records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobIdentity {
    pub company: String,
    pub title: String,
}

impl JobIdentity {
    pub fn new(company: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            title: title.into(),
        }
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.title, self.company)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkType {
    Remote,
    Hybrid,
    #[serde(rename = "Work from Office")]
    OnSite,
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkType::Remote => write!(f, "Remote"),
            WorkType::Hybrid => write!(f, "Hybrid"),
            WorkType::OnSite => write!(f, "Work from Office"),
        }
    }
}

/// A single job posting as supplied by a listing source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCandidate {
    #[serde(flatten)]
    pub identity: JobIdentity,
    /// Match against the candidate profile, 0–100. Computed upstream.
    pub match_score: u8,
    pub source: String,
    #[serde(default)]
    pub posted_at: String,
    #[serde(default)]
    pub compensation: String,
    pub work_type: WorkType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl JobCandidate {
    pub fn company(&self) -> &str {
        &self.identity.company
    }

    pub fn title(&self) -> &str {
        &self.identity.title
    }
}

/// Caller-side narrowing of a listing. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateFilter {
    pub source: Option<String>,
    pub work_type: Option<WorkType>,
    pub location: Option<String>,
    pub min_match: u8,
    pub search: Option<String>,
}

impl CandidateFilter {
    pub fn matches(&self, job: &JobCandidate) -> bool {
        if let Some(source) = &self.source
            && !job.source.eq_ignore_ascii_case(source)
        {
            return false;
        }
        if let Some(work_type) = self.work_type
            && job.work_type != work_type
        {
            return false;
        }
        if let Some(location) = &self.location
            && !job.location.contains(location.as_str())
        {
            return false;
        }
        if job.match_score < self.min_match {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !job.title().to_lowercase().contains(&needle)
                && !job.company().to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }

    /// Keeps matching jobs in their original order.
    pub fn apply(&self, jobs: &[JobCandidate]) -> Vec<JobCandidate> {
        jobs.iter().filter(|j| self.matches(j)).cloned().collect()
    }
}

/// Reads a JSON array of candidates from disk.
pub fn load_catalog(path: &Path) -> Result<Vec<JobCandidate>, EngineError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Built-in listing used when no `--jobs` file is given.
pub fn sample_catalog() -> Vec<JobCandidate> {
    let rows: &[(&str, &str, u8, &str, &str, WorkType, &str, &str, &[&str])] = &[
        ("Razorpay", "Senior Product Manager", 94, "LinkedIn", "2h ago", WorkType::Hybrid, "Bangalore, IN", "₹25-35 LPA", &["Product", "Fintech", "B2B"]),
        ("Zoho Payroll", "Product Specialist - Payroll", 91, "Naukri", "5h ago", WorkType::Remote, "Chennai, IN", "₹18-24 LPA", &["Payroll", "HR Tech", "SaaS"]),
        ("Stripe India", "Integration Engineer", 88, "LinkedIn", "1d ago", WorkType::Remote, "Bangalore, IN", "₹30-42 LPA", &["API", "Python", "Fintech"]),
        ("Salesforce", "Technical Account Manager", 82, "Indeed", "2d ago", WorkType::OnSite, "Mumbai, IN", "₹22-30 LPA", &["CRM", "B2B", "SaaS"]),
        ("Freshworks", "Solutions Engineer", 79, "Naukri", "3d ago", WorkType::Remote, "Chennai, IN", "₹20-28 LPA", &["Solutions", "Pre-sales", "SaaS"]),
        ("CRED", "Product Operations Manager", 76, "LinkedIn", "4d ago", WorkType::Hybrid, "Bangalore, IN", "₹28-38 LPA", &["Operations", "Fintech", "Growth"]),
        ("Doist", "Remote Product Lead", 85, "WeWorkRemotely", "1h ago", WorkType::Remote, "Worldwide", "$80-110K", &["Product", "Remote", "Async"]),
        ("Loom", "Senior Backend Engineer", 83, "Remotive", "3h ago", WorkType::Remote, "Worldwide", "$90-130K", &["Python", "API", "Remote"]),
        ("Groww", "Growth PM", 86, "Wellfound", "8h ago", WorkType::Hybrid, "Bangalore, IN", "₹22-32 LPA", &["Growth", "Product", "Fintech"]),
        ("Postman", "DevRel Engineer", 80, "Wellfound", "12h ago", WorkType::Remote, "Remote", "$85-115K", &["Developer Relations", "API", "Community"]),
        ("PhonePe", "Product Analyst", 74, "Glassdoor", "1d ago", WorkType::OnSite, "Bangalore, IN", "₹16-22 LPA", &["Analytics", "Fintech", "SQL"]),
        ("Setu", "Technical PM", 89, "AngelList", "3d ago", WorkType::Hybrid, "Bangalore, IN", "₹20-30 LPA + ESOPs", &["Fintech", "API", "B2B"]),
    ];

    rows.iter()
        .map(
            |&(company, title, score, source, posted, work_type, location, pay, tags)| JobCandidate {
                identity: JobIdentity::new(company, title),
                match_score: score,
                source: source.to_string(),
                posted_at: posted.to_string(),
                compensation: pay.to_string(),
                work_type,
                location: location.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        )
        .collect()
}

#[cfg(test)]
pub(crate) fn candidate(company: &str, title: &str) -> JobCandidate {
    JobCandidate {
        identity: JobIdentity::new(company, title),
        match_score: 80,
        source: "LinkedIn".into(),
        posted_at: "1h ago".into(),
        compensation: String::new(),
        work_type: WorkType::Remote,
        location: "Remote".into(),
        tags: vec!["API".into(), "Product".into()],
    }
}
