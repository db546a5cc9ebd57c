use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineError::MalformedJob};
use crate::jobs::JobCandidate;

use super::state::Stage;

/// Everything the pipeline has produced for one job so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDraft {
    pub requirements: Vec<String>,
    pub matched_skills: Vec<String>,
    pub bullets: Vec<String>,
    pub cover_letter: Option<String>,
}

/// How a pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineOutcome {
    Submitted,
    Skipped,
}

/// What happens at the `ReadyForApproval` suspend point during an engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    /// Confirm automatically. Only meaningful for unattended runs.
    #[default]
    Auto,
    /// Block the run until the caller approves or skips each job.
    Manual,
}

/// Resume tailoring steps, one per automatic pipeline stage.
///
/// The content each step produces is opaque to the pipeline; only success or
/// failure matters for control flow.
pub trait Tailor: Send + Sync {
    fn analyze(&self, job: &JobCandidate) -> Result<Vec<String>, PipelineError>;

    fn map_skills(
        &self,
        job: &JobCandidate,
        requirements: &[String],
    ) -> Result<Vec<String>, PipelineError>;

    fn rephrase(&self, job: &JobCandidate, skills: &[String]) -> Result<Vec<String>, PipelineError>;

    fn cover_letter(
        &self,
        job: &JobCandidate,
        draft: &ApplicationDraft,
    ) -> Result<String, PipelineError>;
}

/// Keyword-and-template tailor backed by the profile in config.
#[derive(Debug, Clone)]
pub struct TemplateTailor {
    skills: Vec<String>,
    highlight: String,
}

const MAX_BULLETS: usize = 3;

impl TemplateTailor {
    pub fn new(skills: Vec<String>, highlight: String) -> Self {
        Self { skills, highlight }
    }
}

impl Tailor for TemplateTailor {
    fn analyze(&self, job: &JobCandidate) -> Result<Vec<String>, PipelineError> {
        if job.company().trim().is_empty() {
            return Err(MalformedJob("missing company".into()));
        }
        if job.title().trim().is_empty() {
            return Err(MalformedJob("missing title".into()));
        }
        Ok(job.tags.clone())
    }

    fn map_skills(
        &self,
        _job: &JobCandidate,
        requirements: &[String],
    ) -> Result<Vec<String>, PipelineError> {
        Ok(requirements
            .iter()
            .filter(|req| self.skills.iter().any(|s| s.eq_ignore_ascii_case(req)))
            .cloned()
            .collect())
    }

    fn rephrase(&self, job: &JobCandidate, skills: &[String]) -> Result<Vec<String>, PipelineError> {
        Ok(skills
            .iter()
            .take(MAX_BULLETS)
            .map(|skill| format!("Delivered {skill} outcomes relevant to the {} role", job.title()))
            .collect())
    }

    fn cover_letter(
        &self,
        job: &JobCandidate,
        _draft: &ApplicationDraft,
    ) -> Result<String, PipelineError> {
        Ok(format!(
            "I came across the {title} role at {company} and it aligns well with my background. \
             {highlight} I'd love to bring this experience to {company}'s team.",
            title = job.title(),
            company = job.company(),
            highlight = self.highlight,
        ))
    }
}

/// Failure helper for tailors that cannot produce a stage's output.
pub fn stage_failed(stage: Stage, reason: impl Into<String>) -> PipelineError {
    PipelineError::Tailor {
        stage,
        reason: reason.into(),
    }
}
