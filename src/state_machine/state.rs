use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::draft::{ApplicationDraft, PipelineOutcome, Tailor};
use crate::error::PipelineError;
use crate::jobs::JobCandidate;

/// Stages of a single job submission.
///
/// Each job flows through: ANALYZING_JD → MAPPING_SKILLS → REPHRASING_BULLETS →
/// DRAFTING_COVER_LETTER → READY_FOR_APPROVAL → SUBMITTED | SKIPPED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    AnalyzingJd,
    MappingSkills,
    RephrasingBullets,
    DraftingCoverLetter,
    ReadyForApproval,
    Submitted,
    Skipped,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::AnalyzingJd => write!(f, "Analyzing JD"),
            Stage::MappingSkills => write!(f, "Mapping Skills"),
            Stage::RephrasingBullets => write!(f, "Rephrasing Bullets"),
            Stage::DraftingCoverLetter => write!(f, "Writing Cover Letter"),
            Stage::ReadyForApproval => write!(f, "Ready to Submit"),
            Stage::Submitted => write!(f, "Submitted"),
            Stage::Skipped => write!(f, "Skipped"),
        }
    }
}

impl Stage {
    /// Stages that advance on their own once the stage interval has elapsed.
    pub fn is_automatic(self) -> bool {
        matches!(
            self,
            Stage::AnalyzingJd | Stage::MappingSkills | Stage::RephrasingBullets | Stage::DraftingCoverLetter
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Submitted | Stage::Skipped)
    }

    fn next_automatic(self) -> Option<Stage> {
        match self {
            Stage::AnalyzingJd => Some(Stage::MappingSkills),
            Stage::MappingSkills => Some(Stage::RephrasingBullets),
            Stage::RephrasingBullets => Some(Stage::DraftingCoverLetter),
            Stage::DraftingCoverLetter => Some(Stage::ReadyForApproval),
            _ => None,
        }
    }
}

/// The result of advancing the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still in the given stage (interval not yet elapsed, or suspended).
    Stay(Stage),
    /// Moved forward; carries the stage now current.
    Next(Stage),
    Complete(PipelineOutcome),
}

/// Drives one job through the submission stages.
///
/// Time only moves through [`SubmissionPipeline::tick`], so the machine can be
/// stepped deterministically without a clock.
#[derive(Debug, Clone)]
pub struct SubmissionPipeline {
    job: JobCandidate,
    stage: Stage,
    history: Vec<Stage>,
    elapsed: Duration,
    interval: Duration,
    draft: ApplicationDraft,
}

impl SubmissionPipeline {
    pub fn new(job: JobCandidate, interval: Duration) -> Self {
        Self {
            job,
            stage: Stage::AnalyzingJd,
            history: Vec::new(),
            elapsed: Duration::ZERO,
            interval,
            draft: ApplicationDraft::default(),
        }
    }

    pub fn job(&self) -> &JobCandidate {
        &self.job
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn draft(&self) -> &ApplicationDraft {
        &self.draft
    }

    pub fn cover_letter(&self) -> Option<&str> {
        self.draft.cover_letter.as_deref()
    }

    /// Time left before the current automatic stage completes.
    pub fn remaining_in_stage(&self) -> Duration {
        if self.stage.is_automatic() {
            self.interval.saturating_sub(self.elapsed)
        } else {
            Duration::ZERO
        }
    }

    /// Fraction of the four automatic stages already completed.
    pub fn progress(&self) -> f32 {
        let done = self.history.iter().filter(|s| s.is_automatic()).count();
        done as f32 / 4.0
    }

    /// Lets `dt` pass. Every full interval runs the current stage's tailoring
    /// step and advances; suspended and terminal stages ignore time.
    pub fn tick<T: Tailor + ?Sized>(
        &mut self,
        dt: Duration,
        tailor: &T,
    ) -> Result<Transition, PipelineError> {
        if !self.stage.is_automatic() {
            return Ok(Transition::Stay(self.stage));
        }

        self.elapsed += dt;
        let mut transition = Transition::Stay(self.stage);
        while self.elapsed >= self.interval {
            let Some(next) = self.stage.next_automatic() else {
                break;
            };
            self.run_stage(tailor)?;
            self.elapsed -= self.interval;
            self.advance(next);
            transition = Transition::Next(next);
        }
        if !self.stage.is_automatic() {
            self.elapsed = Duration::ZERO;
        }
        Ok(transition)
    }

    fn run_stage<T: Tailor + ?Sized>(&mut self, tailor: &T) -> Result<(), PipelineError> {
        match self.stage {
            Stage::AnalyzingJd => self.draft.requirements = tailor.analyze(&self.job)?,
            Stage::MappingSkills => {
                self.draft.matched_skills = tailor.map_skills(&self.job, &self.draft.requirements)?
            }
            Stage::RephrasingBullets => {
                self.draft.bullets = tailor.rephrase(&self.job, &self.draft.matched_skills)?
            }
            Stage::DraftingCoverLetter => {
                self.draft.cover_letter = Some(tailor.cover_letter(&self.job, &self.draft)?)
            }
            _ => {}
        }
        Ok(())
    }

    fn advance(&mut self, next: Stage) {
        self.history.push(self.stage);
        self.stage = next;
    }

    fn require_approval_stage(&self, action: &'static str) -> Result<(), PipelineError> {
        if self.stage == Stage::ReadyForApproval {
            Ok(())
        } else {
            Err(PipelineError::InvalidAction {
                action,
                stage: self.stage,
            })
        }
    }

    /// Replaces the drafted cover letter. Only allowed while awaiting approval.
    pub fn edit_cover_letter(&mut self, text: impl Into<String>) -> Result<(), PipelineError> {
        self.require_approval_stage("edit the cover letter")?;
        self.draft.cover_letter = Some(text.into());
        Ok(())
    }

    pub fn approve(&mut self) -> Result<Transition, PipelineError> {
        self.require_approval_stage("approve")?;
        self.advance(Stage::Submitted);
        Ok(Transition::Complete(PipelineOutcome::Submitted))
    }

    pub fn skip(&mut self) -> Result<Transition, PipelineError> {
        self.require_approval_stage("skip")?;
        self.advance(Stage::Skipped);
        Ok(Transition::Complete(PipelineOutcome::Skipped))
    }
}
