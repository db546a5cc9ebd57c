//! Async driver that runs a [`SubmissionPipeline`] in real (or paused tokio) time.

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::draft::{PipelineOutcome, Tailor};
use super::state::{Stage, SubmissionPipeline, Transition};
use crate::error::PipelineError;
use crate::jobs::JobIdentity;

/// Answer to an [`ApprovalRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Submit, optionally with an edited cover letter.
    Approve { cover_letter: Option<String> },
    Skip,
}

/// A job parked at the approval suspend point, waiting for a human decision.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub identity: JobIdentity,
    pub match_score: u8,
    pub cover_letter: String,
    responder: oneshot::Sender<ApprovalDecision>,
}

impl ApprovalRequest {
    pub fn approve(self) {
        self.respond(ApprovalDecision::Approve { cover_letter: None });
    }

    pub fn approve_with(self, cover_letter: String) {
        self.respond(ApprovalDecision::Approve {
            cover_letter: Some(cover_letter),
        });
    }

    pub fn skip(self) {
        self.respond(ApprovalDecision::Skip);
    }

    pub fn respond(self, decision: ApprovalDecision) {
        // The run may have been cancelled meanwhile; nobody is left to tell.
        let _ = self.responder.send(decision);
    }
}

/// Who resolves the `ReadyForApproval` suspend point.
#[derive(Debug, Clone)]
pub enum Approver {
    Auto,
    Manual(mpsc::Sender<ApprovalRequest>),
}

/// Runs `pipeline` until it reaches a terminal stage.
///
/// Each automatic stage sleeps out its remaining interval; `cancel` interrupts
/// any wait, including the wait for an approval decision. A manual approver
/// that hangs up counts as a skip.
pub async fn drive<T: Tailor + ?Sized>(
    pipeline: &mut SubmissionPipeline,
    tailor: &T,
    approver: &Approver,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome, PipelineError> {
    loop {
        match pipeline.stage() {
            Stage::Submitted => return Ok(PipelineOutcome::Submitted),
            Stage::Skipped => return Ok(PipelineOutcome::Skipped),
            Stage::ReadyForApproval => {
                let decision = match approver {
                    Approver::Auto => ApprovalDecision::Approve { cover_letter: None },
                    Approver::Manual(tx) => request_approval(pipeline, tx, cancel).await?,
                };
                match decision {
                    ApprovalDecision::Approve { cover_letter } => {
                        if let Some(text) = cover_letter {
                            pipeline.edit_cover_letter(text)?;
                        }
                        pipeline.approve()?;
                    }
                    ApprovalDecision::Skip => {
                        pipeline.skip()?;
                    }
                }
            }
            _ => {
                let wait = pipeline.remaining_in_stage();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = sleep(wait) => {}
                }
                if let Transition::Next(stage) = pipeline.tick(wait, tailor)? {
                    debug!(job = %pipeline.job().identity, %stage, "pipeline advanced");
                }
            }
        }
    }
}

async fn request_approval(
    pipeline: &SubmissionPipeline,
    tx: &mpsc::Sender<ApprovalRequest>,
    cancel: &CancellationToken,
) -> Result<ApprovalDecision, PipelineError> {
    let (responder, answer) = oneshot::channel();
    let request = ApprovalRequest {
        identity: pipeline.job().identity.clone(),
        match_score: pipeline.job().match_score,
        cover_letter: pipeline.cover_letter().unwrap_or_default().to_string(),
        responder,
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        sent = tx.send(request) => {
            if sent.is_err() {
                return Ok(ApprovalDecision::Skip);
            }
        }
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        decision = answer => Ok(decision.unwrap_or(ApprovalDecision::Skip)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::jobs::candidate;
    use crate::state_machine::TemplateTailor;

    const STEP: Duration = Duration::from_millis(900);

    fn tailor() -> TemplateTailor {
        TemplateTailor::new(vec!["API".into()], "Shipped payroll APIs.".into())
    }

    #[tokio::test(start_paused = true)]
    async fn auto_approver_submits_after_four_intervals() {
        let mut p = SubmissionPipeline::new(candidate("Acme", "Engineer"), STEP);
        let started = tokio::time::Instant::now();

        let outcome = drive(&mut p, &tailor(), &Approver::Auto, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PipelineOutcome::Submitted);
        let elapsed = started.elapsed();
        assert!(elapsed >= STEP * 4 && elapsed < STEP * 5, "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn manual_approver_can_edit_and_approve() {
        let (tx, mut rx) = mpsc::channel::<ApprovalRequest>(1);
        let mut p = SubmissionPipeline::new(candidate("Acme", "Engineer"), STEP);

        let reviewer = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.identity, JobIdentity::new("Acme", "Engineer"));
            assert!(request.cover_letter.contains("Acme"));
            request.approve_with("Custom letter".into());
        });

        let outcome = drive(&mut p, &tailor(), &Approver::Manual(tx), &CancellationToken::new())
            .await
            .unwrap();
        reviewer.await.unwrap();

        assert_eq!(outcome, PipelineOutcome::Submitted);
        assert_eq!(p.cover_letter(), Some("Custom letter"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_reviewer_counts_as_skip() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut p = SubmissionPipeline::new(candidate("Acme", "Engineer"), STEP);

        let outcome = drive(&mut p, &tailor(), &Approver::Manual(tx), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_stage_wait() {
        let cancel = CancellationToken::new();
        let mut p = SubmissionPipeline::new(candidate("Acme", "Engineer"), STEP);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1000)).await;
            trigger.cancel();
        });

        let err = drive(&mut p, &tailor(), &Approver::Auto, &cancel).await.unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
        assert_eq!(p.stage(), Stage::MappingSkills);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_approval_wait() {
        let (tx, mut rx) = mpsc::channel::<ApprovalRequest>(1);
        let cancel = CancellationToken::new();
        let mut p = SubmissionPipeline::new(candidate("Acme", "Engineer"), STEP);

        let trigger = cancel.clone();
        let reviewer = tokio::spawn(async move {
            // Hold the request without answering.
            let request = rx.recv().await.unwrap();
            trigger.cancel();
            request
        });

        let err = drive(&mut p, &tailor(), &Approver::Manual(tx), &cancel).await.unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
        assert_eq!(p.stage(), Stage::ReadyForApproval);
        drop(reviewer.await.unwrap());
    }
}
