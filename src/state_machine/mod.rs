mod draft;
mod driver;
mod state;

pub use draft::{ApplicationDraft, ApprovalPolicy, PipelineOutcome, Tailor, TemplateTailor, stage_failed};
pub use driver::{ApprovalDecision, ApprovalRequest, Approver, drive};
pub use state::{Stage, SubmissionPipeline, Transition};
