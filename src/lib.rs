//! Paced, cancellable auto-apply engine for job applications.
//!
//! The [`engine::AutoApplyEngine`] walks a filtered job list, drives each job
//! through the [`state_machine::SubmissionPipeline`], records submissions in the
//! [`ledger::Ledger`], and pauses or stops according to the [`pulse::PulseMonitor`].

pub mod activity;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod pacing;
pub mod pulse;
pub mod state_machine;
pub mod ui;
