use std::collections::VecDeque;
use std::fmt;
use std::mem::discriminant;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::activity::{EngineEvent, LogEvent, LogPhase};
use crate::error::{EngineError, FailureKind, LedgerError, PipelineError};
use crate::jobs::{JobCandidate, JobIdentity};
use crate::ledger::{ApplicationRecord, Ledger};
use crate::pacing::{PacingPolicy, SpeedTier};
use crate::pulse::{Gate, PauseReason, PulseMonitor, PulseStatus};
use crate::state_machine::{
    ApprovalPolicy, ApprovalRequest, Approver, PipelineOutcome, SubmissionPipeline, Tailor, drive,
};

/// Tunables for a run, usually built from config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub pacing: PacingPolicy,
    /// Time each automatic pipeline stage takes.
    pub stage_interval: Duration,
    /// Runs pause while pulse health is below this.
    pub health_floor: u8,
    pub approval: ApprovalPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pacing: PacingPolicy::default(),
            stage_interval: Duration::from_millis(900),
            health_floor: 40,
            approval: ApprovalPolicy::Auto,
        }
    }
}

/// Terminal result of a run, with the number of applications submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Completed(usize),
    Cancelled(usize),
    Halted(usize),
}

impl RunOutcome {
    pub fn submitted(self) -> usize {
        match self {
            RunOutcome::Completed(n) | RunOutcome::Cancelled(n) | RunOutcome::Halted(n) => n,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed(n) => write!(f, "completed, {n} submitted"),
            RunOutcome::Cancelled(n) => write!(f, "cancelled, {n} submitted"),
            RunOutcome::Halted(n) => write!(f, "halted by pulse, {n} submitted"),
        }
    }
}

/// State owned by exactly one run; dropped when the run ends.
#[derive(Debug)]
struct EngineRunState {
    speed_tier: SpeedTier,
    remaining: VecDeque<JobCandidate>,
    submitted: usize,
    cancel: CancellationToken,
}

impl EngineRunState {
    fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Caller's side of an active run.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: Uuid,
    /// Candidates left after removing those already in the ledger.
    pub eligible: usize,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
    /// Present only under [`ApprovalPolicy::Manual`].
    pub approvals: Option<mpsc::Receiver<ApprovalRequest>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<RunOutcome>>,
    outcome: Option<RunOutcome>,
}

impl RunHandle {
    /// Requests cancellation. Safe to call any number of times, before or after the run ends.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the run to finish. Later calls return the same outcome.
    pub async fn wait(&mut self) -> Result<RunOutcome, EngineError> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }
        let task = self
            .task
            .take()
            .ok_or_else(|| EngineError::RunAborted("run task already joined".into()))?;
        let outcome = task
            .await
            .map_err(|err| EngineError::RunAborted(err.to_string()))?;
        self.outcome = Some(outcome);
        Ok(outcome)
    }
}

/// Clears the engine's active-run slot when the run task ends, however it ends.
struct ActiveSlot(Arc<Mutex<Option<CancellationToken>>>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let mut slot = self.0.lock().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }
}

/// Paces automated submissions over a candidate list, one run at a time.
pub struct AutoApplyEngine {
    settings: EngineSettings,
    pulse: PulseMonitor,
    tailor: Arc<dyn Tailor>,
    profile_ready: Arc<AtomicBool>,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl AutoApplyEngine {
    pub fn new(settings: EngineSettings, pulse: PulseMonitor, tailor: Arc<dyn Tailor>) -> Self {
        Self {
            settings,
            pulse,
            tailor,
            profile_ready: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn pulse(&self) -> &PulseMonitor {
        &self.pulse
    }

    /// Marks the resume/profile as uploaded. Runs refuse to start until then.
    pub fn mark_profile_ready(&self) {
        self.profile_ready.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Starts a run on the current tokio runtime.
    ///
    /// The eligible set is computed here from a snapshot of `ledger`; writes
    /// made to the ledger after this call do not change it. Fails without side
    /// effects when the profile is not ready or another run is active.
    pub fn start(
        &self,
        candidates: Vec<JobCandidate>,
        ledger: &Ledger,
        speed_tier: SpeedTier,
    ) -> Result<RunHandle, EngineError> {
        if !self.profile_ready.load(Ordering::Acquire) {
            return Err(EngineError::PreconditionNotMet(
                "upload your resume before using auto-apply".into(),
            ));
        }

        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if active.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let snapshot = ledger.snapshot();
        let remaining: VecDeque<JobCandidate> = candidates
            .into_iter()
            .filter(|job| !snapshot.contains(&job.identity))
            .collect();

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        *active = Some(cancel.clone());
        drop(active);

        let (events_tx, events) = mpsc::unbounded_channel();
        let (approver, approvals) = match self.settings.approval {
            ApprovalPolicy::Auto => (Approver::Auto, None),
            ApprovalPolicy::Manual => {
                let (tx, rx) = mpsc::channel(1);
                (Approver::Manual(tx), Some(rx))
            }
        };

        let eligible = remaining.len();
        let run = Run {
            state: EngineRunState {
                speed_tier,
                remaining,
                submitted: 0,
                cancel: cancel.clone(),
            },
            ledger: ledger.clone(),
            pulse: self.pulse.clone(),
            tailor: Arc::clone(&self.tailor),
            settings: self.settings.clone(),
            approver,
            events: events_tx,
            next_entry_id: 0,
        };

        let slot = ActiveSlot(Arc::clone(&self.active));
        let span = info_span!("auto_apply", %run_id, tier = %speed_tier);
        let task = tokio::spawn(
            async move {
                let _slot = slot;
                run.execute().await
            }
            .instrument(span),
        );

        Ok(RunHandle {
            run_id,
            eligible,
            events,
            approvals,
            cancel,
            task: Some(task),
            outcome: None,
        })
    }

    /// Cancels the active run, if any. No-op otherwise.
    pub fn cancel(&self) {
        if let Some(token) = self.active.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            token.cancel();
        }
    }

    /// Single-job flow outside any run. Always waits for an explicit decision
    /// on `approvals`; returns `None` when the job was skipped.
    pub async fn apply_single(
        &self,
        job: JobCandidate,
        ledger: &Ledger,
        approvals: mpsc::Sender<ApprovalRequest>,
        cancel: &CancellationToken,
    ) -> Result<Option<ApplicationRecord>, EngineError> {
        if ledger.contains(&job.identity) {
            return Err(LedgerError::Duplicate(job.identity).into());
        }

        let mut pipeline = SubmissionPipeline::new(job, self.settings.stage_interval);
        let approver = Approver::Manual(approvals);
        match drive(&mut pipeline, &*self.tailor, &approver, cancel).await? {
            PipelineOutcome::Submitted => {
                let record = ledger.submit(pipeline.job())?;
                info!(id = %record.id, job = %record.identity, "application submitted");
                Ok(Some(record))
            }
            PipelineOutcome::Skipped => Ok(None),
        }
    }
}

enum Clearance {
    Clear,
    Halted,
    Cancelled,
}

enum Step {
    Continue,
    Cancelled,
    Halted,
}

struct Run {
    state: EngineRunState,
    ledger: Ledger,
    pulse: PulseMonitor,
    tailor: Arc<dyn Tailor>,
    settings: EngineSettings,
    approver: Approver,
    events: mpsc::UnboundedSender<EngineEvent>,
    next_entry_id: u64,
}

impl Run {
    async fn execute(mut self) -> RunOutcome {
        info!(eligible = self.state.remaining.len(), "auto-apply run started");

        let outcome = loop {
            let submitted = self.state.submitted;
            if self.state.cancel_requested() {
                break RunOutcome::Cancelled(submitted);
            }
            if self.state.remaining.is_empty() {
                break RunOutcome::Completed(submitted);
            }
            match self.await_clearance().await {
                Clearance::Clear => {}
                Clearance::Halted => break RunOutcome::Halted(submitted),
                Clearance::Cancelled => break RunOutcome::Cancelled(submitted),
            }
            let Some(job) = self.state.remaining.pop_front() else {
                break RunOutcome::Completed(submitted);
            };
            match self.apply(job).await {
                Step::Continue => {}
                Step::Cancelled => break RunOutcome::Cancelled(self.state.submitted),
                Step::Halted => break RunOutcome::Halted(self.state.submitted),
            }
        };

        info!(%outcome, left = self.state.remaining.len(), "auto-apply run finished");
        outcome
    }

    /// Blocks while the pulse says pause; never consumes a candidate.
    async fn await_clearance(&mut self) -> Clearance {
        let mut pulse = self.pulse.subscribe();
        let cancel = self.state.cancel.clone();
        let mut paused: Option<PauseReason> = None;

        loop {
            let gate = pulse.borrow_and_update().gate(self.settings.health_floor);
            match gate {
                Gate::Proceed => {
                    if paused.is_some() {
                        info!("pulse cleared, resuming");
                        self.emit(EngineEvent::Resumed);
                    }
                    return Clearance::Clear;
                }
                Gate::Halt => {
                    warn!("pulse halted, stopping run");
                    return Clearance::Halted;
                }
                Gate::Pause(reason) => {
                    if paused.is_none_or(|prev| discriminant(&prev) != discriminant(&reason)) {
                        info!(%reason, "run paused");
                        self.emit(EngineEvent::Paused(reason));
                    }
                    paused = Some(reason);

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Clearance::Cancelled,
                        changed = pulse.changed() => {
                            if changed.is_err() {
                                warn!("pulse monitor dropped, stopping run");
                                return Clearance::Halted;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn apply(&mut self, job: JobCandidate) -> Step {
        let cancel = self.state.cancel.clone();
        let entry_id = self.next_entry_id;
        self.next_entry_id += 1;
        let identity = job.identity.clone();

        self.emit_log(entry_id, &identity, LogPhase::Applying);

        // A halt raised while this candidate is in flight drops it like a cancel.
        let mut pulse = self.pulse.subscribe();
        let delay = self.settings.pacing.delay(self.state.speed_tier);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Step::Cancelled,
            _ = pulse.wait_for(|s| s.status == PulseStatus::Halted) => {
                warn!(job = %identity, "pulse halted during pacing, stopping run");
                return Step::Halted;
            }
            _ = sleep(delay) => {}
        }

        let mut pipeline = SubmissionPipeline::new(job, self.settings.stage_interval);
        let result = tokio::select! {
            biased;
            _ = pulse.wait_for(|s| s.status == PulseStatus::Halted) => {
                warn!(job = %identity, "pulse halted during pipeline, stopping run");
                return Step::Halted;
            }
            result = drive(&mut pipeline, &*self.tailor, &self.approver, &cancel) => result,
        };

        // The tailor runs synchronously, so a halt raised inside it lands here.
        if matches!(result, Ok(PipelineOutcome::Submitted))
            && self.pulse.snapshot().status == PulseStatus::Halted
        {
            warn!(job = %identity, "pulse halted before submission, stopping run");
            return Step::Halted;
        }

        let phase = match result {
            Ok(PipelineOutcome::Submitted) => match self.ledger.submit(pipeline.job()) {
                Ok(record) => {
                    self.state.submitted += 1;
                    self.pulse.record_submission();
                    info!(id = %record.id, job = %identity, "application submitted");
                    LogPhase::Done {
                        application_id: record.id,
                    }
                }
                Err(err) => {
                    warn!(job = %identity, "{err}");
                    LogPhase::Failed(FailureKind::from(&err))
                }
            },
            Ok(PipelineOutcome::Skipped) => {
                info!(job = %identity, "application skipped at approval");
                LogPhase::Skipped
            }
            Err(PipelineError::Cancelled) => return Step::Cancelled,
            Err(err) => {
                warn!(job = %identity, stage = %pipeline.stage(), "{err}");
                LogPhase::Failed(FailureKind::from(&err))
            }
        };

        self.emit_log(entry_id, &identity, phase);
        Step::Continue
    }

    fn emit_log(&self, id: u64, identity: &JobIdentity, phase: LogPhase) {
        self.emit(EngineEvent::Log(LogEvent {
            id,
            identity: identity.clone(),
            phase,
            timestamp: Utc::now(),
        }));
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine; the run still owns the ledger writes.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::time::Instant;

    use super::*;
    use crate::jobs::candidate;
    use crate::ledger::ApplicationStatus;
    use crate::state_machine::{ApplicationDraft, TemplateTailor};

    fn settings() -> EngineSettings {
        EngineSettings {
            pacing: PacingPolicy {
                safe_ms: 800,
                normal_ms: 400,
                fast_ms: 200,
            },
            stage_interval: Duration::from_millis(10),
            health_floor: 40,
            approval: ApprovalPolicy::Auto,
        }
    }

    fn template() -> TemplateTailor {
        TemplateTailor::new(vec!["API".into()], "Shipped payroll APIs.".into())
    }

    fn engine_with(settings: EngineSettings, pulse: PulseMonitor, tailor: Arc<dyn Tailor>) -> AutoApplyEngine {
        let engine = AutoApplyEngine::new(settings, pulse, tailor);
        engine.mark_profile_ready();
        engine
    }

    fn engine() -> AutoApplyEngine {
        engine_with(settings(), PulseMonitor::new(100), Arc::new(template()))
    }

    fn jobs(companies: &[&str]) -> Vec<JobCandidate> {
        companies.iter().map(|c| candidate(c, "Engineer")).collect()
    }

    async fn drain(handle: &mut RunHandle) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        events
    }

    fn log_trace(events: &[EngineEvent]) -> Vec<(String, &'static str)> {
        events
            .iter()
            .filter_map(EngineEvent::as_log)
            .map(|e| (e.identity.company.clone(), e.phase.label()))
            .collect()
    }

    fn trace(pairs: &[(&str, &'static str)]) -> Vec<(String, &'static str)> {
        pairs.iter().map(|(c, p)| (c.to_string(), *p)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fast_run_applies_in_order() {
        let engine = engine();
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A", "B", "C"]), &ledger, SpeedTier::Fast).unwrap();

        let events = drain(&mut handle).await;
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed(3));
        assert_eq!(
            log_trace(&events),
            trace(&[
                ("A", "applying"),
                ("A", "done"),
                ("B", "applying"),
                ("B", "done"),
                ("C", "applying"),
                ("C", "done"),
            ])
        );

        let records = ledger.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.status == ApplicationStatus::Applied));

        // applying/done of the same candidate share an id.
        let logs: Vec<&LogEvent> = events.iter().filter_map(EngineEvent::as_log).collect();
        assert_eq!(logs[0].id, logs[1].id);
        assert_ne!(logs[1].id, logs[2].id);
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_first_delay_submits_nothing() {
        let engine = engine();
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A", "B"]), &ledger, SpeedTier::Fast).unwrap();

        let first = handle.events.recv().await.unwrap();
        assert_eq!(first.as_log().unwrap().phase, LogPhase::Applying);
        handle.cancel();

        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Cancelled(0));
        assert!(drain(&mut handle).await.is_empty());
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_the_wait_promptly() {
        let engine = engine();
        let ledger = Ledger::new();
        let delay = engine.settings().pacing.delay(SpeedTier::Safe);
        let mut handle = engine.start(jobs(&["A", "B", "C"]), &ledger, SpeedTier::Safe).unwrap();

        handle.events.recv().await.unwrap();
        sleep(delay / 4).await;
        let requested = Instant::now();
        engine.cancel();

        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Cancelled(0));
        assert!(requested.elapsed() < delay);
        assert!(drain(&mut handle).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_after_completion() {
        let engine = engine();
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A"]), &ledger, SpeedTier::Fast).unwrap();

        let events = drain(&mut handle).await;
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed(1));

        handle.cancel();
        handle.cancel();
        engine.cancel();

        assert_eq!(handle.wait().await.unwrap(), outcome);
        assert!(handle.events.recv().await.is_none());
        assert_eq!(events.len(), 2);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_entries_are_never_reapplied() {
        for tier in [SpeedTier::Safe, SpeedTier::Normal, SpeedTier::Fast] {
            let engine = engine();
            let ledger = Ledger::new();
            let razorpay = JobCandidate {
                identity: JobIdentity::new("Razorpay", "Senior Product Manager"),
                ..candidate("", "")
            };
            ledger.submit(&razorpay).unwrap();

            let candidates = vec![razorpay.clone(), candidate("Acme", "Engineer"), razorpay.clone()];
            let mut handle = engine.start(candidates, &ledger, tier).unwrap();
            assert_eq!(handle.eligible, 1);

            let events = drain(&mut handle).await;
            assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed(1));
            assert!(
                events
                    .iter()
                    .filter_map(EngineEvent::as_log)
                    .all(|e| e.identity.company != "Razorpay"),
                "tier {tier} re-applied to Razorpay"
            );
            assert_eq!(ledger.len(), 2);
        }
    }

    /// Fails one company's pipeline and, optionally, halts the pulse while
    /// drafting the n-th cover letter.
    struct ScriptedTailor {
        inner: TemplateTailor,
        broken_company: Option<&'static str>,
        halt: Option<(PulseMonitor, usize)>,
        letters: AtomicUsize,
    }

    impl ScriptedTailor {
        fn new() -> Self {
            Self {
                inner: template(),
                broken_company: None,
                halt: None,
                letters: AtomicUsize::new(0),
            }
        }
    }

    impl Tailor for ScriptedTailor {
        fn analyze(&self, job: &JobCandidate) -> Result<Vec<String>, PipelineError> {
            if self.broken_company == Some(job.company()) {
                return Err(PipelineError::MalformedJob("no description".into()));
            }
            self.inner.analyze(job)
        }

        fn map_skills(&self, job: &JobCandidate, reqs: &[String]) -> Result<Vec<String>, PipelineError> {
            self.inner.map_skills(job, reqs)
        }

        fn rephrase(&self, job: &JobCandidate, skills: &[String]) -> Result<Vec<String>, PipelineError> {
            self.inner.rephrase(job, skills)
        }

        fn cover_letter(
            &self,
            job: &JobCandidate,
            draft: &ApplicationDraft,
        ) -> Result<String, PipelineError> {
            let n = self.letters.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((pulse, at)) = &self.halt
                && n == *at
            {
                pulse.halt().unwrap();
            }
            self.inner.cover_letter(job, draft)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_failure_is_not_fatal() {
        let tailor = ScriptedTailor {
            broken_company: Some("B"),
            ..ScriptedTailor::new()
        };
        let engine = engine_with(settings(), PulseMonitor::new(100), Arc::new(tailor));
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A", "B", "C"]), &ledger, SpeedTier::Normal).unwrap();

        let events = drain(&mut handle).await;
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed(2));
        assert_eq!(
            log_trace(&events),
            trace(&[
                ("A", "applying"),
                ("A", "done"),
                ("B", "applying"),
                ("B", "failed"),
                ("C", "applying"),
                ("C", "done"),
            ])
        );

        // Appends attributable to the run match the done events.
        let done = events
            .iter()
            .filter_map(EngineEvent::as_log)
            .filter(|e| matches!(e.phase, LogPhase::Done { .. }))
            .count();
        assert_eq!(done, ledger.len());
        assert_eq!(done, outcome.submitted());
    }

    #[tokio::test(start_paused = true)]
    async fn halt_between_candidates_stops_after_second() {
        let pulse = PulseMonitor::new(2);
        let engine = engine_with(settings(), pulse.clone(), Arc::new(template()));
        let ledger = Ledger::new();
        let mut handle = engine
            .start(jobs(&["A", "B", "C", "D", "E"]), &ledger, SpeedTier::Fast)
            .unwrap();

        let mut events = Vec::new();
        loop {
            let event = handle.events.recv().await.unwrap();
            if event == EngineEvent::Paused(PauseReason::AwaitingApproval) {
                break;
            }
            events.push(event);
        }
        pulse.halt().unwrap();
        events.extend(drain(&mut handle).await);

        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Halted(2));
        assert_eq!(
            log_trace(&events),
            trace(&[("A", "applying"), ("A", "done"), ("B", "applying"), ("B", "done")])
        );
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn halt_during_pacing_wait_drops_the_candidate() {
        let pulse = PulseMonitor::new(100);
        let engine = engine_with(settings(), pulse.clone(), Arc::new(template()));
        let ledger = Ledger::new();
        let delay = engine.settings().pacing.delay(SpeedTier::Safe);
        let mut handle = engine.start(jobs(&["A", "B", "C"]), &ledger, SpeedTier::Safe).unwrap();

        let first = handle.events.recv().await.unwrap();
        assert_eq!(first.as_log().unwrap().phase, LogPhase::Applying);
        let raised = Instant::now();
        pulse.halt().unwrap();

        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Halted(0));
        assert!(raised.elapsed() < delay);
        assert!(drain(&mut handle).await.is_empty());
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn halt_inside_pipeline_skips_submission() {
        let pulse = PulseMonitor::new(100);
        let tailor = ScriptedTailor {
            halt: Some((pulse.clone(), 2)),
            ..ScriptedTailor::new()
        };
        let engine = engine_with(settings(), pulse, Arc::new(tailor));
        let ledger = Ledger::new();
        let mut handle = engine
            .start(jobs(&["A", "B", "C"]), &ledger, SpeedTier::Fast)
            .unwrap();

        let events = drain(&mut handle).await;
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Halted(1));
        assert_eq!(
            log_trace(&events),
            trace(&[("A", "applying"), ("A", "done"), ("B", "applying")])
        );
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.contains(&JobIdentity::new("B", "Engineer")));
    }

    #[tokio::test(start_paused = true)]
    async fn halt_while_paused_on_cooldown() {
        let pulse = PulseMonitor::new(100);
        pulse.start_cooldown(60).unwrap();
        let engine = engine_with(settings(), pulse.clone(), Arc::new(template()));
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A", "B"]), &ledger, SpeedTier::Fast).unwrap();

        assert_eq!(
            handle.events.recv().await.unwrap(),
            EngineEvent::Paused(PauseReason::Cooldown { remaining_secs: 60 })
        );
        pulse.halt().unwrap();

        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Halted(0));
        assert!(drain(&mut handle).await.is_empty());
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_requires_ready_profile() {
        let engine = AutoApplyEngine::new(settings(), PulseMonitor::new(3), Arc::new(template()));
        let ledger = Ledger::new();

        let err = engine.start(jobs(&["A"]), &ledger, SpeedTier::Fast).unwrap_err();
        assert!(matches!(err, EngineError::PreconditionNotMet(_)));
        assert!(!engine.is_running());
        assert!(ledger.is_empty());

        engine.mark_profile_ready();
        let mut handle = engine.start(jobs(&["A"]), &ledger, SpeedTier::Fast).unwrap();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_while_running() {
        let engine = engine();
        let ledger = Ledger::new();
        let mut first = engine.start(jobs(&["A", "B"]), &ledger, SpeedTier::Safe).unwrap();

        let err = engine.start(jobs(&["C"]), &ledger, SpeedTier::Fast).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRunning));

        first.cancel();
        assert_eq!(first.wait().await.unwrap(), RunOutcome::Cancelled(0));

        let mut second = engine.start(jobs(&["C"]), &ledger, SpeedTier::Fast).unwrap();
        assert_eq!(second.wait().await.unwrap(), RunOutcome::Completed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_pauses_without_losing_position() {
        let pulse = PulseMonitor::new(100);
        pulse.start_cooldown(5).unwrap();
        let engine = engine_with(settings(), pulse.clone(), Arc::new(template()));
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A", "B"]), &ledger, SpeedTier::Fast).unwrap();

        assert_eq!(
            handle.events.recv().await.unwrap(),
            EngineEvent::Paused(PauseReason::Cooldown { remaining_secs: 5 })
        );
        pulse.tick(2);
        pulse.tick(3);

        let events = drain(&mut handle).await;
        assert_eq!(events[0], EngineEvent::Resumed);
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed(2));
        assert_eq!(
            log_trace(&events),
            trace(&[("A", "applying"), ("A", "done"), ("B", "applying"), ("B", "done")])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_paused_on_low_health() {
        let pulse = PulseMonitor::new(100);
        pulse.set_health(10).unwrap();
        let engine = engine_with(settings(), pulse, Arc::new(template()));
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A"]), &ledger, SpeedTier::Fast).unwrap();

        assert_eq!(
            handle.events.recv().await.unwrap(),
            EngineEvent::Paused(PauseReason::LowHealth { health: 10, floor: 40 })
        );
        handle.cancel();

        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Cancelled(0));
        assert!(drain(&mut handle).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_waits_for_approval() {
        let pulse = PulseMonitor::new(2);
        let engine = engine_with(settings(), pulse.clone(), Arc::new(template()));
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A", "B", "C"]), &ledger, SpeedTier::Fast).unwrap();

        let mut before_pause = Vec::new();
        loop {
            let event = handle.events.recv().await.unwrap();
            if event == EngineEvent::Paused(PauseReason::AwaitingApproval) {
                break;
            }
            before_pause.push(event);
        }
        assert_eq!(log_trace(&before_pause).len(), 4);

        pulse.approve_batch(0).unwrap();
        let rest = drain(&mut handle).await;
        assert_eq!(rest[0], EngineEvent::Resumed);
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed(3));
    }

    #[tokio::test(start_paused = true)]
    async fn external_write_during_run_fails_that_candidate_only() {
        let engine = engine();
        let ledger = Ledger::new();
        let candidates = jobs(&["A", "B"]);
        let mut handle = engine.start(candidates.clone(), &ledger, SpeedTier::Fast).unwrap();

        handle.events.recv().await.unwrap();
        // Manual apply lands while A is still pacing.
        ledger.submit(&candidates[0]).unwrap();

        let events = drain(&mut handle).await;
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed(1));
        let logs: Vec<&LogEvent> = events.iter().filter_map(EngineEvent::as_log).collect();
        assert_eq!(logs[0].phase, LogPhase::Failed(FailureKind::Duplicate));
        assert_eq!(log_trace(&events)[1..], trace(&[("B", "applying"), ("B", "done")])[..]);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_policy_asks_for_each_job() {
        let settings = EngineSettings {
            approval: ApprovalPolicy::Manual,
            ..settings()
        };
        let engine = engine_with(settings, PulseMonitor::new(100), Arc::new(template()));
        let ledger = Ledger::new();
        let mut handle = engine.start(jobs(&["A", "B"]), &ledger, SpeedTier::Fast).unwrap();

        let mut approvals = handle.approvals.take().unwrap();
        let reviewer = tokio::spawn(async move {
            approvals.recv().await.unwrap().approve();
            approvals.recv().await.unwrap().skip();
        });

        let events = drain(&mut handle).await;
        reviewer.await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed(1));
        assert_eq!(
            log_trace(&events),
            trace(&[("A", "applying"), ("A", "done"), ("B", "applying"), ("B", "skipped")])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn apply_single_records_on_approval() {
        let engine = engine();
        let ledger = Ledger::new();
        let (tx, mut rx) = mpsc::channel::<ApprovalRequest>(1);
        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            request.approve_with("Hand-written letter".into());
        });

        let record = engine
            .apply_single(candidate("Acme", "Engineer"), &ledger, tx, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.id, "APP_001");

        let (tx, _rx) = mpsc::channel(1);
        let err = engine
            .apply_single(candidate("Acme", "Engineer"), &ledger, tx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ledger(LedgerError::Duplicate(_))));
    }
}
