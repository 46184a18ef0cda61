//! End-to-end lifecycle of a restyle job.
//!
//! The orchestrator uploads the photo, polls the room-emptying stage, waits
//! for a style, triggers and polls the style stage, and records the outcome.
//! Expected failures never escape as errors: they are captured as an
//! [`ErrorRecord`] on the [`Job`], and the caller decides whether to invoke
//! [`JobOrchestrator::retry`] or [`JobOrchestrator::retry_style_only`].
//!
//! Every action is a no-op when the job is in a state that does not accept
//! it, when another action is still running, or after the orchestrator has
//! been cancelled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::job::{ErrorKind, ErrorRecord, Job, RetryAction, Stage, StyleId};
use crate::models::remote::{ImagePayload, RemoteStatus, StageParams, StatusReport};
use crate::services::collaborators::{Notifier, RestyleRecord, ResultStore, StoreError};
use crate::services::lifecycle::LifecycleGuard;
use crate::services::poller::{PollConfig, PollOutcome, Poller};
use crate::services::transport::Transport;

const FIRST_STAGE_TERMINAL: [RemoteStatus; 3] = [
    RemoteStatus::Done,
    RemoteStatus::EmptyComplete,
    RemoteStatus::Error,
];

const SECOND_STAGE_TERMINAL: [RemoteStatus; 3] = [
    RemoteStatus::Done,
    RemoteStatus::Error,
    RemoteStatus::StyleError,
];

/// Highest progress reported while a stage is still running; 1.0 means done.
const MAX_POLLING_PROGRESS: f32 = 0.99;

/// Polling and progress parameters for both stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorSettings {
    pub first_stage: PollConfig,
    pub second_stage: PollConfig,
    /// Progress added per intermediate status.
    pub progress_step: f32,
    /// Progress cap until the stage reports success. Values at or above
    /// 1.0 are treated as 0.99.
    pub progress_ceiling: f32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            first_stage: PollConfig {
                interval: std::time::Duration::from_millis(3000),
                max_attempts: 40,
            },
            second_stage: PollConfig {
                interval: std::time::Duration::from_millis(2000),
                max_attempts: 30,
            },
            progress_step: 0.05,
            progress_ceiling: 0.9,
        }
    }
}

/// Notifications delivered to the single event subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    StageChanged {
        from: Stage,
        to: Stage,
        /// Stage recorded on the failure being left, when `from` is `Failed`.
        failed_at: Option<Stage>,
    },
    Status {
        stage: Stage,
        status: RemoteStatus,
    },
    Progress {
        stage: Stage,
        progress: f32,
    },
    Failed(ErrorRecord),
}

/// Resets the busy flag when an action finishes or its future is dropped.
struct ActionGuard<'a>(&'a AtomicBool);

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct JobOrchestrator {
    transport: Arc<dyn Transport>,
    settings: OrchestratorSettings,
    guard: LifecycleGuard,
    state: watch::Sender<Job>,
    events: Mutex<Option<mpsc::UnboundedSender<JobEvent>>>,
    request: Mutex<Option<(ImagePayload, StageParams)>>,
    busy: AtomicBool,
    active_poll: Mutex<Option<(u64, CancellationToken)>>,
    poll_seq: AtomicU64,
    store: Option<Arc<dyn ResultStore>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl JobOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, settings: OrchestratorSettings) -> Self {
        let (state, _) = watch::channel(Job::default());
        Self {
            transport,
            settings,
            guard: LifecycleGuard::new(),
            state,
            events: Mutex::new(None),
            request: Mutex::new(None),
            busy: AtomicBool::new(false),
            active_poll: Mutex::new(None),
            poll_seq: AtomicU64::new(0),
            store: None,
            notifier: None,
        }
    }

    /// Persist first-stage and final results to `store`.
    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Signal completion through `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn snapshot(&self) -> Job {
        self.state.borrow().clone()
    }

    /// Receiver of job snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Job> {
        self.state.subscribe()
    }

    /// Typed event stream. Only the most recent subscriber receives events.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock() = Some(tx);
        rx
    }

    /// Whether an action is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> &LifecycleGuard {
        &self.guard
    }

    /// Upload `image` and run the first stage.
    ///
    /// Only the first call on an orchestrator has any effect.
    pub async fn start(&self, image: ImagePayload, params: StageParams) {
        if self.guard.has_started() {
            tracing::debug!("Pipeline already started, ignoring start");
            return;
        }
        let Some(_action) = self.begin_action("start") else {
            return;
        };
        if !self.guard.mark_started() {
            return;
        }

        *self.request.lock() = Some((image, params));
        metrics::counter!("restyle_jobs_started_total").increment(1);

        self.run_pipeline().await;
    }

    /// Trigger the style stage with `style` once the room has been emptied.
    pub async fn apply_style(&self, style: StyleId) {
        let Some(_action) = self.begin_action("apply_style") else {
            return;
        };

        let job = self.snapshot();
        if job.stage != Stage::AwaitingStyleSelection {
            tracing::debug!(stage = %job.stage, "Ignoring style selection");
            return;
        }
        let Some(job_id) = job.job_id else {
            return;
        };

        self.mutate(|job| job.selected_style = Some(style.clone()));
        self.run_second_stage(&job_id, &style).await;
    }

    /// Re-upload and restart after an upload or room-emptying failure.
    pub async fn retry(&self) {
        let Some(_action) = self.begin_action("retry") else {
            return;
        };

        let job = self.snapshot();
        if job.available_retry() != Some(RetryAction::Pipeline) {
            tracing::debug!(stage = %job.stage, "Ignoring pipeline retry");
            return;
        }

        tracing::info!(
            previous_job_id = job.job_id.as_deref().unwrap_or_default(),
            "Retrying pipeline"
        );
        self.run_pipeline().await;
    }

    /// Re-trigger only the style stage, keeping the job id, the emptied-room
    /// image and the selected style.
    pub async fn retry_style_only(&self) {
        let Some(_action) = self.begin_action("retry_style_only") else {
            return;
        };

        let job = self.snapshot();
        if job.available_retry() != Some(RetryAction::StyleOnly) {
            tracing::debug!(stage = %job.stage, "Ignoring style retry");
            return;
        }
        let (Some(job_id), Some(style)) = (job.job_id, job.selected_style) else {
            return;
        };

        tracing::info!(job_id = %job_id, style = %style, "Retrying style application");
        self.run_second_stage(&job_id, &style).await;
    }

    /// Abandon the job: stop polling, drop in-flight requests and suppress
    /// all further state updates. Idempotent.
    pub fn cancel(&self) {
        if self.guard.is_mounted() {
            let job = self.snapshot();
            tracing::info!(
                job_id = job.job_id.as_deref().unwrap_or_default(),
                stage = %job.stage,
                "Cancelling job"
            );
        }
        self.guard.mark_unmounted();
        self.active_poll.lock().take();
        self.events.lock().take();
    }

    async fn run_pipeline(&self) {
        let Some((image, params)) = self.request.lock().clone() else {
            return;
        };

        let entered = self.transition(Stage::Uploading, |job| {
            job.job_id = None;
            job.progress = 0.0;
            job.status_message = None;
            job.original_url = None;
            job.first_stage_result_url = None;
            job.second_stage_result_url = None;
        });
        if !entered {
            return;
        }

        if let Err(message) = image.check() {
            self.fail(ErrorRecord::new(
                ErrorKind::ValidationError,
                message,
                Stage::Uploading,
            ));
            return;
        }

        let cancel = self.guard.child_token();
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.transport.upload(&image, &params) => result,
        };
        if !self.guard.is_mounted() {
            return;
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.fail(ErrorRecord::new(e.kind(), e.to_string(), Stage::Uploading));
                return;
            }
        };
        record_stage_duration(Stage::Uploading, started);

        if response.status == RemoteStatus::Error {
            self.fail(ErrorRecord::new(
                ErrorKind::RemoteError,
                "upload was rejected by the remote worker",
                Stage::Uploading,
            ));
            return;
        }
        if response.job_id.is_empty() {
            self.fail(ErrorRecord::new(
                ErrorKind::RemoteError,
                "upload response did not include a job id",
                Stage::Uploading,
            ));
            return;
        }

        let job_id = response.job_id;
        tracing::info!(job_id = %job_id, "Upload accepted");

        let entered = self.transition(Stage::FirstStagePolling, |job| {
            job.job_id = Some(job_id.clone());
            job.last_error = None;
            job.progress = 0.0;
        });
        if entered {
            self.poll_first_stage(&job_id).await;
        }
    }

    async fn poll_first_stage(&self, job_id: &str) {
        let stage = Stage::FirstStagePolling;
        let Some(outcome) = self
            .poll_stage(job_id, stage, self.settings.first_stage, &FIRST_STAGE_TERMINAL)
            .await
        else {
            return;
        };

        let report = match outcome {
            PollOutcome::Terminal(report) => report,
            other => {
                self.fail(poll_failure(other, stage, "room emptying"));
                return;
            }
        };

        match report.status {
            RemoteStatus::Done | RemoteStatus::EmptyComplete => {
                let Some(empty_url) = report.empty_url.clone() else {
                    self.fail(ErrorRecord::new(
                        ErrorKind::RemoteError,
                        "room emptying finished without an image",
                        stage,
                    ));
                    return;
                };

                let entered = self.transition(Stage::AwaitingStyleSelection, |job| {
                    job.first_stage_result_url = Some(empty_url);
                    if report.original_url.is_some() {
                        job.original_url = report.original_url.clone();
                    }
                    job.progress = 1.0;
                });
                if entered {
                    tracing::info!(job_id, "Room emptied, awaiting style selection");
                    self.persist_first_stage().await;
                }
            }
            _ => self.fail(ErrorRecord::new(
                ErrorKind::RemoteError,
                remote_failure_message(&report, "room emptying failed"),
                stage,
            )),
        }
    }

    async fn run_second_stage(&self, job_id: &str, style: &StyleId) {
        let cancel = self.guard.child_token();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.transport.trigger_second_stage(job_id, style) => result,
        };
        if !self.guard.is_mounted() {
            return;
        }

        if let Err(e) = result {
            self.fail(ErrorRecord::new(
                e.kind(),
                e.to_string(),
                Stage::AwaitingStyleSelection,
            ));
            return;
        }
        tracing::info!(job_id, style = %style, "Style application triggered");

        let stage = Stage::SecondStagePolling;
        let entered = self.transition(stage, |job| {
            job.last_error = None;
            job.progress = 0.0;
            job.status_message = None;
        });
        if !entered {
            return;
        }

        let Some(outcome) = self
            .poll_stage(job_id, stage, self.settings.second_stage, &SECOND_STAGE_TERMINAL)
            .await
        else {
            return;
        };

        let report = match outcome {
            PollOutcome::Terminal(report) => report,
            other => {
                self.fail(poll_failure(other, stage, "style application"));
                return;
            }
        };

        if report.status != RemoteStatus::Done {
            self.fail(ErrorRecord::new(
                ErrorKind::RemoteError,
                remote_failure_message(&report, "style application failed"),
                stage,
            ));
            return;
        }

        let Some(styled_url) = report.styled_url else {
            self.fail(ErrorRecord::new(
                ErrorKind::RemoteError,
                "style application finished without an image",
                stage,
            ));
            return;
        };

        let entered = self.transition(Stage::Complete, |job| {
            job.second_stage_result_url = Some(styled_url);
            job.progress = 1.0;
        });
        if entered {
            metrics::counter!("restyle_jobs_completed_total").increment(1);
            tracing::info!(job_id, "Job complete");
            self.persist_completion().await;
        }
    }

    /// Run one polling loop for `stage`. Returns `None` if cancelled.
    async fn poll_stage(
        &self,
        job_id: &str,
        stage: Stage,
        config: PollConfig,
        terminal: &[RemoteStatus],
    ) -> Option<PollOutcome> {
        let (seq, token) = self.begin_poll();
        let started = Instant::now();

        let outcome = Poller::new(self.transport.as_ref(), config)
            .poll(job_id, terminal, &token, |report| {
                self.observe_status(stage, report, terminal)
            })
            .await;

        self.end_poll(seq);
        if !self.guard.is_mounted() {
            return None;
        }
        record_stage_duration(stage, started);
        outcome
    }

    /// Register a new polling loop, cancelling any loop still registered.
    fn begin_poll(&self) -> (u64, CancellationToken) {
        let seq = self.poll_seq.fetch_add(1, Ordering::SeqCst);
        let token = self.guard.child_token();
        if let Some((_, previous)) = self.active_poll.lock().replace((seq, token.clone())) {
            previous.cancel();
        }
        (seq, token)
    }

    fn end_poll(&self, seq: u64) {
        let mut active = self.active_poll.lock();
        if active.as_ref().is_some_and(|(current, _)| *current == seq) {
            active.take();
        }
    }

    fn observe_status(&self, stage: Stage, report: &StatusReport, terminal: &[RemoteStatus]) {
        metrics::counter!("restyle_poll_attempts_total", "stage" => <&'static str>::from(stage))
            .increment(1);

        let intermediate = !terminal.contains(&report.status);
        let step = self.settings.progress_step;
        let ceiling = self.settings.progress_ceiling.clamp(0.0, MAX_POLLING_PROGRESS);
        let mut progress = None;

        let applied = self.mutate(|job| {
            if job.stage != stage {
                return;
            }
            job.status_message = Some(
                report
                    .message
                    .clone()
                    .unwrap_or_else(|| report.status.to_string()),
            );
            if intermediate {
                job.progress = (job.progress + step).min(ceiling).max(job.progress);
                progress = Some(job.progress);
            }
        });
        if !applied {
            return;
        }

        self.emit(JobEvent::Status {
            stage,
            status: report.status.clone(),
        });
        if let Some(progress) = progress {
            self.emit(JobEvent::Progress { stage, progress });
        }
    }

    async fn persist_first_stage(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let Some(record) = RestyleRecord::from_job(&self.snapshot()) else {
            return;
        };

        if let Err(e) = store.save(&record).await {
            tracing::warn!(job_id = %record.job_id, error = %e, "Failed to save emptied-room result");
        }
    }

    async fn persist_completion(&self) {
        let job = self.snapshot();

        if let (Some(store), Some(record)) = (&self.store, RestyleRecord::from_job(&job)) {
            let result = match store.update(&record).await {
                Err(StoreError::NotFound(_)) => store.save(&record).await,
                other => other,
            };
            if let Err(e) = result {
                tracing::warn!(job_id = %record.job_id, error = %e, "Failed to save final result");
            }
        }

        if !self.guard.is_mounted() {
            return;
        }
        if let Some(notifier) = &self.notifier {
            notifier.job_completed(&job).await;
        }
    }

    fn begin_action(&self, action: &'static str) -> Option<ActionGuard<'_>> {
        if !self.guard.is_mounted() {
            tracing::debug!(action, "Orchestrator cancelled, ignoring action");
            return None;
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            tracing::warn!(action, "Another action is running, ignoring");
            return None;
        }
        Some(ActionGuard(&self.busy))
    }

    /// Apply `f` to the job unless the orchestrator has been cancelled.
    fn mutate(&self, f: impl FnOnce(&mut Job)) -> bool {
        if !self.guard.is_mounted() {
            return false;
        }
        self.state.send_modify(f);
        true
    }

    /// Move the job to `to` and apply `f`, if the lifecycle graph allows it.
    fn transition(&self, to: Stage, f: impl FnOnce(&mut Job)) -> bool {
        if !self.guard.is_mounted() {
            return false;
        }

        let mut change = None;
        let mut rejected_from = None;
        self.state.send_if_modified(|job| {
            if !job.can_enter(to) {
                rejected_from = Some(job.stage);
                return false;
            }
            change = Some((job.stage, job.failed_at()));
            job.stage = to;
            f(job);
            true
        });

        match change {
            Some((from, failed_at)) => {
                tracing::info!(from = %from, to = %to, "Stage changed");
                self.emit(JobEvent::StageChanged {
                    from,
                    to,
                    failed_at,
                });
                true
            }
            None => {
                if let Some(from) = rejected_from {
                    tracing::warn!(from = %from, to = %to, "Rejected stage transition");
                }
                false
            }
        }
    }

    fn fail(&self, record: ErrorRecord) {
        if !self.guard.is_mounted() {
            return;
        }

        let stage_name: &'static str = record.stage.into();
        let kind_name: &'static str = record.kind.into();
        metrics::counter!("restyle_jobs_failed_total", "stage" => stage_name, "kind" => kind_name)
            .increment(1);
        tracing::warn!(
            stage = %record.stage,
            kind = %record.kind,
            retryable = record.retryable,
            message = %record.message,
            "Job failed"
        );

        if self.snapshot().stage == Stage::Failed {
            self.mutate(|job| job.last_error = Some(record.clone()));
        } else {
            let failure = record.clone();
            self.transition(Stage::Failed, |job| job.last_error = Some(failure));
        }
        self.emit(JobEvent::Failed(record));
    }

    fn emit(&self, event: JobEvent) {
        if !self.guard.is_mounted() {
            return;
        }
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl Drop for JobOrchestrator {
    fn drop(&mut self) {
        self.guard.mark_unmounted();
    }
}

fn poll_failure(outcome: PollOutcome, stage: Stage, what: &str) -> ErrorRecord {
    match outcome {
        PollOutcome::TimedOut { attempts } => ErrorRecord::new(
            ErrorKind::TimeoutError,
            format!("{} did not finish after {} status checks", what, attempts),
            stage,
        ),
        PollOutcome::Failed(e) => ErrorRecord::new(e.kind(), e.to_string(), stage),
        PollOutcome::Terminal(report) => ErrorRecord::new(
            ErrorKind::RemoteError,
            remote_failure_message(&report, what),
            stage,
        ),
    }
}

fn remote_failure_message(report: &StatusReport, fallback: &str) -> String {
    match &report.message {
        Some(message) if !message.is_empty() => message.clone(),
        _ => format!("{} ({})", fallback, report.status),
    }
}

fn record_stage_duration(stage: Stage, started: Instant) {
    metrics::histogram!("restyle_stage_seconds", "stage" => <&'static str>::from(stage))
        .record(started.elapsed().as_secs_f64());
}
