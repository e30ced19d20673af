use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout_at, Instant, MissedTickBehavior};

use crate::core::config::Settings;
use crate::core::time::now_utc;
use crate::domain::{GradingSession, GradingStatus, GradingType, NewGradingSession};
use crate::repositories::GradingStore;
use crate::services::errors::GradingError;
use crate::services::template_resolution::{ensure_semester_open, resolve_template};

const REPORT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollConfig {
    pub(crate) interval: Duration,
    pub(crate) timeout: Duration,
}

impl PollConfig {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let grading = settings.grading();
        Self { interval: grading.poll_interval(), timeout: grading.poll_timeout() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub(crate) enum PollOutcome {
    Completed { session: GradingSession },
    Failed { session: GradingSession },
    /// The ceiling passed while the session was still processing. It may
    /// still finish server-side and show up on the next refresh.
    #[serde(rename_all = "camelCase")]
    Timeout { session_id: String },
    /// The session disappeared while being polled.
    #[serde(rename_all = "camelCase")]
    Aborted { session_id: String },
}

impl PollOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Timeout { .. } => "timeout",
            Self::Aborted { .. } => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub(crate) enum PollStatus {
    Idle,
    #[serde(rename_all = "camelCase")]
    Polling { attempt: u64, session_id: String },
    Finished { attempt: u64, outcome: PollOutcome },
    Cancelled { attempt: u64 },
}

/// Terminal result of one attempt, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PollReport {
    pub(crate) submission_id: String,
    pub(crate) attempt: u64,
    pub(crate) outcome: PollOutcome,
}

/// Poll state machine for one submission.
///
/// Every `start` bumps the attempt token. A poll loop compares its own token
/// on each tick and exits without reporting once a newer attempt exists.
pub(crate) struct GradingPoller {
    submission_id: String,
    attempt: AtomicU64,
    status: watch::Sender<PollStatus>,
    reports: broadcast::Sender<PollReport>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl GradingPoller {
    pub(crate) fn new(
        submission_id: impl Into<String>,
        reports: broadcast::Sender<PollReport>,
    ) -> Self {
        let (status, _) = watch::channel(PollStatus::Idle);
        Self {
            submission_id: submission_id.into(),
            attempt: AtomicU64::new(0),
            status,
            reports,
            task: StdMutex::new(None),
        }
    }

    pub(crate) fn start(
        self: &Arc<Self>,
        store: Arc<dyn GradingStore>,
        config: PollConfig,
        session_id: String,
    ) -> u64 {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = self.next_attempt();
        self.status
            .send_replace(PollStatus::Polling { attempt, session_id: session_id.clone() });

        let handle = tokio::spawn(run_poll(Arc::clone(self), store, config, attempt, session_id));
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        tracing::info!(submission_id = %self.submission_id, attempt, "Grading poll started");
        attempt
    }

    /// Records an attempt whose session came back already terminal.
    pub(crate) fn complete_immediately(&self, session: GradingSession) -> u64 {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = self.next_attempt();
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let outcome = match session.status {
            GradingStatus::Failed => PollOutcome::Failed { session },
            _ => PollOutcome::Completed { session },
        };
        self.status.send_replace(PollStatus::Finished { attempt, outcome: outcome.clone() });
        self.report(attempt, outcome);
        attempt
    }

    /// Stops the current attempt. Returns whether a poll was in flight.
    pub(crate) fn cancel(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = self.next_attempt();
        if let Some(previous) = task.take() {
            previous.abort();
        }

        self.status.send_if_modified(|status| {
            if matches!(status, PollStatus::Polling { .. }) {
                *status = PollStatus::Cancelled { attempt };
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn status(&self) -> PollStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn is_current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::SeqCst) == attempt
    }

    /// Moves `attempt` from polling to finished and reports it. Returns false,
    /// changing nothing, when the attempt is stale or already finished.
    pub(crate) fn finish(&self, attempt: u64, outcome: PollOutcome) -> bool {
        let finished = self.status.send_if_modified(|status| match status {
            PollStatus::Polling { attempt: current, .. }
                if *current == attempt && self.is_current(attempt) =>
            {
                *status = PollStatus::Finished { attempt, outcome: outcome.clone() };
                true
            }
            _ => false,
        });

        if finished {
            self.report(attempt, outcome);
        }
        finished
    }

    fn next_attempt(&self) -> u64 {
        self.attempt.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn report(&self, attempt: u64, outcome: PollOutcome) {
        // No subscribers is fine; the watch status still holds the outcome.
        let _ = self.reports.send(PollReport {
            submission_id: self.submission_id.clone(),
            attempt,
            outcome,
        });
    }
}

async fn run_poll(
    poller: Arc<GradingPoller>,
    store: Arc<dyn GradingStore>,
    config: PollConfig,
    attempt: u64,
    session_id: String,
) {
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut ticker = interval_at(started + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ceiling = sleep_until(deadline);
    tokio::pin!(ceiling);

    let submission_id = poller.submission_id.clone();
    let outcome = loop {
        tokio::select! {
            biased;
            _ = &mut ceiling => break PollOutcome::Timeout { session_id: session_id.clone() },
            _ = ticker.tick() => {}
        }

        if !poller.is_current(attempt) {
            tracing::debug!(
                submission_id = %submission_id,
                attempt,
                "Discarding stale grading poll"
            );
            return;
        }

        match timeout_at(deadline, store.find_session(&submission_id, &session_id)).await {
            Err(_) => break PollOutcome::Timeout { session_id: session_id.clone() },
            Ok(Ok(Some(session))) => match session.status {
                GradingStatus::Processing => {}
                GradingStatus::Completed => break PollOutcome::Completed { session },
                GradingStatus::Failed => break PollOutcome::Failed { session },
            },
            Ok(Ok(None)) => break PollOutcome::Aborted { session_id: session_id.clone() },
            Ok(Err(err)) => {
                tracing::warn!(
                    submission_id = %submission_id,
                    session_id = %session_id,
                    attempt,
                    error = %err,
                    "Grading session lookup failed; polling continues"
                );
            }
        }
    };

    if !poller.is_current(attempt) {
        return;
    }
    store.invalidate_submission(&submission_id).await;

    let label = outcome.label();
    if poller.finish(attempt, outcome) {
        metrics::counter!("grading_poll_outcomes_total", "outcome" => label).increment(1);
        metrics::histogram!("grading_poll_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            submission_id = %submission_id,
            session_id = %session_id,
            attempt,
            outcome = label,
            "Grading poll finished"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AutoGradeStarted {
    pub(crate) session: GradingSession,
    pub(crate) attempt: u64,
}

/// Starts auto-grading runs and owns one poller per submission.
pub(crate) struct PollingController {
    store: Arc<dyn GradingStore>,
    config: PollConfig,
    pollers: Mutex<HashMap<String, Arc<GradingPoller>>>,
    reports: broadcast::Sender<PollReport>,
}

impl PollingController {
    pub(crate) fn new(store: Arc<dyn GradingStore>, config: PollConfig) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self { store, config, pollers: Mutex::new(HashMap::new()), reports }
    }

    /// Creates an AI grading session for the submission and follows it to a
    /// terminal status in the background.
    pub(crate) async fn start_auto_grading(
        &self,
        submission_id: &str,
        template_id: Option<String>,
    ) -> Result<AutoGradeStarted, GradingError> {
        let store = self.store.as_ref();
        let submission = store.find_submission(submission_id).await?.ok_or_else(|| {
            GradingError::SubmissionNotFound { submission_id: submission_id.to_string() }
        })?;

        let template_id = match template_id {
            Some(template_id) => template_id,
            None => resolve_template(store, &submission).await?,
        };
        ensure_semester_open(store, &submission, now_utc()).await?;

        let session = store
            .create_session(&NewGradingSession {
                submission_id: submission.id.clone(),
                assessment_template_id: template_id,
                grading_type: GradingType::Ai,
            })
            .await?;
        store.invalidate_submission(&submission.id).await;

        let poller = self.poller(&submission.id).await;
        let attempt = if session.status.is_terminal() {
            poller.complete_immediately(session.clone())
        } else {
            poller.start(Arc::clone(&self.store), self.config, session.id.clone())
        };

        tracing::info!(
            submission_id = %submission.id,
            session_id = %session.id,
            attempt,
            status = session.status.as_str(),
            "Auto-grading started"
        );
        Ok(AutoGradeStarted { session, attempt })
    }

    pub(crate) async fn status(&self, submission_id: &str) -> PollStatus {
        match self.pollers.lock().await.get(submission_id) {
            Some(poller) => poller.status(),
            None => PollStatus::Idle,
        }
    }

    pub(crate) async fn cancel(&self, submission_id: &str) -> bool {
        let cancelled = match self.pollers.lock().await.get(submission_id) {
            Some(poller) => poller.cancel(),
            None => false,
        };
        if cancelled {
            self.store.invalidate_submission(submission_id).await;
            tracing::info!(submission_id, "Grading poll cancelled");
        }
        cancelled
    }

    /// Cancels every in-flight poll. Returns how many were running.
    pub(crate) async fn cancel_all(&self) -> usize {
        self.pollers.lock().await.values().filter(|poller| poller.cancel()).count()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PollReport> {
        self.reports.subscribe()
    }

    async fn poller(&self, submission_id: &str) -> Arc<GradingPoller> {
        let mut pollers = self.pollers.lock().await;
        Arc::clone(pollers.entry(submission_id.to_string()).or_insert_with(|| {
            Arc::new(GradingPoller::new(submission_id, self.reports.clone()))
        }))
    }
}
