//! Per-session actor.
//!
//! Each session is owned by one task that serializes every trigger touching it: taker
//! requests and operator actions (command queue), violation delivery (the session's
//! subscription), the deadline wake-up, submission outcomes and resubmission backoff.
//! Transitions are therefore atomic with respect to each other without any lock.
//!
//! The grading call itself runs on a separate task so a slow collaborator never blocks
//! the session; its result comes back as an event. While a submission is in flight,
//! further submit requests wait on it instead of starting a second one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use super::session::{Session, SessionState, TerminationReason};
use super::snapshot::SessionSnapshot;
use crate::answers::buffer::AnswerBuffer;
use crate::answers::types::{AnswerRecord, AnswerValue};
use crate::capability::probe::EnvironmentCommit;
use crate::capability::types::CapabilityReport;
use crate::configuration::types::{ExamConfig, SessionSettings};
use crate::error_handling::types::{
    AnswerError, GradingError, SessionError, SubmissionError, ViolationError,
};
use crate::grading::service::GradingService;
use crate::grading::types::{Submission, SubmissionReceipt};
use crate::storage::storage_trait::Storage;
use crate::storage::types::SessionRecord;
use crate::violations::accumulator::ViolationAccumulator;
use crate::violations::channel::{drain_stale, ViolationChannel};
use crate::violations::types::{Severity, Violation, ViolationKind};

/// How a submit request ended. Both variants mean the session is `Submitted`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// This request's submission was the one grading accepted.
    Submitted(SubmissionReceipt),
    /// The session had already been submitted (by another request, the automatic
    /// submission, or before a restart).
    AlreadySubmitted(SubmissionReceipt),
}

impl SubmitOutcome {
    pub fn receipt(&self) -> &SubmissionReceipt {
        match self {
            SubmitOutcome::Submitted(r) | SubmitOutcome::AlreadySubmitted(r) => r,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub(crate) enum Command {
    Admit {
        report: CapabilityReport,
        consent: bool,
        reply: Reply<()>,
    },
    Begin {
        commit: Box<dyn EnvironmentCommit>,
        reply: Reply<DateTime<Utc>>,
    },
    WriteAnswer {
        question_id: String,
        value: AnswerValue,
        reply: Reply<AnswerRecord>,
    },
    Acknowledge {
        reply: Reply<()>,
    },
    Submit {
        reply: Reply<SubmitOutcome>,
    },
    Terminate {
        reason: Option<String>,
        reply: Reply<()>,
    },
    Warn {
        violation_id: String,
        message: String,
        reply: Reply<()>,
    },
    Dismiss {
        violation_id: String,
        reply: Reply<bool>,
    },
}

/// Controller tuning derived from `[sessions]`.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub submit_retry: Duration,
    pub suspend_on_high_severity: bool,
    pub command_capacity: usize,
}

impl From<&SessionSettings> for ControllerSettings {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            submit_retry: Duration::from_secs(settings.submit_retry_secs.max(1)),
            suspend_on_high_severity: settings.suspend_on_high_severity,
            command_capacity: 32,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

/// Collaborators shared by every session controller.
#[derive(Clone)]
pub struct ControllerContext {
    pub storage: Arc<dyn Storage>,
    pub grading: Arc<dyn GradingService>,
    pub channel: Arc<ViolationChannel>,
    pub settings: ControllerSettings,
}

enum Event {
    Command(Command),
    Violation(Violation),
    Deadline,
    Retry,
    Outcome(Result<SubmissionReceipt, GradingError>),
}

pub(crate) struct SessionController {
    session: Session,
    exam: ExamConfig,
    violations: ViolationAccumulator,
    answers: AnswerBuffer,
    context: ControllerContext,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    outcome_tx: mpsc::UnboundedSender<Result<SubmissionReceipt, GradingError>>,
    violation_rx: Option<mpsc::Receiver<Violation>>,
    deadline_at: Option<Instant>,
    retry_at: Option<Instant>,
    /// Waiters of the submission in flight; `Some` while one is running.
    in_flight: Option<Vec<Reply<SubmitOutcome>>>,
    last_submission_error: Option<String>,
}

impl SessionController {
    /// Starts the actor for `session` and returns its command queue and snapshot feed.
    pub(crate) fn spawn(
        session: Session,
        exam: ExamConfig,
        violations: ViolationAccumulator,
        answers: AnswerBuffer,
        context: ControllerContext,
    ) -> (mpsc::Sender<Command>, watch::Receiver<SessionSnapshot>) {
        let (command_tx, command_rx) = mpsc::channel(context.settings.command_capacity.max(1));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let initial = Self::build_snapshot(&session, &violations, &answers, false, None);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let controller = Self {
            session,
            exam,
            violations,
            answers,
            context,
            snapshot_tx,
            outcome_tx,
            violation_rx: None,
            deadline_at: None,
            retry_at: None,
            in_flight: None,
            last_submission_error: None,
        };
        tokio::spawn(controller.run(command_rx, outcome_rx));
        (command_tx, snapshot_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<Result<SubmissionReceipt, GradingError>>,
    ) {
        self.resume();
        loop {
            // deadline wins ties; violations queued before a command are applied first
            let event = tokio::select! {
                biased;
                _ = sleep_until_opt(self.deadline_at) => Event::Deadline,
                Some(violation) = next_violation(&mut self.violation_rx) => Event::Violation(violation),
                Some(outcome) = outcomes.recv() => Event::Outcome(outcome),
                _ = sleep_until_opt(self.retry_at) => Event::Retry,
                command = commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => break,
                },
            };
            self.handle(event);
        }
        self.stop_monitoring();
        debug!("[{}] Session controller stopped", self.session.id);
    }

    /// Re-arms timers and subscriptions for a session restored from storage.
    fn resume(&mut self) {
        let now = Utc::now();
        match self.session.state {
            SessionState::Active | SessionState::Suspended => {
                let remaining = self
                    .session
                    .remaining(now)
                    .and_then(|r| r.to_std().ok())
                    .unwrap_or_default();
                if remaining.is_zero() {
                    info!(
                        "[{}] Deadline passed while the engine was down",
                        self.session.id
                    );
                    self.enter_terminated(TerminationReason::DeadlineReached);
                } else {
                    // remaining is bounded by the exam's time limit
                    self.deadline_at = Instant::now().checked_add(remaining);
                    self.violation_rx = Some(self.context.channel.subscribe(self.session.id));
                    info!(
                        "[{}] Resumed {} session, {}s left",
                        self.session.id,
                        self.session.state,
                        remaining.as_secs()
                    );
                }
            }
            SessionState::Terminated => {
                info!(
                    "[{}] Resubmitting terminated session after restart",
                    self.session.id
                );
                self.start_submission(None);
            }
            _ => {}
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Violation(violation) => self.record_violation(violation),
            Event::Deadline => {
                self.deadline_at = None;
                if self.session.state.is_running() {
                    info!("[{}] Deadline reached", self.session.id);
                    self.enter_terminated(TerminationReason::DeadlineReached);
                }
            }
            Event::Retry => {
                self.retry_at = None;
                if self.session.state == SessionState::Terminated {
                    info!("[{}] Retrying automatic submission", self.session.id);
                    self.start_submission(None);
                }
            }
            Event::Outcome(outcome) => self.finish_submission(outcome),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Admit {
                report,
                consent,
                reply,
            } => {
                let result = self.session.admit(&report, consent, Utc::now());
                match &result {
                    Ok(()) => {
                        info!("[{}] Admitted", self.session.id);
                        self.persist();
                    }
                    Err(e) => info!("[{}] Admission refused: {}", self.session.id, e),
                }
                let _ = reply.send(result);
            }
            Command::Begin { mut commit, reply } => {
                let _ = reply.send(self.begin(commit.as_mut()));
            }
            Command::WriteAnswer {
                question_id,
                value,
                reply,
            } => {
                let _ = reply.send(self.write_answer(&question_id, value));
            }
            Command::Acknowledge { reply } => {
                let result = self.session.resume(Utc::now());
                if result.is_ok() {
                    info!("[{}] Suspension acknowledged", self.session.id);
                    self.persist();
                }
                let _ = reply.send(result);
            }
            Command::Submit { reply } => self.start_submission(Some(reply)),
            Command::Terminate { reason, reply } => {
                if !self.session.state.is_running() {
                    let _ = reply.send(Err(SessionError::InvalidTransition {
                        from: self.session.state,
                        action: "terminate",
                    }));
                    return;
                }
                info!(
                    "[{}] Terminated by operator{}",
                    self.session.id,
                    reason
                        .as_deref()
                        .map(|r| format!(": {}", r))
                        .unwrap_or_default()
                );
                self.enter_terminated(TerminationReason::Operator(reason));
                let _ = reply.send(Ok(()));
            }
            Command::Warn {
                violation_id,
                message,
                reply,
            } => {
                let _ = reply.send(self.warn(violation_id, message));
            }
            Command::Dismiss {
                violation_id,
                reply,
            } => {
                let result = self
                    .violations
                    .resolve(&violation_id)
                    .map_err(SessionError::from);
                if let Ok(true) = result {
                    info!(
                        "[{}] Violation {} dismissed",
                        self.session.id, violation_id
                    );
                    self.persist();
                }
                let _ = reply.send(result);
            }
        }
    }

    fn begin(&mut self, commit: &mut dyn EnvironmentCommit) -> Result<DateTime<Utc>, SessionError> {
        if self.session.state != SessionState::Admitted {
            return Err(SessionError::InvalidTransition {
                from: self.session.state,
                action: "start",
            });
        }
        let limit = self.session.time_limit_secs();
        let wake_at = Instant::now()
            .checked_add(Duration::from_secs(limit))
            .ok_or(SessionError::DeadlineOutOfRange(limit))?;
        self.session.deadline_from(Utc::now())?;

        // checked at the moment of entry, never from the admission report
        if let Err(e) = commit.commit() {
            warn!("[{}] Environment commit failed: {}", self.session.id, e);
            return Err(e.into());
        }
        let deadline = self.session.activate(Utc::now())?;
        self.deadline_at = Some(wake_at);
        self.violation_rx = Some(self.context.channel.subscribe(self.session.id));
        info!(
            "[{}] Exam {} started, deadline {}",
            self.session.id,
            self.session.exam_id,
            deadline.to_rfc3339()
        );
        self.persist();
        Ok(deadline)
    }

    fn write_answer(&mut self, question_id: &str, value: AnswerValue) -> Result<AnswerRecord, SessionError> {
        if self.session.state != SessionState::Active {
            return Err(AnswerError::NotAccepting(self.session.state).into());
        }
        if self.in_flight.is_some() {
            return Err(AnswerError::SubmissionInProgress.into());
        }
        let question = self
            .exam
            .question(question_id)
            .ok_or_else(|| AnswerError::UnknownQuestion(question_id.to_string()))?;
        question.accepts(&value)?;

        let now = Utc::now();
        let record = self.answers.write(question_id, value, now)?.clone();
        self.session.last_activity_at = now;
        self.publish();
        Ok(record)
    }

    fn warn(&mut self, violation_id: String, message: String) -> Result<(), SessionError> {
        if !self.session.state.is_running() {
            return Err(SessionError::InvalidTransition {
                from: self.session.state,
                action: "warn",
            });
        }
        if self.violations.get(&violation_id).is_none() {
            return Err(ViolationError::UnknownViolation(violation_id).into());
        }
        info!(
            "[{}] Operator warning for violation {}: {}",
            self.session.id, violation_id, message
        );
        self.session.notices.push(super::session::OperatorNotice {
            violation_id,
            message,
            issued_at: Utc::now(),
        });
        self.persist();
        Ok(())
    }

    fn record_violation(&mut self, violation: Violation) {
        let id = self.session.id;
        if violation.session_id != id {
            let err = ViolationError::SessionMismatch {
                expected: id,
                found: violation.session_id,
            };
            warn!("[{}] Ignoring violation {}: {}", id, violation.id, err);
            return;
        }
        if !self.session.state.is_running() {
            warn!(
                "[{}] Dropping stale violation {} ({}): session is {}",
                id, violation.id, violation.kind, self.session.state
            );
            return;
        }

        let kind = violation.kind;
        let severity = violation.severity;
        let violation_id = violation.id.clone();
        if !self.violations.append(violation) {
            debug!("[{}] Duplicate violation {} ignored", id, violation_id);
            return;
        }
        info!(
            "[{}] Violation {} recorded: {} ({:?}), {} of {}",
            id,
            violation_id,
            kind,
            severity,
            self.violations.count(false),
            self.session.max_violations
        );

        match kind {
            ViolationKind::CameraLost => self.session.signals.camera = false,
            ViolationKind::MicrophoneLost => self.session.signals.microphone = false,
            ViolationKind::TabSwitch | ViolationKind::FullscreenExit => {
                self.session.signals.tab_focus = false
            }
            _ => {}
        }

        if self.violations.threshold_breached(self.session.max_violations) {
            info!("[{}] Violation threshold breached", id);
            self.enter_terminated(TerminationReason::ThresholdBreached);
            return;
        }

        let needs_ack = kind.requires_acknowledgement()
            || (self.context.settings.suspend_on_high_severity && severity == Severity::High);
        if needs_ack && self.in_flight.is_none() {
            match self.session.suspend(kind.to_string()) {
                Ok(true) => info!("[{}] Suspended until acknowledged ({})", id, kind),
                Ok(false) => {}
                Err(e) => debug!("[{}] Not suspending: {}", id, e),
            }
        }
        self.persist();
    }

    fn enter_terminated(&mut self, reason: TerminationReason) {
        if let Err(e) = self.session.terminate(reason) {
            debug!("[{}] Not terminating: {}", self.session.id, e);
            return;
        }
        self.deadline_at = None;
        self.stop_monitoring();
        self.persist();
        // never discard partial work on forced termination
        self.start_submission(None);
    }

    fn stop_monitoring(&mut self) {
        self.context.channel.unsubscribe(self.session.id);
        if let Some(mut rx) = self.violation_rx.take() {
            let dropped = drain_stale(self.session.id, &mut rx);
            if dropped > 0 {
                debug!(
                    "[{}] {} late violation(s) discarded",
                    self.session.id, dropped
                );
            }
        }
    }

    fn start_submission(&mut self, waiter: Option<Reply<SubmitOutcome>>) {
        if self.session.state == SessionState::Submitted {
            if let Some(waiter) = waiter {
                let outcome = match self.session.receipt.clone() {
                    Some(receipt) => Ok(SubmitOutcome::AlreadySubmitted(receipt)),
                    None => Err(SessionError::InvalidTransition {
                        from: SessionState::Submitted,
                        action: "submit",
                    }),
                };
                let _ = waiter.send(outcome);
            }
            return;
        }
        if let Some(waiters) = self.in_flight.as_mut() {
            debug!(
                "[{}] Submission already in flight, request attached",
                self.session.id
            );
            waiters.extend(waiter);
            return;
        }
        if !matches!(
            self.session.state,
            SessionState::Active | SessionState::Terminated
        ) {
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(SessionError::InvalidTransition {
                    from: self.session.state,
                    action: "submit",
                }));
            }
            return;
        }

        let now = Utc::now();
        let submission = Submission {
            session_id: self.session.id,
            exam_id: self.session.exam_id.clone(),
            taker_id: self.session.taker.id.clone(),
            answers: self.answers.flush(now),
            violation_count: self.violations.count(false),
            termination: self.session.termination.clone(),
            submitted_at: now,
        };
        info!(
            "[{}] Submitting {} answer(s){}",
            self.session.id,
            submission.answers.len(),
            if waiter.is_some() { "" } else { " automatically" }
        );
        self.in_flight = Some(waiter.into_iter().collect());
        self.retry_at = None;
        self.publish();

        let grading = Arc::clone(&self.context.grading);
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = grading.submit(&submission).await;
            let _ = outcome_tx.send(outcome);
        });
    }

    fn finish_submission(&mut self, outcome: Result<SubmissionReceipt, GradingError>) {
        let waiters = self.in_flight.take().unwrap_or_default();
        match outcome {
            Ok(receipt) => {
                if let Err(e) = self.session.mark_submitted(receipt.clone(), Utc::now()) {
                    error!(
                        "[{}] Grading accepted a submission the session cannot record: {}",
                        self.session.id, e
                    );
                }
                self.last_submission_error = None;
                self.deadline_at = None;
                self.retry_at = None;
                self.stop_monitoring();
                info!(
                    "[{}] Submitted{}",
                    self.session.id,
                    receipt
                        .score
                        .map(|s| format!(", score {:.2}", s))
                        .unwrap_or_default()
                );
                // Submitted is durable before the answers are dropped
                self.persist();
                if let Err(e) = self.answers.clear() {
                    warn!(
                        "[{}] Submitted, but the local answer copy was not removed: {}",
                        self.session.id, e
                    );
                }
                self.publish();
                for (i, waiter) in waiters.into_iter().enumerate() {
                    let outcome = if i == 0 && !receipt.duplicate {
                        SubmitOutcome::Submitted(receipt.clone())
                    } else {
                        SubmitOutcome::AlreadySubmitted(receipt.clone())
                    };
                    let _ = waiter.send(Ok(outcome));
                }
            }
            Err(e) => {
                let err = SubmissionError::from(e);
                warn!(
                    "[{}] Submission failed, answers kept: {}",
                    self.session.id, err
                );
                self.last_submission_error = Some(err.to_string());
                if self.session.state == SessionState::Terminated {
                    match err {
                        SubmissionError::Transient(_) => {
                            self.retry_at = Some(Instant::now() + self.context.settings.submit_retry);
                        }
                        SubmissionError::Rejected(_) => error!(
                            "[{}] Automatic submission rejected, operator action needed",
                            self.session.id
                        ),
                    }
                }
                self.publish();
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone().into()));
                }
            }
        }
    }

    fn build_snapshot(
        session: &Session,
        violations: &ViolationAccumulator,
        answers: &AnswerBuffer,
        submission_in_flight: bool,
        last_submission_error: Option<String>,
    ) -> SessionSnapshot {
        SessionSnapshot {
            session: session.clone(),
            violations: violations.violations().to_vec(),
            violation_count: violations.count(false),
            unresolved_violations: violations.count(true),
            threshold_breached: violations.threshold_breached(session.max_violations),
            answered: answers.len(),
            submission_in_flight,
            last_submission_error,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Self::build_snapshot(
            &self.session,
            &self.violations,
            &self.answers,
            self.in_flight.is_some(),
            self.last_submission_error.clone(),
        ));
    }

    /// Saves the session record and publishes a new snapshot.
    fn persist(&self) {
        let record = SessionRecord {
            session: self.session.clone(),
            violations: self.violations.violations().to_vec(),
        };
        if let Err(e) = self.context.storage.save_session(&record) {
            error!(
                "[{}] Failed to save session record: {}",
                self.session.id, e
            );
        }
        self.publish();
    }
}

async fn next_violation(rx: &mut Option<mpsc::Receiver<Violation>>) -> Option<Violation> {
    match rx.as_mut() {
        Some(receiver) => {
            let next = receiver.recv().await;
            if next.is_none() {
                *rx = None;
            }
            next
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
