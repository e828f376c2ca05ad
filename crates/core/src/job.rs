//! Job record and lifecycle state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blob::{BlobKey, Bucket};
use crate::error::{DomainError, DomainResult};
use crate::fault::FaultClass;
use crate::id::JobId;

/// Retry budget assigned when the producer does not pick one.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Per-attempt wall-clock budget assigned when the producer does not pick one.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);

/// Which compute function a job runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Fit,
    Predict,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Fit => "fit",
            JobKind::Predict => "predict",
        }
    }

    /// Bucket the job's output lands in, keyed by the job id.
    pub fn output_bucket(&self) -> Bucket {
        match self {
            JobKind::Fit => Bucket::Models,
            JobKind::Predict => Bucket::Results,
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Started,
    Finished,
    Failed,
    Stopped,
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed | JobState::Stopped | JobState::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::Stopped => "stopped",
            JobState::Canceled => "canceled",
        }
    }

    /// The state machine. `retries_left` only matters for transient faults.
    pub fn next(self, transition: Transition, retries_left: u32) -> DomainResult<JobState> {
        use JobState::*;
        use Transition::*;

        let next = match (self, transition) {
            (Queued, Lease) => Started,
            (Started, Succeed) => Finished,
            (Started, Fault(FaultClass::Fatal)) => Failed,
            (Started, Fault(FaultClass::Transient)) if retries_left > 0 => Queued,
            (Started, Fault(FaultClass::Transient)) => Failed,
            (Started, TimedOut) => Stopped,
            (Started, LeaseLost) => Queued,
            (Queued | Started, Cancel) => Canceled,
            (from, transition) => return Err(DomainError::invalid_transition(from, transition)),
        };
        Ok(next)
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "started" => Ok(JobState::Started),
            "finished" => Ok(JobState::Finished),
            "failed" => Ok(JobState::Failed),
            "stopped" => Ok(JobState::Stopped),
            "canceled" => Ok(JobState::Canceled),
            other => Err(DomainError::validation(format!("unknown job state: {other}"))),
        }
    }
}

/// Edges of the state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// A worker leased the job.
    Lease,
    /// Compute returned and the output was stored.
    Succeed,
    /// Compute failed; the class comes from the fault policy.
    Fault(FaultClass),
    /// The attempt exceeded its wall-clock budget.
    TimedOut,
    /// An operator canceled the job.
    Cancel,
    /// The previous lease holder vanished and the job is being redelivered.
    LeaseLost,
}

/// What a fault did to the job.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Back to Queued for another episode.
    Retry { retries_left: u32 },
    /// Terminal.
    Failed,
}

/// The time `reference_elapsed` is measured from, for a job in `state`.
pub fn reference_time(
    state: JobState,
    enqueued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match state {
        JobState::Started => started_at,
        s if s.is_terminal() => ended_at,
        _ => enqueued_at,
    }
}

/// Elapsed time since `since`, clamped at zero.
pub fn elapsed_since(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    since
        .and_then(|t| (now - t).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

/// A unit of asynchronous work, tracked by id until it reaches a terminal state.
///
/// Fields are only mutated through the transition methods, each of which
/// consults [`JobState::next`] first and leaves the record untouched when the
/// transition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    kind: JobKind,
    args: Vec<String>,
    max_retries: u32,
    retries_left: u32,
    timeout: Duration,
    state: JobState,
    enqueued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    result_ref: Option<BlobKey>,
    episodes: u32,
    last_error: Option<String>,
}

impl Job {
    /// Create a queued job. `args` are opaque blob references; the last one is
    /// where the output goes.
    pub fn new(id: JobId, kind: JobKind, args: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            args,
            max_retries: DEFAULT_MAX_RETRIES,
            retries_left: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_JOB_TIMEOUT,
            state: JobState::Queued,
            enqueued_at: Some(now),
            started_at: None,
            ended_at: None,
            result_ref: None,
            episodes: 0,
            last_error: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retries_left = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Input blob references (every argument but the last).
    pub fn inputs(&self) -> &[String] {
        match self.args.split_last() {
            Some((_, inputs)) => inputs,
            None => &[],
        }
    }

    /// Where the output is recorded once the job finishes.
    pub fn output_key(&self) -> BlobKey {
        BlobKey::new(self.kind.output_bucket(), self.id.to_string())
    }

    /// Output blob reference (the last argument).
    pub fn output(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.enqueued_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn result_ref(&self) -> Option<&BlobKey> {
        self.result_ref.as_ref()
    }

    /// Number of episodes started so far.
    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    /// Retry episodes consumed so far.
    pub fn retries_used(&self) -> u32 {
        self.max_retries - self.retries_left
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reference_time(&self) -> Option<DateTime<Utc>> {
        reference_time(self.state, self.enqueued_at, self.started_at, self.ended_at)
    }

    pub fn reference_elapsed(&self, now: DateTime<Utc>) -> Duration {
        elapsed_since(self.reference_time(), now)
    }

    fn advance(&mut self, transition: Transition) -> DomainResult<JobState> {
        let next = self.state.next(transition, self.retries_left)?;
        self.state = next;
        Ok(next)
    }

    /// Queued -> Started, opening a new episode.
    pub fn start(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.advance(Transition::Lease)?;
        self.started_at = Some(now);
        self.ended_at = None;
        self.episodes += 1;
        Ok(())
    }

    /// Started -> Finished.
    pub fn finish(&mut self, result_ref: BlobKey, now: DateTime<Utc>) -> DomainResult<()> {
        self.advance(Transition::Succeed)?;
        self.ended_at = Some(now);
        self.result_ref = Some(result_ref);
        Ok(())
    }

    /// Apply a classified fault: either requeue for another episode or fail.
    pub fn fault(
        &mut self,
        class: FaultClass,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<FaultOutcome> {
        let next = self.advance(Transition::Fault(class))?;
        self.last_error = Some(message.into());

        if next == JobState::Queued {
            self.retries_left -= 1;
            self.started_at = None;
            Ok(FaultOutcome::Retry {
                retries_left: self.retries_left,
            })
        } else {
            self.ended_at = Some(now);
            Ok(FaultOutcome::Failed)
        }
    }

    /// Started -> Stopped after the wall-clock budget ran out.
    pub fn stop(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.advance(Transition::TimedOut)?;
        self.ended_at = Some(now);
        self.last_error = Some(format!("exceeded wall-clock budget of {:?}", self.timeout));
        Ok(())
    }

    /// Queued|Started -> Canceled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.advance(Transition::Cancel)?;
        self.ended_at = Some(now);
        Ok(())
    }

    /// Started -> Queued for a redelivered job whose previous lease holder
    /// disappeared. Does not touch the retry budget.
    pub fn release_lease(&mut self) -> DomainResult<()> {
        self.advance(Transition::LeaseLost)?;
        self.started_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fit_job() -> Job {
        Job::new(
            JobId::new(),
            JobKind::Fit,
            vec!["http://store/datasets/a".into(), "http://store/models/b".into()],
            t(0),
        )
    }

    #[test]
    fn happy_path_sets_timestamps_per_state() {
        let mut job = fit_job();
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.reference_time(), Some(t(0)));

        job.start(t(5)).unwrap();
        assert_eq!(job.state(), JobState::Started);
        assert_eq!(job.reference_time(), Some(t(5)));
        assert_eq!(job.episodes(), 1);

        let key = BlobKey::new(Bucket::Models, job.id().to_string());
        job.finish(key.clone(), t(9)).unwrap();
        assert_eq!(job.state(), JobState::Finished);
        assert_eq!(job.reference_time(), Some(t(9)));
        assert_eq!(job.result_ref(), Some(&key));
        assert_eq!(job.reference_elapsed(t(12)), Duration::from_secs(3));
    }

    #[test]
    fn inputs_and_output_split_args() {
        let job = fit_job();
        assert_eq!(job.inputs(), &["http://store/datasets/a".to_string()]);
        assert_eq!(job.output(), Some("http://store/models/b"));
    }

    #[test]
    fn transient_fault_requeues_and_keeps_enqueued_at() {
        let mut job = fit_job().with_max_retries(2);
        job.start(t(1)).unwrap();

        let outcome = job.fault(FaultClass::Transient, "flaky", t(2)).unwrap();
        assert_eq!(outcome, FaultOutcome::Retry { retries_left: 1 });
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.started_at(), None);
        assert_eq!(job.enqueued_at(), Some(t(0)));
        assert_eq!(job.last_error(), Some("flaky"));
    }

    #[test]
    fn transient_fault_with_exhausted_budget_fails() {
        let mut job = fit_job().with_max_retries(0);
        job.start(t(1)).unwrap();

        let outcome = job.fault(FaultClass::Transient, "flaky", t(2)).unwrap();
        assert_eq!(outcome, FaultOutcome::Failed);
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.ended_at(), Some(t(2)));
    }

    #[test]
    fn fatal_fault_fails_without_spending_retries() {
        let mut job = fit_job();
        job.start(t(1)).unwrap();

        assert_eq!(
            job.fault(FaultClass::Fatal, "bad input", t(2)).unwrap(),
            FaultOutcome::Failed
        );
        assert_eq!(job.retries_left(), DEFAULT_MAX_RETRIES);
        assert_eq!(job.retries_used(), 0);
    }

    #[test]
    fn timeout_stops_the_job() {
        let mut job = fit_job();
        job.start(t(1)).unwrap();
        job.stop(t(601)).unwrap();
        assert_eq!(job.state(), JobState::Stopped);
        assert_eq!(job.ended_at(), Some(t(601)));
    }

    #[test]
    fn lease_loss_requeues_without_touching_budget() {
        let mut job = fit_job();
        job.start(t(1)).unwrap();
        job.release_lease().unwrap();

        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.retries_left(), DEFAULT_MAX_RETRIES);
        assert_eq!(job.started_at(), None);

        job.start(t(70)).unwrap();
        assert_eq!(job.episodes(), 2);
    }

    #[test]
    fn cancel_is_reachable_from_queued_and_started_only() {
        let mut queued = fit_job();
        queued.cancel(t(1)).unwrap();
        assert_eq!(queued.state(), JobState::Canceled);
        assert_eq!(queued.reference_time(), Some(t(1)));

        let mut started = fit_job();
        started.start(t(1)).unwrap();
        started.cancel(t(2)).unwrap();
        assert_eq!(started.state(), JobState::Canceled);
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        let mut job = fit_job();
        job.start(t(1)).unwrap();
        job.finish(BlobKey::new(Bucket::Models, "m"), t(2)).unwrap();
        let before = job.clone();

        assert!(job.start(t(3)).is_err());
        assert!(job.cancel(t(3)).is_err());
        assert!(job.stop(t(3)).is_err());
        assert!(job.release_lease().is_err());
        assert!(job.fault(FaultClass::Transient, "x", t(3)).is_err());
        assert!(matches!(
            job.finish(BlobKey::new(Bucket::Models, "m"), t(3)),
            Err(DomainError::InvalidTransition {
                from: JobState::Finished,
                transition: Transition::Succeed
            })
        ));
        assert_eq!(job, before);
    }

    #[test]
    fn queued_job_cannot_finish_or_fault() {
        let mut job = fit_job();
        assert!(job.finish(BlobKey::new(Bucket::Models, "m"), t(1)).is_err());
        assert!(job.fault(FaultClass::Fatal, "x", t(1)).is_err());
        assert!(job.stop(t(1)).is_err());
        assert_eq!(job.state(), JobState::Queued);
    }

    #[test]
    fn state_names_round_trip() {
        for state in [
            JobState::Queued,
            JobState::Started,
            JobState::Finished,
            JobState::Failed,
            JobState::Stopped,
            JobState::Canceled,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
            assert_eq!(
                serde_json::to_value(state).unwrap(),
                serde_json::json!(state.as_str())
            );
        }
    }

    fn arb_transition() -> impl Strategy<Value = Transition> {
        prop_oneof![
            Just(Transition::Lease),
            Just(Transition::Succeed),
            Just(Transition::Fault(FaultClass::Transient)),
            Just(Transition::Fault(FaultClass::Fatal)),
            Just(Transition::TimedOut),
            Just(Transition::Cancel),
            Just(Transition::LeaseLost),
        ]
    }

    fn apply(job: &mut Job, transition: Transition, now: DateTime<Utc>) -> DomainResult<()> {
        match transition {
            Transition::Lease => job.start(now),
            Transition::Succeed => job.finish(BlobKey::new(Bucket::Results, "r"), now),
            Transition::Fault(class) => job.fault(class, "boom", now).map(|_| ()),
            Transition::TimedOut => job.stop(now),
            Transition::Cancel => job.cancel(now),
            Transition::LeaseLost => job.release_lease(),
        }
    }

    proptest! {
        #[test]
        fn random_walks_respect_the_state_machine(
            max_retries in 0u32..6,
            steps in proptest::collection::vec(arb_transition(), 0..40),
        ) {
            let mut job = fit_job().with_max_retries(max_retries);
            let mut retry_episodes = 0u32;

            for (i, step) in steps.into_iter().enumerate() {
                let before = job.clone();
                let result = apply(&mut job, step, t(i as i64));

                if before.state().is_terminal() {
                    prop_assert!(result.is_err());
                }
                if result.is_err() {
                    prop_assert_eq!(&job, &before);
                    continue;
                }

                prop_assert!(job.retries_left() <= before.retries_left());
                if matches!(step, Transition::Fault(FaultClass::Transient))
                    && job.state() == JobState::Queued
                {
                    retry_episodes += 1;
                }
                prop_assert_eq!(job.enqueued_at(), Some(t(0)));
            }

            prop_assert!(retry_episodes <= max_retries);
            prop_assert_eq!(retry_episodes, job.retries_used());
        }

        #[test]
        fn reference_elapsed_never_decreases_while_state_holds(
            steps in proptest::collection::vec(arb_transition(), 0..12),
            polls in proptest::collection::vec(-50i64..10_000, 2..20),
        ) {
            let mut job = fit_job();
            for (i, step) in steps.into_iter().enumerate() {
                let _ = apply(&mut job, step, t(i as i64));
            }

            let mut polls = polls;
            polls.sort_unstable();
            let elapsed: Vec<Duration> = polls
                .iter()
                .map(|&secs| job.reference_elapsed(t(secs)))
                .collect();
            for pair in elapsed.windows(2) {
                prop_assert!(pair[0] <= pair[1], "{:?} in {}", elapsed, job.state());
            }
        }
    }
}
