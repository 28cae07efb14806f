//! Pulling images with bounded retries.
//!
//! The external pull call and the sleep between attempts are both injected,
//! so the retry state machine can be driven without a container engine or
//! wall-clock delays.

use std::fmt;
use std::time::Duration;

/// Retries after the first attempt, unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Fixed delay between attempts, unless configured otherwise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Failure messages containing this (case-insensitively) are retryable.
const TRANSIENT_MARKER: &str = "timeout";

/// The classified result of a single pull attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The image was pulled.
    Success,
    /// A failure worth retrying; carries the failure message verbatim.
    TransientFailure(String),
    /// A failure that retrying will not fix; carries the message verbatim.
    FatalFailure(String),
}

/// Classify a failure message.
///
/// Only timeouts are considered transient.
pub fn classify_failure(message: &str) -> AttemptOutcome {
    if message.to_lowercase().contains(TRANSIENT_MARKER) {
        AttemptOutcome::TransientFailure(message.to_string())
    } else {
        AttemptOutcome::FatalFailure(message.to_string())
    }
}

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Constant delay before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// One invocation of the pull call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// What happened.
    pub outcome: AttemptOutcome,
    /// Delay slept after this attempt; zero if none.
    pub backoff: Duration,
}

/// The result of [`Puller::pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    /// Whether the image was eventually pulled.
    pub success: bool,
    /// Empty on success; otherwise the last failure message.
    pub message: String,
    /// Every attempt made, in order.
    pub attempts: Vec<PullAttempt>,
}

impl PullReport {
    /// Collapse into `(success, message)`.
    pub fn into_pair(self) -> (bool, String) {
        (self.success, self.message)
    }
}

/// Drives a pull call through [`RetryPolicy`].
///
/// `F` performs one pull of `(reference, platform)`; its error text is what
/// gets classified. `S` sleeps between attempts.
pub struct Puller<F, S> {
    pull: F,
    sleep: S,
    policy: RetryPolicy,
}

impl<F, S> fmt::Debug for Puller<F, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Puller")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<F> Puller<F, fn(Duration)>
where
    F: FnMut(&str, Option<&str>) -> anyhow::Result<()>,
{
    /// A puller with the default policy that sleeps the current thread.
    pub fn new(pull: F) -> Self {
        Self {
            pull,
            sleep: std::thread::sleep,
            policy: RetryPolicy::default(),
        }
    }
}

impl<F, S> Puller<F, S>
where
    F: FnMut(&str, Option<&str>) -> anyhow::Result<()>,
    S: FnMut(Duration),
{
    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the sleeper.
    pub fn with_sleep<S2: FnMut(Duration)>(self, sleep: S2) -> Puller<F, S2> {
        Puller {
            pull: self.pull,
            sleep,
            policy: self.policy,
        }
    }

    /// Pull `reference`, retrying transient failures.
    ///
    /// Makes at most `1 + max_retries` calls. Never returns an error; a
    /// fatal failure and an exhausted retry budget both yield an
    /// unsuccessful report carrying the last failure message.
    pub fn pull(&mut self, reference: &str, platform: Option<&str>) -> PullReport {
        let mut attempts = Vec::new();
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!("Pull attempt {attempt} for {reference}");
            let outcome = match (self.pull)(reference, platform) {
                Ok(()) => AttemptOutcome::Success,
                Err(e) => classify_failure(&format!("{e:#}")),
            };
            let failure = match &outcome {
                AttemptOutcome::Success => None,
                AttemptOutcome::TransientFailure(msg) | AttemptOutcome::FatalFailure(msg) => {
                    Some(msg.clone())
                }
            };
            let retry = matches!(outcome, AttemptOutcome::TransientFailure(_))
                && attempt <= self.policy.max_retries;
            let backoff = if retry {
                self.policy.delay
            } else {
                Duration::ZERO
            };
            attempts.push(PullAttempt {
                attempt,
                outcome,
                backoff,
            });

            match failure {
                None => {
                    tracing::info!("Pulled {reference} after {attempt} attempt(s)");
                    return PullReport {
                        success: true,
                        message: String::new(),
                        attempts,
                    };
                }
                Some(message) if retry => {
                    tracing::warn!(
                        "Pull of {reference} timed out (attempt {attempt}/{}), retrying in {}s: {message}",
                        self.policy.max_retries + 1,
                        backoff.as_secs_f32()
                    );
                    (self.sleep)(backoff);
                }
                Some(message) => {
                    tracing::debug!("Giving up on {reference} after {attempt} attempt(s)");
                    return PullReport {
                        success: false,
                        message,
                        attempts,
                    };
                }
            }
        }
    }
}
