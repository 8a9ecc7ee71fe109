//! Ordered execution of fallible steps under one failure policy
//!
//! The runner does not know what a step does. A `StepTarget` names its steps
//! and executes them; the runner sequences them, logs every failure with its
//! position and attempt, and applies the policy selected for the invocation.

use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::traits::{Prompt, StepDecision};
use async_trait::async_trait;
use std::fmt::Display;
use std::sync::Arc;

/// How a step failure affects the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// First failure aborts and propagates
    Strict,
    /// Failures are logged and skipped
    Forced,
    /// The operator decides on the first failure
    Interactive,
}

impl FailurePolicy {
    /// `--force` wins over `--batch`; neither means interactive
    pub fn from_flags(batch: bool, force: bool) -> Self {
        match (batch, force) {
            (_, true) => FailurePolicy::Forced,
            (true, false) => FailurePolicy::Strict,
            (false, false) => FailurePolicy::Interactive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Strict => "strict",
            FailurePolicy::Forced => "forced",
            FailurePolicy::Interactive => "interactive",
        }
    }
}

/// Something that can execute named steps
#[async_trait]
pub trait StepTarget: Send {
    type Step: Copy + Display + Send + Sync;

    async fn run_step(&mut self, step: Self::Step) -> Result<(), PublishError>;
}

/// A recorded step failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: String,
    /// 1-based position in the step list
    pub index: usize,
    /// 1-based attempt number
    pub attempt: u32,
    pub message: String,
}

/// Outcome of a complete run
#[derive(Debug, Clone, Default)]
pub struct StepSummary {
    pub completed: Vec<String>,
    pub failures: Vec<StepFailure>,
}

impl StepSummary {
    pub fn had_errors(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct StepRunner {
    policy: FailurePolicy,
    prompt: Arc<dyn Prompt>,
    log: PublishLog,
}

impl StepRunner {
    pub fn new(policy: FailurePolicy, prompt: Arc<dyn Prompt>, log: PublishLog) -> Self {
        Self { policy, prompt, log }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run `steps` in order against `target`
    ///
    /// Returns `StepFailed` when a strict run fails and `Cancelled` when the
    /// operator aborts; otherwise the summary lists what failed.
    pub async fn run<T: StepTarget>(
        &self,
        target: &mut T,
        steps: &[T::Step],
    ) -> Result<StepSummary, PublishError> {
        let mut summary = StepSummary::default();
        let total = steps.len();
        // set once the operator chose to continue past a failure
        let mut continued = false;

        for (i, step) in steps.iter().enumerate() {
            let index = i + 1;
            let mut attempt = 1;
            loop {
                self.log
                    .info(format!("execute step {}/{} {}", index, total, step));
                let error = match target.run_step(*step).await {
                    Ok(()) => {
                        summary.completed.push(step.to_string());
                        break;
                    }
                    Err(e) => e,
                };

                let failure = StepFailure {
                    step: step.to_string(),
                    index,
                    attempt,
                    message: error.to_string(),
                };
                self.log.error(format!(
                    "step {} ({}/{}) attempt {} failed: {}",
                    failure.step, index, total, attempt, failure.message
                ));

                match self.policy {
                    FailurePolicy::Strict => {
                        return Err(PublishError::StepFailed {
                            step: failure.step,
                            message: failure.message,
                        });
                    }
                    FailurePolicy::Forced => {
                        summary.failures.push(failure);
                        break;
                    }
                    FailurePolicy::Interactive if continued => {
                        summary.failures.push(failure);
                        break;
                    }
                    FailurePolicy::Interactive => {
                        let question = format!(
                            "Step {} failed: {}. Retry, continue or abort?",
                            failure.step, failure.message
                        );
                        match self.prompt.decide(&question).await? {
                            StepDecision::Retry => {
                                self.log.warn(format!("retrying step {}", failure.step));
                                attempt += 1;
                            }
                            StepDecision::Continue => {
                                self.log.warn("continue with errors");
                                summary.failures.push(failure);
                                continued = true;
                                break;
                            }
                            StepDecision::Abort => {
                                self.log.error("aborted by operator");
                                return Err(PublishError::Cancelled);
                            }
                        }
                    }
                }
            }
        }

        if summary.had_errors() {
            self.log.error("Metadata/data upload failed");
            if self.policy == FailurePolicy::Forced {
                self.log.warn("continue with errors (forced)");
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::fmt;
    use std::sync::Mutex;

    /// Prompt answering from a script; records the questions
    #[derive(Default)]
    pub(crate) struct ScriptedPrompt {
        pub confirms: Mutex<VecDeque<bool>>,
        pub decisions: Mutex<VecDeque<StepDecision>>,
        pub asked: Mutex<Vec<String>>,
    }

    impl ScriptedPrompt {
        pub(crate) fn with_decisions(decisions: &[StepDecision]) -> Self {
            Self {
                decisions: Mutex::new(decisions.iter().copied().collect()),
                ..Default::default()
            }
        }

        pub(crate) fn questions(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prompt for ScriptedPrompt {
        async fn confirm(&self, message: &str) -> Result<bool, PublishError> {
            self.asked.lock().unwrap().push(message.to_string());
            Ok(self.confirms.lock().unwrap().pop_front().unwrap_or(true))
        }

        async fn decide(&self, message: &str) -> Result<StepDecision, PublishError> {
            self.asked.lock().unwrap().push(message.to_string());
            Ok(self
                .decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(StepDecision::Abort))
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Op {
        A,
        B,
        C,
    }

    impl fmt::Display for Op {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    /// Fails each listed step a given number of times
    struct Flaky {
        failures: Vec<(Op, u32)>,
        calls: Vec<Op>,
    }

    #[async_trait]
    impl StepTarget for Flaky {
        type Step = Op;

        async fn run_step(&mut self, step: Op) -> Result<(), PublishError> {
            self.calls.push(step);
            for (op, remaining) in self.failures.iter_mut() {
                if *op == step && *remaining > 0 {
                    *remaining -= 1;
                    return Err(PublishError::storage(format!("{} broke", step)));
                }
            }
            Ok(())
        }
    }

    fn flaky(failures: &[(Op, u32)]) -> Flaky {
        Flaky {
            failures: failures.to_vec(),
            calls: Vec::new(),
        }
    }

    fn runner(policy: FailurePolicy, prompt: ScriptedPrompt) -> (StepRunner, PublishLog) {
        let log = PublishLog::default();
        (StepRunner::new(policy, Arc::new(prompt), log.clone()), log)
    }

    #[test]
    fn test_policy_from_flags() {
        assert_eq!(FailurePolicy::from_flags(false, false), FailurePolicy::Interactive);
        assert_eq!(FailurePolicy::from_flags(true, false), FailurePolicy::Strict);
        assert_eq!(FailurePolicy::from_flags(true, true), FailurePolicy::Forced);
        assert_eq!(FailurePolicy::from_flags(false, true), FailurePolicy::Forced);
    }

    #[tokio::test]
    async fn test_strict_stops_at_first_failure() {
        let (runner, log) = runner(FailurePolicy::Strict, ScriptedPrompt::default());
        let mut target = flaky(&[(Op::B, 1)]);

        let err = runner
            .run(&mut target, &[Op::A, Op::B, Op::C])
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::StepFailed { ref step, .. } if step == "B"));
        assert_eq!(target.calls, vec![Op::A, Op::B]);
        assert!(log.lines().iter().any(|l| l.contains("step B (2/3) attempt 1 failed")));
    }

    #[tokio::test]
    async fn test_forced_runs_everything() {
        let (runner, log) = runner(FailurePolicy::Forced, ScriptedPrompt::default());
        let mut target = flaky(&[(Op::A, 1), (Op::C, 1)]);

        let summary = runner.run(&mut target, &[Op::A, Op::B, Op::C]).await.unwrap();

        assert!(summary.had_errors());
        assert_eq!(summary.completed, vec!["B"]);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.failures[1].index, 3);
        assert!(log.lines().iter().any(|l| l.contains("continue with errors")));
    }

    #[tokio::test]
    async fn test_interactive_retry_then_succeeds() {
        let prompt = ScriptedPrompt::with_decisions(&[StepDecision::Retry]);
        let (runner, _) = runner(FailurePolicy::Interactive, prompt);
        let mut target = flaky(&[(Op::A, 1)]);

        let summary = runner.run(&mut target, &[Op::A, Op::B]).await.unwrap();

        assert!(!summary.had_errors());
        assert_eq!(target.calls, vec![Op::A, Op::A, Op::B]);
    }

    #[tokio::test]
    async fn test_interactive_continue_stops_prompting() {
        let prompt = Arc::new(ScriptedPrompt::with_decisions(&[StepDecision::Continue]));
        let runner = StepRunner::new(FailurePolicy::Interactive, prompt.clone(), PublishLog::default());
        let mut target = flaky(&[(Op::A, 1), (Op::C, 1)]);

        let summary = runner.run(&mut target, &[Op::A, Op::B, Op::C]).await.unwrap();

        assert_eq!(summary.failures.len(), 2);
        assert_eq!(prompt.questions().len(), 1);
    }

    #[tokio::test]
    async fn test_interactive_abort_is_cancelled() {
        let prompt = ScriptedPrompt::with_decisions(&[StepDecision::Retry, StepDecision::Abort]);
        let (runner, _) = runner(FailurePolicy::Interactive, prompt);
        let mut target = flaky(&[(Op::B, 5)]);

        let err = runner.run(&mut target, &[Op::A, Op::B, Op::C]).await.unwrap_err();

        assert!(matches!(err, PublishError::Cancelled));
        assert_eq!(target.calls, vec![Op::A, Op::B, Op::B]);
    }
}
