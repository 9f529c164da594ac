//! Bookkeeping for a batch of submitted transactions
//!
//! Listeners run on worker threads, so results travel back over channels.
//! A listener reports its error through a [`FailureSink`] before returning;
//! the completion listener reports the outcome. Since both run on the same
//! worker and the result listener always runs first, every failure is
//! already queued once its outcome arrives.

use blobq_core::{ListenerResult, Outcome, Result, TransactionId};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use tracing::debug;

use crate::exit_code::ExitCode;

/// Why one transfer of the batch did not go through
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    #[serde(skip)]
    pub code: ExitCode,
    pub message: String,
}

impl Failure {
    fn new(code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Handle a result listener uses to report its error
#[derive(Debug, Clone)]
pub struct FailureSink {
    index: usize,
    tx: Sender<(usize, Failure)>,
}

impl FailureSink {
    /// Forward a listener result, recording it first if it failed
    pub fn report(&self, result: ListenerResult) -> ListenerResult {
        if let Err(e) = &result {
            let failure = Failure::new(ExitCode::from_anyhow(e), format!("{e:#}"));
            let _ = self.tx.send((self.index, failure));
        }
        result
    }
}

pub struct Tracker {
    count: usize,
    pending: usize,
    outcomes: (Sender<(usize, Outcome)>, Receiver<(usize, Outcome)>),
    failures: (Sender<(usize, Failure)>, Receiver<(usize, Failure)>),
}

impl Tracker {
    /// Track a batch of `count` transfers, indexed from zero
    pub fn new(count: usize) -> Self {
        Self {
            count,
            pending: 0,
            outcomes: unbounded(),
            failures: unbounded(),
        }
    }

    pub fn failure_sink(&self, index: usize) -> FailureSink {
        FailureSink {
            index,
            tx: self.failures.0.clone(),
        }
    }

    /// Completion listener for transfer `index`
    pub fn on_complete(&self, index: usize) -> impl FnOnce(Outcome) + Send + 'static {
        let tx = self.outcomes.0.clone();
        move |outcome| {
            let _ = tx.send((index, outcome));
        }
    }

    /// Record the result of `execute`; rejected submissions never complete
    pub fn submitted(&mut self, index: usize, result: Result<TransactionId>) {
        match result {
            Ok(id) => {
                debug!(%id, index, "Transfer queued");
                self.pending += 1;
            }
            Err(e) => {
                let _ = self
                    .failures
                    .0
                    .send((index, Failure::new(ExitCode::from(&e), e.to_string())));
            }
        }
    }

    /// Block until every queued transfer completed
    ///
    /// Returns one entry per transfer, in submission order.
    pub fn wait(self) -> Vec<std::result::Result<(), Failure>> {
        let mut outcomes = vec![None; self.count];
        for (index, outcome) in self.outcomes.1.iter().take(self.pending) {
            outcomes[index] = Some(outcome);
        }

        let mut failures: Vec<Option<Failure>> = vec![None; self.count];
        for (index, failure) in self.failures.1.try_iter() {
            failures[index].get_or_insert(failure);
        }

        outcomes
            .into_iter()
            .zip(failures)
            .map(|(outcome, failure)| match (outcome, failure) {
                (_, Some(failure)) => Err(failure),
                (Some(Outcome::Succeeded), None) => Ok(()),
                (Some(Outcome::Cancelled), None) => Err(Failure::new(
                    ExitCode::Interrupted,
                    "cancelled before it started",
                )),
                (Some(Outcome::CloseFailed), None) => Err(Failure::new(
                    ExitCode::GeneralError,
                    "the stream could not be closed",
                )),
                (Some(outcome), None) => Err(Failure::new(
                    ExitCode::GeneralError,
                    format!("transfer ended as {outcome:?}"),
                )),
                (None, None) => Err(Failure::new(ExitCode::GeneralError, "transfer never ran")),
            })
            .collect()
    }
}

/// Exit code of a batch: the first failure's, or success
pub fn exit_code(results: &[std::result::Result<(), Failure>]) -> ExitCode {
    results
        .iter()
        .find_map(|r| r.as_ref().err())
        .map_or(ExitCode::Success, |f| f.code)
}
