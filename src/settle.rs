//! "Settle all, collect errors" join combinator.
//!
//! Every fan-out in the crate goes through [`settle`]: all operations run to
//! completion before any outcome is inspected, so one failure never cancels
//! its siblings.

use std::future::Future;

use futures::future::join_all;

/// Outcomes of a settled batch, in submission order.
#[derive(Debug)]
pub struct Settled<T, E> {
    outcomes: Vec<Result<T, E>>,
}

impl<T, E> Settled<T, E> {
    /// Borrows every outcome.
    #[must_use]
    pub fn outcomes(&self) -> &[Result<T, E>] {
        &self.outcomes
    }

    /// Takes every outcome.
    #[must_use]
    pub fn into_outcomes(self) -> Vec<Result<T, E>> {
        self.outcomes
    }

    /// Number of failed operations.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_err()).count()
    }

    /// Splits the batch into successes and failures.
    #[must_use]
    pub fn into_parts(self) -> (Vec<T>, Vec<E>) {
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for outcome in self.outcomes {
            match outcome {
                Ok(value) => successes.push(value),
                Err(error) => failures.push(error),
            }
        }
        (successes, failures)
    }

    /// Returns every success, or the first failure in submission order as
    /// the representative error of the batch.
    ///
    /// # Errors
    ///
    /// Returns the first failure when any operation failed.
    pub fn into_result(self) -> Result<Vec<T>, E> {
        self.outcomes.into_iter().collect()
    }
}

/// Awaits every operation, regardless of individual failure.
pub async fn settle<I, F, T, E>(operations: I) -> Settled<T, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    Settled {
        outcomes: join_all(operations).await,
    }
}
