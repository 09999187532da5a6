//! Isolated iteration over a batch of fallible steps.
//!
//! Both the reconciliation merge loop and the qualification batch share the
//! same discipline: every element gets its own attempt, one failing element
//! never aborts the batch, and the caller reduces the tagged outcome list
//! into counters at the end. Futures are created lazily by the caller and
//! executed strictly in order, with an optional fixed delay between calls
//! for rate-limited collaborators.

use std::future::Future;
use std::time::Duration;

use tb_core::TbError;

#[derive(Debug)]
pub enum StepOutcome<T> {
    Ok(T),
    Failed { label: String, error: TbError },
}

impl<T> StepOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Run every task to completion, in order, isolating failures.
///
/// Returns exactly one outcome per input task, in input order. `delay` is
/// applied between consecutive calls, not before the first.
pub async fn run_isolated<T, Fut>(
    tasks: Vec<(String, Fut)>,
    delay: Option<Duration>,
) -> Vec<StepOutcome<T>>
where
    Fut: Future<Output = Result<T, TbError>>,
{
    let mut outcomes = Vec::with_capacity(tasks.len());
    for (index, (label, task)) in tasks.into_iter().enumerate() {
        if index > 0 {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        match task.await {
            Ok(value) => outcomes.push(StepOutcome::Ok(value)),
            Err(error) => {
                tracing::warn!(item = %label, error = %error, "batch step failed");
                outcomes.push(StepOutcome::Failed { label, error });
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn step(value: u32) -> Result<u32, TbError> {
        if value % 2 == 0 {
            Ok(value * 10)
        } else {
            Err(TbError::Internal(format!("odd input: {value}")))
        }
    }

    #[tokio::test]
    async fn one_outcome_per_input_in_order() {
        let tasks = vec![
            ("a".to_string(), step(2)),
            ("b".to_string(), step(3)),
            ("c".to_string(), step(4)),
        ];
        let outcomes = run_isolated(tasks, None).await;
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], StepOutcome::Ok(20)));
        assert!(matches!(outcomes[1], StepOutcome::Failed { .. }));
        assert!(matches!(outcomes[2], StepOutcome::Ok(40)));
    }

    #[tokio::test]
    async fn failure_carries_its_label() {
        let outcomes = run_isolated(vec![("lead-7".to_string(), step(7))], None).await;
        match &outcomes[0] {
            StepOutcome::Failed { label, error } => {
                assert_eq!(label, "lead-7");
                assert!(error.to_string().contains("odd input"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delay_applies_between_calls_not_before_first() {
        let started = tokio::time::Instant::now();
        let tasks = vec![
            ("a".to_string(), step(2)),
            ("b".to_string(), step(4)),
            ("c".to_string(), step(6)),
        ];
        let outcomes = run_isolated(tasks, Some(Duration::from_millis(250))).await;
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 3);
        // Two gaps for three calls.
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let outcomes: Vec<StepOutcome<u32>> =
            run_isolated::<u32, std::future::Ready<Result<u32, TbError>>>(vec![], None).await;
        assert!(outcomes.is_empty());
    }
}
