//! Bounded worker pool with cooperative cancellation
//!
//! Tasks are dispatched to at most `workers` scoped threads. Cancellation is
//! checked before each task starts: in-flight tasks always run to completion,
//! tasks that never started are reported as `NotStarted`.

use crossbeam::channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Caller-supplied cancellation signal
///
/// Cloning shares the underlying flag.
///
/// # Examples
///
/// ```
/// use sitebinder::core::pool::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result slot for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<R> {
    /// Task ran to completion
    Completed(R),
    /// Task was never started because of cancellation
    NotStarted,
}

impl<R> TaskOutcome<R> {
    /// Completed value, if any
    pub fn completed(self) -> Option<R> {
        match self {
            TaskOutcome::Completed(r) => Some(r),
            TaskOutcome::NotStarted => None,
        }
    }
}

/// Run `task` over `items` with at most `workers` tasks in flight
///
/// Outcomes are returned in input order. A panic inside a task is
/// propagated to the caller once all workers have stopped.
///
/// # Examples
///
/// ```
/// use sitebinder::core::pool::{run_bounded, TaskOutcome};
///
/// let squares = run_bounded(&[1, 2, 3], 2, None, |n| n * n);
/// assert_eq!(
///     squares,
///     vec![TaskOutcome::Completed(1), TaskOutcome::Completed(4), TaskOutcome::Completed(9)]
/// );
/// ```
pub fn run_bounded<T, R, F>(
    items: &[T],
    workers: usize,
    cancel: Option<&CancellationToken>,
    task: F,
) -> Vec<TaskOutcome<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let mut outcomes: Vec<TaskOutcome<R>> = items.iter().map(|_| TaskOutcome::NotStarted).collect();
    if items.is_empty() {
        return outcomes;
    }

    let workers = workers.clamp(1, items.len());
    let (job_tx, job_rx) = channel::unbounded::<usize>();
    for idx in 0..items.len() {
        // Receiver is alive until the scope below ends
        let _ = job_tx.send(idx);
    }
    drop(job_tx);

    let (result_tx, result_rx) = channel::unbounded::<(usize, R)>();
    let task = &task;

    let scoped = crossbeam::thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move |_| {
                for idx in job_rx.iter() {
                    if cancel.map(CancellationToken::is_cancelled).unwrap_or(false) {
                        break;
                    }
                    let result = task(&items[idx]);
                    if result_tx.send((idx, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    if let Err(panic) = scoped {
        std::panic::resume_unwind(panic);
    }

    for (idx, result) in result_rx.try_iter() {
        outcomes[idx] = TaskOutcome::Completed(result);
    }
    outcomes
}
