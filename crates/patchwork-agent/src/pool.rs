//! Bounded parallel execution of scheduled steps.

use crate::scheduler::ConflictSchedule;
use futures::FutureExt as _;
use std::collections::HashSet;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What happened to every step the pool was given.
#[derive(Debug)]
pub struct PoolOutcome<T> {
    /// Results of steps that ran to completion, by step index
    pub completed: Vec<(usize, T)>,
    /// Steps whose task panicked or was cancelled, with the reason
    pub failed: Vec<(usize, String)>,
    /// Steps never started because the pool halted
    pub unstarted: Vec<usize>,
}

/// Runs steps with at most `max_concurrent` in flight, honouring conflicts.
#[derive(Debug, Clone, Copy)]
pub struct StepPool {
    max_concurrent: NonZeroUsize,
}

impl StepPool {
    /// Create a new pool
    pub const fn new(max_concurrent: NonZeroUsize) -> Self {
        Self { max_concurrent }
    }

    /// Maximum steps in flight.
    pub const fn max_concurrent(&self) -> NonZeroUsize {
        self.max_concurrent
    }

    /// Launches every step of `schedule` through `launch`.
    ///
    /// Once a completed result satisfies `halts`, no further steps start;
    /// steps already running are awaited and the rest are reported unstarted.
    pub async fn run<T, F, Fut, H>(
        &self,
        schedule: &ConflictSchedule,
        mut launch: F,
        halts: H,
    ) -> PoolOutcome<T>
    where
        T: Send + 'static,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        H: Fn(&T) -> bool,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.get()));
        let mut join_set = JoinSet::new();
        let mut started = HashSet::new();
        let mut running = HashSet::new();
        let mut halted = false;
        let mut outcome = PoolOutcome {
            completed: Vec::new(),
            failed: Vec::new(),
            unstarted: Vec::new(),
        };

        loop {
            if !halted {
                for index in schedule.ready(&started, &running) {
                    if schedule.conflicts_with_running(index, &running) {
                        continue;
                    }
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        break;
                    };

                    started.insert(index);
                    running.insert(index);
                    debug!("Starting step `{}`", schedule.name(index));
                    let future = launch(index);
                    join_set.spawn(async move {
                        let result = AssertUnwindSafe(future).catch_unwind().await;
                        drop(permit);
                        (index, result)
                    });
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((index, Ok(result))) => {
                    running.remove(&index);
                    if halts(&result) {
                        debug!("Step `{}` halts the pool", schedule.name(index));
                        halted = true;
                    }
                    outcome.completed.push((index, result));
                }
                Ok((index, Err(_))) => {
                    running.remove(&index);
                    warn!("Step `{}` panicked", schedule.name(index));
                    outcome.failed.push((index, "step task panicked".to_owned()));
                }
                Err(error) => {
                    warn!("Step task failed to join: {error}");
                }
            }
        }

        outcome.unstarted = (0..schedule.len())
            .filter(|index| !started.contains(index))
            .collect();
        outcome
    }
}
