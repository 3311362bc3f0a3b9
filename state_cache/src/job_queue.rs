use core::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};
use std::{collections::HashMap, sync::Arc};

use epoch_context::StateContext;
use futures::future::{BoxFuture, FutureExt as _, Shared};
use log::{debug, warn};
use parking_lot::Mutex;
use std_ext::ArcExt as _;
use tokio_util::sync::CancellationToken;
use types::{
    phase0::primitives::{Slot, H256},
    preset::Preset,
};

use crate::error::Error;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegenKey {
    pub block_root: H256,
    pub slot: Slot,
}

pub type JobResult<P> = Result<StateContext<P>, Error>;

pub type SharedJob<P> = Shared<BoxFuture<'static, JobResult<P>>>;

struct Job<P: Preset> {
    id: u64,
    result: SharedJob<P>,
    cancellation_token: CancellationToken,
}

type Jobs<P> = Arc<Mutex<HashMap<RegenKey, Job<P>>>>;

/// In-flight regenerations, at most one per key.
///
/// Requests for a key that is already being computed wait for the same result.
/// Jobs run to completion even if every waiter goes away, so their results can still be cached.
pub struct JobQueue<P: Preset> {
    jobs: Jobs<P>,
    next_id: AtomicU64,
    queue_size: usize,
    shutdown: CancellationToken,
}

impl<P: Preset> JobQueue<P> {
    #[must_use]
    pub fn new(queue_size: usize) -> Self {
        Self {
            jobs: Jobs::default(),
            next_id: AtomicU64::new(0),
            queue_size,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the result of the job for `key`, starting it with `compute` if there is none.
    ///
    /// `compute` receives a token that is cancelled when the job is cancelled or the queue is
    /// aborted. Waiters are rejected with [`Error::Aborted`] as soon as that happens.
    pub fn submit<F, C>(&self, key: RegenKey, compute: C) -> Result<SharedJob<P>, Error>
    where
        C: FnOnce(CancellationToken) -> F,
        F: Future<Output = JobResult<P>> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(Error::Aborted);
        }

        let mut jobs = self.jobs.lock();

        if let Some(job) = jobs.get(&key) {
            debug!("waiting for regeneration already in progress ({key:?})");
            return Ok(job.result.clone());
        }

        if jobs.len() >= self.queue_size {
            let queue_size = self.queue_size;
            warn!("rejecting regeneration of {key:?} because {queue_size} are in progress");
            return Err(Error::Throttled { queue_size });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancellation_token = self.shutdown.child_token();
        let computation = compute(cancellation_token.clone());
        let job_token = cancellation_token.clone();
        let job_registry = self.jobs.clone_arc();

        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;

                () = job_token.cancelled() => Err(Error::Aborted),
                result = computation => result,
            };

            let mut jobs = job_registry.lock();

            // A cancelled job may already have been replaced by a newer one for the same key.
            if jobs.get(&key).is_some_and(|job| job.id == id) {
                jobs.remove(&key);
            }

            drop(jobs);

            result
        });

        let result = async move {
            handle
                .await
                .unwrap_or_else(|error| Err(Error::transition(error.into())))
        }
        .boxed()
        .shared();

        jobs.insert(
            key,
            Job {
                id,
                result: result.clone(),
                cancellation_token,
            },
        );

        Ok(result)
    }

    /// Rejects every waiter on the job for `key`. Returns `false` if there is no such job.
    ///
    /// The job leaves the queue immediately. Later requests for `key` start a new job
    /// and the cancelled one no longer counts against the queue size.
    pub fn cancel(&self, key: RegenKey) -> bool {
        let Some(job) = self.jobs.lock().remove(&key) else {
            return false;
        };

        warn!("cancelling regeneration of {key:?}");

        job.cancellation_token.cancel();

        true
    }

    /// Rejects every current and future job.
    pub fn abort(&self) {
        let in_flight = self.len();

        warn!("aborting {in_flight} regenerations in progress");

        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
