use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use super::{Job, TaskKey, TaskSnapshot, TaskState, TaskStatus};
use crate::error::CollationError;

/// Executes jobs on behalf of the [`TaskManager`].
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, job: &Job, status: &TaskStatus) -> Result<(), CollationError>;
}

struct Queued {
    key: TaskKey,
    job: Job,
    status: Arc<TaskStatus>,
}

struct Entry {
    job: Job,
    status: Arc<TaskStatus>,
}

type Registry = Arc<Mutex<HashMap<TaskKey, Entry>>>;

/// Fixed pool of worker threads fed by a channel.
///
/// At most one task per [`TaskKey`] is in flight; resubmitting an unfinished
/// key returns the existing task.
pub struct TaskManager {
    sender: Option<Sender<Queued>>,
    workers: Vec<JoinHandle<()>>,
    tasks: Registry,
    expiry: Duration,
}

impl TaskManager {
    pub fn new<R: JobRunner>(runner: Arc<R>, workers: usize, expiry: Duration) -> Self {
        let (sender, receiver) = mpsc::channel::<Queued>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|index| {
                let runner = Arc::clone(&runner);
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("variance-worker-{index}"))
                    .spawn(move || worker_loop(&*runner, &receiver))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(error = %err, "Failed to spawn worker thread");
                    None
                }
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            expiry,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<TaskKey, Entry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `job` unless an unfinished task with the same key exists.
    pub fn submit(&self, job: Job) -> Result<TaskKey, CollationError> {
        let key = job.key();
        let mut tasks = self.registry();
        if tasks
            .get(&key)
            .is_some_and(|existing| !existing.status.state().is_finished())
        {
            debug!(task = %key, "Task already in flight");
            return Ok(key);
        }

        let Some(sender) = &self.sender else {
            return Err(CollationError::Validation("task manager is shut down".into()));
        };

        let status = Arc::new(TaskStatus::new());
        sender
            .send(Queued {
                key: key.clone(),
                job: job.clone(),
                status: Arc::clone(&status),
            })
            .map_err(|_| CollationError::Validation("task workers have stopped".into()))?;
        tasks.insert(key.clone(), Entry { job, status });
        info!(task = %key, "Queued task");
        Ok(key)
    }

    #[must_use]
    pub fn status(&self, key: &TaskKey) -> Option<TaskSnapshot> {
        self.registry().get(key).map(|entry| entry.status.snapshot())
    }

    /// Shared status handle, for callers that wait on a task.
    #[must_use]
    pub fn handle(&self, key: &TaskKey) -> Option<Arc<TaskStatus>> {
        self.registry().get(key).map(|entry| Arc::clone(&entry.status))
    }

    /// Request cancellation. Returns false for unknown or finished tasks.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.registry().get(key) {
            Some(entry) if !entry.status.state().is_finished() => {
                entry.status.cancel();
                true
            }
            _ => false,
        }
    }

    /// Unfinished tasks touching `set` whose job rewrites the set.
    #[must_use]
    pub fn active_mutations(&self, set: crate::model::SetId) -> Vec<TaskKey> {
        self.registry()
            .iter()
            .filter(|(_, entry)| {
                entry.job.set() == set
                    && entry.job.mutates_set()
                    && !entry.status.state().is_finished()
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Forget finished tasks older than the expiry. Returns how many.
    pub fn expire_finished(&self) -> usize {
        let cutoff = Utc::now() - self.expiry;
        let mut tasks = self.registry();
        let before = tasks.len();
        tasks.retain(|_, entry| entry.status.ended_at().is_none_or(|ended| ended > cutoff));
        before - tasks.len()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

fn worker_loop(runner: &dyn JobRunner, receiver: &Mutex<Receiver<Queued>>) {
    loop {
        let next = {
            let Ok(receiver) = receiver.lock() else {
                return;
            };
            receiver.recv()
        };
        let Ok(queued) = next else {
            return;
        };
        run_one(runner, &queued);
    }
}

fn run_one(runner: &dyn JobRunner, queued: &Queued) {
    let Queued { key, job, status } = queued;
    if status.is_cancelled() {
        status.finish(TaskState::Canceled, None);
        info!(task = %key, "Task canceled before start");
        return;
    }

    status.begin();
    match runner.run(job, status) {
        Ok(()) => {
            status.finish(TaskState::Complete, None);
            info!(task = %key, "Task complete");
        }
        Err(err) if err.is_cancelled() => {
            status.finish(TaskState::Canceled, None);
            info!(task = %key, "Task canceled");
        }
        Err(err) => {
            error!(task = %key, code = %err.code(), error = %err, "Task failed");
            status.finish(TaskState::Failed, Some(err.to_string()));
        }
    }
}
