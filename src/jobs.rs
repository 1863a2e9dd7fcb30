//! FIFO job queue for long-running map/analyse tasks.
//!
//! One dispatcher thread owns the queue and runs one job at a time; a
//! condition variable signals arrivals and a sentinel entry stops the
//! dispatcher.  A failed job is logged and marked, the queue moves on.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use serde::{Deserialize, Serialize};

pub type JobId = u32;

/// Lifecycle state of a job.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatusKind {
    #[default]
    Unknown,
    Queued,
    Running,
    Finished,
    Failed,
}

/// Status snapshot of one job, also persisted into screen manifests.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct JobStatus {
    pub status: JobStatusKind,
    pub progress: f32,
    pub action: String,
}

/// A unit of queued work.
pub trait Job: Send {
    /// Name the job is found under, e.g. the screen it maps.
    fn name(&self) -> &str;
    fn execute(&mut self) -> Result<(), anyhow::Error>;
}

type Entry = Option<(JobId, Box<dyn Job>)>;

#[derive(Default)]
struct Shared {
    queue: Mutex<VecDeque<Entry>>,
    arrived: Condvar,
    statuses: Mutex<HashMap<JobId, (String, JobStatus)>>,
}

impl Shared {
    fn set_status(&self, id: JobId, name: &str, kind: JobStatusKind) {
        let mut statuses = self.statuses.lock().expect("poisoned");
        let entry = statuses
            .entry(id)
            .or_insert_with(|| (name.to_string(), JobStatus::default()));
        entry.1.status = kind;
        if kind == JobStatusKind::Finished {
            entry.1.progress = 1.0;
        }
    }
}

/// The queue owner; dropping it stops the dispatcher thread.
pub struct JobScheduler {
    shared: Arc<Shared>,
    next_id: Mutex<JobId>,
    dispatcher: Option<std::thread::JoinHandle<()>>,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());

        let dispatcher = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || Self::run(&shared))
        };

        Self {
            shared,
            next_id: Mutex::new(1),
            dispatcher: Some(dispatcher),
        }
    }

    fn run(shared: &Shared) {
        loop {
            let entry = {
                let mut queue = shared.queue.lock().expect("poisoned");
                loop {
                    match queue.pop_front() {
                        Some(entry) => break entry,
                        None => {
                            queue = shared.arrived.wait(queue).expect("poisoned");
                        }
                    }
                }
            };

            let Some((id, mut job)) = entry else {
                break;
            };

            shared.set_status(id, job.name(), JobStatusKind::Running);
            tracing::info!("job {} ({}) started", id, job.name());

            match job.execute() {
                Ok(()) => {
                    shared.set_status(id, job.name(), JobStatusKind::Finished);
                    tracing::info!("job {} ({}) finished", id, job.name());
                }
                Err(e) => {
                    shared.set_status(id, job.name(), JobStatusKind::Failed);
                    tracing::error!("job {} ({}) failed: {}", id, job.name(), e);
                }
            }
        }
    }

    /// Enqueue a job and return its id.
    pub fn push(&self, job: Box<dyn Job>) -> JobId {
        let id = {
            let mut next_id = self.next_id.lock().expect("poisoned");
            let id = *next_id;
            *next_id += 1;
            id
        };

        self.shared.set_status(id, job.name(), JobStatusKind::Queued);

        let mut queue = self.shared.queue.lock().expect("poisoned");
        queue.push_back(Some((id, job)));
        self.shared.arrived.notify_one();

        id
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.shared
            .statuses
            .lock()
            .expect("poisoned")
            .get(&id)
            .map(|(_, status)| status.clone())
    }

    /// Most recently queued status for a job name, e.g. a screen being
    /// mapped.
    pub fn status_for(&self, name: &str) -> Option<JobStatus> {
        let statuses = self.shared.statuses.lock().expect("poisoned");
        statuses
            .iter()
            .filter(|(_, (n, _))| n == name)
            .max_by_key(|(id, _)| **id)
            .map(|(_, (_, status))| status.clone())
    }

    /// Stop the dispatcher after the jobs queued so far have run.
    pub fn stop(mut self) {
        self.push_sentinel_and_join();
    }

    fn push_sentinel_and_join(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            {
                let mut queue = self.shared.queue.lock().expect("poisoned");
                queue.push_back(None);
                self.shared.arrived.notify_one();
            }
            let _ = handle.join();
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.push_sentinel_and_join();
    }
}
