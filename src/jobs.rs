use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Uniqueness policy for a named job submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// Cadence work: interchangeable, only the latest matters. A job still
    /// queued under this name is superseded by the new one.
    ReplacePending,
    /// Event work: must not pile up behind a slow run. Dropped outright if
    /// anything under this name is already running or queued.
    KeepIfRunning,
}

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    ReplacedPending,
    Dropped,
}

#[derive(Default)]
struct Slot {
    running: bool,
    pending: Option<BoxedJob>,
}

/// Runs named jobs with at most one pending and one executing job per name.
/// Jobs for different names are independent.
#[derive(Default)]
pub struct JobRunner {
    slots: Mutex<HashMap<String, Slot>>,
}

impl JobRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// True while a job under `name` is executing.
    pub fn is_running(&self, name: &str) -> bool {
        self.slots
            .lock()
            .expect("job slots poisoned")
            .get(name)
            .is_some_and(|slot| slot.running)
    }

    /// Submit `job` under `name`. Must be called from within a tokio
    /// runtime; the job executes on its own task so a slow job never blocks
    /// the submitter.
    pub fn submit<F>(self: &Arc<Self>, name: &str, policy: SubmitPolicy, job: F) -> SubmitOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.slots.lock().expect("job slots poisoned");
        let slot = slots.entry(name.to_string()).or_default();

        if slot.running || slot.pending.is_some() {
            return match policy {
                SubmitPolicy::ReplacePending => {
                    if slot.pending.replace(Box::pin(job)).is_some() {
                        SubmitOutcome::ReplacedPending
                    } else {
                        SubmitOutcome::Queued
                    }
                }
                SubmitPolicy::KeepIfRunning => SubmitOutcome::Dropped,
            };
        }

        slot.pending = Some(Box::pin(job));
        drop(slots);
        self.spawn_worker(name.to_string());
        SubmitOutcome::Queued
    }

    /// Drain-and-run loop for one name. Exits when the slot goes idle; a
    /// later submit spawns a fresh worker.
    fn spawn_worker(self: &Arc<Self>, name: String) {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut slots = runner.slots.lock().expect("job slots poisoned");
                    let slot = slots
                        .entry(name.clone())
                        .or_default();
                    match slot.pending.take() {
                        Some(job) => {
                            slot.running = true;
                            job
                        }
                        None => {
                            slot.running = false;
                            break;
                        }
                    }
                };
                job.await;
            }
        });
    }
}
