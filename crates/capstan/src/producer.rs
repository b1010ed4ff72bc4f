//! Per-queue worker pool (§4.2). One [`Producer`] actor per
//! `(instance, queue)`; it is the only component permitted to claim jobs
//! for that queue on this node.

use crate::config::QueueConfig;
use crate::executor::{self, ExecutorOutcome};
use crate::job::Transition;
use crate::notify::{Channel, Notifier};
use crate::store::{JobStore, QueueSnapshot};
use crate::worker::WorkerRegistry;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Commands a Producer accepts, the in-process half of §4.2's inputs
/// (signals arrive over the notifier and are translated to these by the
/// actor's own listener loop; tests and the Midwife can also send them
/// directly).
pub enum ProducerCommand {
    /// An `insert` notification landed for this queue (or a staging
    /// pulse) — attempt a dispatch.
    TryDispatch,
    Pause,
    Resume,
    Scale(usize),
    Pkill { job_id: i64 },
    CheckQueue { reply: tokio::sync::oneshot::Sender<QueueSnapshot> },
    Shutdown,
}

#[derive(Clone)]
pub struct ProducerHandle {
    commands: mpsc::Sender<ProducerCommand>,
}

impl ProducerHandle {
    pub async fn try_dispatch(&self) {
        let _ = self.commands.send(ProducerCommand::TryDispatch).await;
    }

    pub async fn pause(&self) {
        let _ = self.commands.send(ProducerCommand::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.commands.send(ProducerCommand::Resume).await;
    }

    pub async fn scale(&self, limit: usize) {
        let _ = self.commands.send(ProducerCommand::Scale(limit)).await;
    }

    pub async fn pkill(&self, job_id: i64) {
        let _ = self.commands.send(ProducerCommand::Pkill { job_id }).await;
    }

    pub async fn check_queue(&self) -> Option<QueueSnapshot> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.commands
            .send(ProducerCommand::CheckQueue { reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(ProducerCommand::Shutdown).await;
    }

    /// The number of in-flight tasks, polled by the Watchman during
    /// graceful shutdown (§4.8 point 2). Backed by the same `CheckQueue`
    /// round-trip as `check_queue`.
    pub async fn running_count(&self) -> usize {
        self.check_queue().await.map(|s| s.running.len()).unwrap_or(0)
    }
}

struct RunningJob {
    task: JoinHandle<()>,
}

/// A circuit breaker tripped when the store reports a transient error
/// during dispatch (§4.2 "Failure semantics"): suppress further claims
/// for a backoff interval while continuing to serve signals.
struct Circuit {
    tripped_until: Option<Instant>,
    backoff: Duration,
}

impl Circuit {
    fn new(backoff: Duration) -> Self {
        Self {
            tripped_until: None,
            backoff,
        }
    }

    fn is_open(&self) -> bool {
        self.tripped_until.map(|until| Instant::now() < until).unwrap_or(false)
    }

    fn trip(&mut self) {
        self.tripped_until = Some(Instant::now() + self.backoff);
    }
}

pub fn spawn(
    instance: String,
    node: String,
    queue_config: QueueConfig,
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
    workers: Arc<WorkerRegistry>,
) -> ProducerHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ProducerCommand>(256);
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<ExecutorOutcome>(256);

    let ident = format!("{instance}.{node}");

    tokio::spawn(async move {
        let queue = queue_config.queue.clone();
        let mut limit = queue_config.limit;
        let mut paused = queue_config.paused;
        let mut running: HashMap<i64, RunningJob> = HashMap::new();
        let mut last_dispatch_at: Option<Instant> = None;
        let started_at = Utc::now();
        let mut circuit = Circuit::new(Duration::from_secs(5));
        let mut cooldown_deadline: Option<Instant> = None;

        let mut inbox = notifier
            .listen(&[Channel::Insert, Channel::Signal], Some(ident.clone()))
            .await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ProducerCommand::TryDispatch) => {}
                        Some(ProducerCommand::Pause) => { paused = true; }
                        Some(ProducerCommand::Resume) => { paused = false; }
                        Some(ProducerCommand::Scale(new_limit)) => { limit = new_limit; }
                        Some(ProducerCommand::Pkill { job_id }) => {
                            pkill(&store, &mut running, job_id).await;
                            continue;
                        }
                        Some(ProducerCommand::CheckQueue { reply }) => {
                            let snapshot = QueueSnapshot {
                                queue: queue.clone(),
                                node: node.clone(),
                                limit,
                                paused,
                                running: running.keys().copied().collect(),
                                started_at,
                            };
                            let _ = reply.send(snapshot);
                            continue;
                        }
                        Some(ProducerCommand::Shutdown) | None => {
                            for job in running.values() {
                                job.task.abort();
                            }
                            break;
                        }
                    }
                }
                notification = inbox.recv() => {
                    let Some(notification) = notification else { continue };
                    if !notification_targets_this_queue(&notification, &queue) {
                        continue;
                    }
                    if let Some(signal) = decode_signal(&notification) {
                        apply_signal(signal, &queue, &mut paused, &mut limit, &store, &mut running).await;
                    }
                }
                Some(outcome) = outcome_rx.recv() => {
                    running.remove(&outcome.job_id);
                    finalize(&store, outcome).await;
                }
                // §4.2 step 2: a deferred dispatch timer armed by a prior
                // call to `dispatch` while a cooldown was active. Firing it
                // just clears the deadline; the `dispatch` call below
                // re-checks and claims for real. `wait_for_cooldown` never
                // resolves while no deadline is armed, so this arm never
                // starves the others.
                _ = wait_for_cooldown(cooldown_deadline) => {
                    cooldown_deadline = None;
                }
            }

            dispatch(
                &queue,
                &node,
                limit,
                paused,
                &mut running,
                &mut last_dispatch_at,
                queue_config.dispatch_cooldown,
                &mut cooldown_deadline,
                &mut circuit,
                &store,
                &workers,
                outcome_tx.clone(),
            )
            .await;
        }
    });

    ProducerHandle { commands: cmd_tx }
}

/// Resolves when a deferred dispatch timer is due; never resolves while
/// none is armed, so it can sit as a permanent `select!` arm without
/// spinning (§5 "A producer may block only on its own message queue, a
/// single database transaction during claim, and task spawn").
async fn wait_for_cooldown(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

fn notification_targets_this_queue(notification: &crate::notify::Notification, queue: &str) -> bool {
    match notification.channel {
        Channel::Insert => notification
            .payload
            .as_array()
            .map(|entries| entries.iter().any(|e| e.get("queue").and_then(|q| q.as_str()) == Some(queue)))
            .unwrap_or(false),
        Channel::Signal => notification.payload.get("queue").and_then(|q| q.as_str()) == Some(queue)
            || notification.payload.get("action").and_then(|a| a.as_str()) == Some("pkill"),
        _ => false,
    }
}

enum Signal {
    Pause,
    Resume,
    Scale(usize),
    Pkill(i64),
}

fn decode_signal(notification: &crate::notify::Notification) -> Option<Signal> {
    if notification.channel != Channel::Signal {
        return None;
    }
    match notification.payload.get("action").and_then(|a| a.as_str())? {
        "pause" => Some(Signal::Pause),
        "resume" => Some(Signal::Resume),
        "scale" => notification
            .payload
            .get("limit")
            .and_then(|l| l.as_u64())
            .map(|l| Signal::Scale(l as usize)),
        "pkill" => notification
            .payload
            .get("job_id")
            .and_then(|id| id.as_i64())
            .map(Signal::Pkill),
        _ => None,
    }
}

async fn apply_signal(
    signal: Signal,
    _queue: &str,
    paused: &mut bool,
    limit: &mut usize,
    store: &Arc<dyn JobStore>,
    running: &mut HashMap<i64, RunningJob>,
) {
    match signal {
        Signal::Pause => *paused = true,
        Signal::Resume => *paused = false,
        Signal::Scale(new_limit) => *limit = new_limit,
        Signal::Pkill(job_id) => pkill(store, running, job_id).await,
    }
}

/// §4.2 signal handling, `pkill`: terminate the executor task and
/// transition the job to `cancelled` even if the task didn't finish
/// cleanly (§5 "Cancellation & timeouts").
async fn pkill(store: &Arc<dyn JobStore>, running: &mut HashMap<i64, RunningJob>, job_id: i64) {
    if let Some(job) = running.remove(&job_id) {
        job.task.abort();
        if let Err(err) = store
            .finalize(
                job_id,
                Transition::Cancel {
                    reason: "pkill".to_string(),
                },
            )
            .await
        {
            tracing::warn!(job_id, error = %err, "failed to record pkill cancellation");
        }
    }
}

async fn finalize(store: &Arc<dyn JobStore>, outcome: ExecutorOutcome) {
    if let Err(err) = store.finalize(outcome.job_id, outcome.transition).await {
        tracing::warn!(job_id = outcome.job_id, error = %err, "failed to finalize job transition");
    }
}

/// §4.2 "Dispatch algorithm".
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    queue: &str,
    node: &str,
    limit: usize,
    paused: bool,
    running: &mut HashMap<i64, RunningJob>,
    last_dispatch_at: &mut Option<Instant>,
    cooldown: Duration,
    cooldown_deadline: &mut Option<Instant>,
    circuit: &mut Circuit,
    store: &Arc<dyn JobStore>,
    workers: &Arc<WorkerRegistry>,
    outcome_tx: mpsc::Sender<ExecutorOutcome>,
) {
    if paused || running.len() >= limit {
        return;
    }
    if circuit.is_open() {
        return;
    }
    if let Some(last) = last_dispatch_at {
        let elapsed = last.elapsed();
        if elapsed < cooldown {
            // Arm a single deferred dispatch timer instead of blocking the
            // actor (§4.2 step 2); collapse duplicate arms onto the same
            // deadline, the run loop's `wait_for_cooldown` arm fires it.
            if cooldown_deadline.is_none() {
                *cooldown_deadline = Some(Instant::now() + (cooldown - elapsed));
            }
            return;
        }
    }

    let demand = limit - running.len();
    if demand == 0 {
        return;
    }

    *last_dispatch_at = Some(Instant::now());

    match store.claim(queue, demand, node).await {
        Ok(jobs) => {
            for job in jobs {
                let job_id = job.id;
                let workers = workers.clone();
                let outcome_tx = outcome_tx.clone();
                let task = tokio::spawn(async move {
                    let outcome = executor::run(job, &workers).await;
                    let _ = outcome_tx.send(outcome).await;
                });
                running.insert(job_id, RunningJob { task });
            }
        }
        Err(err) => {
            tracing::warn!(queue, error = %err, "dispatch claim failed, tripping circuit breaker");
            circuit.trip();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobOutcome, JobState, NewJob};
    use crate::notify::LocalNotifier;
    use crate::worker::Worker;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    struct FakeJobStore {
        next_id: AtomicI64,
        jobs: Mutex<HashMap<i64, Job>>,
    }

    impl FakeJobStore {
        fn new() -> Self {
            Self {
                next_id: AtomicI64::new(1),
                jobs: Mutex::new(HashMap::new()),
            }
        }

        fn seed(&self, new_job: NewJob) -> i64 {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let job = Job {
                id,
                state: JobState::Available,
                queue: new_job.queue,
                worker: new_job.worker,
                args: new_job.args,
                meta: new_job.meta,
                tags: new_job.tags,
                attempt: 0,
                max_attempts: new_job.max_attempts,
                priority: new_job.priority,
                errors: vec![],
                attempted_by: vec![],
                inserted_at: Utc::now(),
                scheduled_at: new_job.scheduled_at,
                attempted_at: None,
                completed_at: None,
                cancelled_at: None,
                discarded_at: None,
            };
            self.jobs.lock().unwrap().insert(id, job);
            id
        }
    }

    #[async_trait]
    impl JobStore for FakeJobStore {
        async fn insert(&self, new_job: NewJob) -> Result<Job, crate::error::CapstanError> {
            let id = self.seed(new_job);
            Ok(self.jobs.lock().unwrap().get(&id).unwrap().clone())
        }

        async fn claim(&self, queue: &str, demand: usize, node: &str) -> Result<Vec<Job>, crate::error::CapstanError> {
            let mut jobs = self.jobs.lock().unwrap();
            let mut claimed = Vec::new();
            let mut candidates: Vec<_> = jobs
                .values()
                .filter(|j| j.queue == queue && j.state == JobState::Available)
                .map(|j| j.id)
                .collect();
            candidates.sort();
            for id in candidates.into_iter().take(demand) {
                let job = jobs.get_mut(&id).unwrap();
                job.state = JobState::Executing;
                job.attempt += 1;
                job.attempted_at = Some(Utc::now());
                job.attempted_by = vec![node.to_string()];
                claimed.push(job.clone());
            }
            Ok(claimed)
        }

        async fn stage(&self, _limit: usize) -> Result<Vec<crate::store::StagedJob>, crate::error::CapstanError> {
            Ok(vec![])
        }

        async fn finalize(&self, id: i64, t: Transition) -> Result<Job, crate::error::CapstanError> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id).unwrap();
            match t {
                Transition::Complete => {
                    job.state = JobState::Completed;
                    job.completed_at = Some(Utc::now());
                }
                Transition::Retry { scheduled_at, error } => {
                    job.state = JobState::Retryable;
                    job.scheduled_at = scheduled_at;
                    job.errors.push(crate::job::ErrorEntry {
                        attempt: job.attempt,
                        at: Utc::now(),
                        error,
                    });
                }
                Transition::Discard { error } => {
                    job.state = JobState::Discarded;
                    job.discarded_at = Some(Utc::now());
                    job.errors.push(crate::job::ErrorEntry {
                        attempt: job.attempt,
                        at: Utc::now(),
                        error,
                    });
                }
                Transition::Cancel { reason: _ } => {
                    job.state = JobState::Cancelled;
                    job.cancelled_at = Some(Utc::now());
                }
                Transition::Snooze { scheduled_at } => {
                    job.state = JobState::Scheduled;
                    job.scheduled_at = scheduled_at;
                    job.max_attempts += 1;
                }
            }
            Ok(job.clone())
        }

        async fn cancel(&self, id: i64) -> Result<Job, crate::error::CapstanError> {
            self.finalize(id, Transition::Cancel { reason: "operator".into() }).await
        }

        async fn retry(&self, id: i64) -> Result<Job, crate::error::CapstanError> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id).unwrap();
            job.state = JobState::Available;
            Ok(job.clone())
        }

        async fn fetch_job(&self, id: i64) -> Result<Option<Job>, crate::error::CapstanError> {
            Ok(self.jobs.lock().unwrap().get(&id).cloned())
        }
    }

    struct SleepyWorker(Duration);
    #[async_trait]
    impl Worker for SleepyWorker {
        async fn perform(&self, _job: &Job) -> JobOutcome {
            tokio::time::sleep(self.0).await;
            JobOutcome::Complete
        }
    }

    fn registry(name: &str, worker: std::sync::Arc<dyn Worker>) -> WorkerRegistry {
        let mut r = WorkerRegistry::new();
        r.register(name, worker);
        r
    }

    #[tokio::test]
    async fn paused_producer_starts_nothing_until_resumed() {
        let store = Arc::new(FakeJobStore::new());
        store.seed(NewJob::new("alpha", "Sleepy", Value::Object(Default::default())));
        let notifier: Arc<dyn Notifier> = Arc::new(LocalNotifier::new());
        let workers = Arc::new(registry("Sleepy", Arc::new(SleepyWorker(Duration::from_millis(30)))));

        let handle = spawn(
            "inst".into(),
            "node-a".into(),
            QueueConfig::new("alpha", 1).paused(true),
            store.clone(),
            notifier,
            workers,
        );

        handle.try_dispatch().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.running_count().await, 0);

        handle.resume().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.running_count().await, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn pkill_cancels_a_running_job() {
        let store = Arc::new(FakeJobStore::new());
        let job_id = store.seed(NewJob::new("alpha", "Sleepy", Value::Object(Default::default())));
        let notifier: Arc<dyn Notifier> = Arc::new(LocalNotifier::new());
        let workers = Arc::new(registry("Sleepy", Arc::new(SleepyWorker(Duration::from_secs(5)))));

        let handle = spawn(
            "inst".into(),
            "node-a".into(),
            QueueConfig::new("alpha", 1),
            store.clone(),
            notifier,
            workers,
        );
        handle.try_dispatch().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.running_count().await, 1);

        handle.pkill(job_id).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.running_count().await, 0);

        let job = store.fetch_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn limit_one_serializes_two_jobs() {
        let store = Arc::new(FakeJobStore::new());
        let first = store.seed(NewJob::new("alpha", "Sleepy", Value::Object(Default::default())));
        let second = store.seed(NewJob::new("alpha", "Sleepy", Value::Object(Default::default())));
        let notifier: Arc<dyn Notifier> = Arc::new(LocalNotifier::new());
        let workers = Arc::new(registry("Sleepy", Arc::new(SleepyWorker(Duration::from_millis(50)))));

        let handle = spawn(
            "inst".into(),
            "node-a".into(),
            QueueConfig::new("alpha", 1),
            store.clone(),
            notifier,
            workers,
        );
        handle.try_dispatch().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.running_count().await, 1);

        let second_job = store.fetch_job(second).await.unwrap().unwrap();
        assert_eq!(second_job.state, JobState::Available);

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.try_dispatch().await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let first_job = store.fetch_job(first).await.unwrap().unwrap();
        let second_job = store.fetch_job(second).await.unwrap().unwrap();
        assert_eq!(first_job.state, JobState::Completed);
        assert_eq!(second_job.state, JobState::Completed);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn dispatch_cooldown_arms_a_timer_instead_of_blocking_the_actor() {
        let store = Arc::new(FakeJobStore::new());
        store.seed(NewJob::new("alpha", "Sleepy", Value::Object(Default::default())));
        let notifier: Arc<dyn Notifier> = Arc::new(LocalNotifier::new());
        let workers = Arc::new(registry("Sleepy", Arc::new(SleepyWorker(Duration::from_millis(10)))));

        let handle = spawn(
            "inst".into(),
            "node-a".into(),
            QueueConfig::new("alpha", 5).with_dispatch_cooldown(Duration::from_secs(5)),
            store.clone(),
            notifier,
            workers,
        );

        // First dispatch claims the seeded job and starts the cooldown window.
        handle.try_dispatch().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // This lands inside the 5s cooldown; with the old inline-sleep
        // behavior it would block the actor for the rest of the window, so
        // the pause below would never be observed within the timeout.
        handle.try_dispatch().await;
        let observed = tokio::time::timeout(Duration::from_millis(200), async {
            handle.pause().await;
            loop {
                if let Some(snapshot) = handle.check_queue().await {
                    if snapshot.paused {
                        return;
                    }
                }
            }
        })
        .await;
        assert!(observed.is_ok(), "pause should apply promptly, not after the cooldown elapses");
        handle.shutdown().await;
    }
}
