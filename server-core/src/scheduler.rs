//! The update scheduler: named periodic tasks with per-task stats and
//! overlap prevention. A firing that lands while the previous run is still in
//! progress is skipped, never queued; task failures are recorded and never
//! propagate to peers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Run counters of one task.
#[derive(Debug, Clone, Default)]
pub struct TaskStats {
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub runs: u64,
    pub errors: u64,
    pub skipped: u64,
    pub is_running: bool,
}

struct ScheduledTask {
    name: String,
    interval: Duration,
    execute: TaskFn,
    enabled: bool,
    stats: Arc<Mutex<TaskStats>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// The scheduler. Tasks are registered once, then started together.
pub struct UpdateScheduler {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a task. `execute` is called on every firing; an `Err` is
    /// recorded in the stats and otherwise ignored.
    pub fn register<F>(&self, name: &str, interval: Duration, enabled: bool, execute: F)
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        tasks.insert(
            name.to_owned(),
            ScheduledTask {
                name: name.to_owned(),
                interval,
                execute: Arc::new(execute),
                enabled,
                stats: Arc::new(Mutex::new(TaskStats::default())),
                running: Arc::new(AtomicBool::new(false)),
                handle: None,
            },
        );
    }

    /// Starts every enabled task: one immediate run, then the fixed interval.
    pub fn start_all(&self) {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        for task in tasks.values_mut() {
            if !task.enabled || task.handle.is_some() {
                continue;
            }
            let name = task.name.clone();
            let interval = task.interval;
            let execute = task.execute.clone();
            let stats = task.stats.clone();
            let running = task.running.clone();
            task.handle = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    // First tick fires immediately.
                    ticker.tick().await;
                    fire(&name, &execute, &stats, &running);
                }
            }));
        }
    }

    /// Stops every task loop. Runs already in flight finish on their own.
    pub fn stop_all(&self) {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        for task in tasks.values_mut() {
            if let Some(handle) = task.handle.take() {
                handle.abort();
            }
        }
    }

    /// Fires a task outside its schedule, honoring the overlap rule. Returns
    /// whether the run was started.
    pub fn run_now(&self, name: &str) -> bool {
        let (execute, stats, running) = {
            let tasks = self.tasks.lock().expect("scheduler lock poisoned");
            let Some(task) = tasks.get(name) else {
                return false;
            };
            (task.execute.clone(), task.stats.clone(), task.running.clone())
        };
        fire_checked(name, &execute, &stats, &running)
    }

    pub fn stats(&self, name: &str) -> Option<TaskStats> {
        let tasks = self.tasks.lock().expect("scheduler lock poisoned");
        tasks
            .get(name)
            .map(|task| task.stats.lock().expect("task stats lock poisoned").clone())
    }

    pub fn task_names(&self) -> Vec<String> {
        let tasks = self.tasks.lock().expect("scheduler lock poisoned");
        let mut names: Vec<String> = tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn fire(name: &str, execute: &TaskFn, stats: &Arc<Mutex<TaskStats>>, running: &Arc<AtomicBool>) {
    fire_checked(name, execute, stats, running);
}

/// Starts one run unless the previous one is still going. The run itself is
/// its own task so a slow poll never stalls the firing loop.
fn fire_checked(
    name: &str,
    execute: &TaskFn,
    stats: &Arc<Mutex<TaskStats>>,
    running: &Arc<AtomicBool>,
) -> bool {
    if running.swap(true, Ordering::SeqCst) {
        let mut stats = stats.lock().expect("task stats lock poisoned");
        stats.skipped += 1;
        tracing::debug!(task = name, "Skipping overlapping task firing.");
        return false;
    }
    {
        let mut stats = stats.lock().expect("task stats lock poisoned");
        stats.is_running = true;
    }
    let future = execute();
    let name = name.to_owned();
    let stats = stats.clone();
    let running = running.clone();
    tokio::spawn(async move {
        let result = future.await;
        let mut guard = stats.lock().expect("task stats lock poisoned");
        guard.last_run = Some(Utc::now());
        guard.runs += 1;
        guard.is_running = false;
        match result {
            Ok(()) => guard.last_error = None,
            Err(message) => {
                guard.errors += 1;
                tracing::warn!(task = name.as_str(), error = message.as_str(), "Task failed.");
                guard.last_error = Some(message);
            }
        }
        drop(guard);
        running.store(false, Ordering::SeqCst);
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(
        counter: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    ) -> impl Fn() -> TaskFuture {
        move || -> TaskFuture {
            let counter = counter.clone();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                counter.fetch_add(1, Ordering::SeqCst);
                if fail { Err("boom".to_owned()) } else { Ok(()) }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_and_on_interval() {
        let scheduler = UpdateScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.register(
            "poll",
            Duration::from_secs(30),
            true,
            counting_task(count.clone(), Duration::from_millis(1), false),
        );
        scheduler.start_all();
        tokio::time::sleep(Duration::from_secs(61)).await;
        scheduler.stop_all();
        // Immediate run plus two interval firings.
        assert_eq!(count.load(Ordering::SeqCst), 3);
        let stats = scheduler.stats("poll").unwrap();
        assert_eq!(stats.runs, 3);
        assert_eq!(stats.errors, 0);
        assert!(!stats.is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn long_runs_skip_the_overlapping_firing() {
        let scheduler = UpdateScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        // A 45 s run against a 30 s interval: the t=30 s firing is skipped,
        // the t=60 s one proceeds.
        scheduler.register(
            "slow",
            Duration::from_secs(30),
            true,
            counting_task(count.clone(), Duration::from_secs(45), false),
        );
        scheduler.start_all();
        tokio::time::sleep(Duration::from_secs(70)).await;
        scheduler.stop_all();
        let stats = scheduler.stats("slow").unwrap();
        assert_eq!(stats.skipped, 1, "exactly the t=30s firing is skipped");
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_recorded_and_contained() {
        let scheduler = UpdateScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.register(
            "flaky",
            Duration::from_secs(30),
            true,
            counting_task(count.clone(), Duration::from_millis(1), true),
        );
        let healthy = Arc::new(AtomicUsize::new(0));
        scheduler.register(
            "healthy",
            Duration::from_secs(30),
            true,
            counting_task(healthy.clone(), Duration::from_millis(1), false),
        );
        scheduler.start_all();
        tokio::time::sleep(Duration::from_secs(31)).await;
        scheduler.stop_all();
        let stats = scheduler.stats("flaky").unwrap();
        assert_eq!(stats.errors, stats.runs);
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
        // The failing peer never affects the healthy one.
        assert_eq!(healthy.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_now_obeys_the_overlap_rule() {
        let scheduler = UpdateScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.register(
            "manual",
            Duration::from_secs(3_600),
            false,
            counting_task(count.clone(), Duration::from_secs(5), false),
        );
        // Disabled tasks never start loops but can be fired by hand.
        scheduler.start_all();
        assert!(scheduler.run_now("manual"));
        assert!(!scheduler.run_now("manual"), "second fire overlaps");
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(scheduler.run_now("manual"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.stats("manual").unwrap().skipped, 1);
        assert!(!scheduler.run_now("missing"));
    }
}
