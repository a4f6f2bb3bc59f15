use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone};
use tasknode_core::types::JobId;
use tasknode_cron::{calendar, CronExpr};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    heap::TimerHeap,
    types::Dispatch,
};

/// Live descriptor of an armed job.
#[derive(Debug)]
struct Armed {
    expr: CronExpr,
    generation: u64,
    /// Parent of every dispatch token handed out for this arm.
    token: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
enum ArmSource<'a> {
    Expr(&'a str),
    /// Re-arm only while the descriptor still carries this generation.
    Rearm(u64),
}

#[derive(Debug, Default)]
struct Inner {
    heap: TimerHeap<JobId>,
    jobs: HashMap<JobId, Armed>,
    generation: u64,
}

/// Owns the timer heap and the descriptor table behind one lock.
///
/// Process execution never happens under the lock; the poller only moves
/// due entries into the dispatch queue.
pub struct Scheduler {
    inner: RwLock<Inner>,
    dispatch_tx: mpsc::Sender<Dispatch>,
    poll_interval: Duration,
}

impl Scheduler {
    /// Create a scheduler and the receiving end of its dispatch queue.
    pub fn new(poll_interval: Duration, capacity: usize) -> (Self, mpsc::Receiver<Dispatch>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(capacity.max(1));
        let scheduler = Self {
            inner: RwLock::new(Inner::default()),
            dispatch_tx,
            poll_interval,
        };
        (scheduler, dispatch_rx)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm `job_id` for its next fire time from now.
    pub fn arm(&self, job_id: JobId, expr: &str) -> Result<DateTime<FixedOffset>> {
        self.arm_with(job_id, expr, calendar::now(), |_| Ok::<(), String>(()))
    }

    /// Arm relative to an explicit reference time.
    pub fn arm_at<Tz: TimeZone>(
        &self,
        job_id: JobId,
        expr: &str,
        from: DateTime<Tz>,
    ) -> Result<DateTime<FixedOffset>> {
        self.arm_with(job_id, expr, from, |_| Ok::<(), String>(()))
    }

    /// Arm `job_id` and run `persist` with the computed fire time while the
    /// lock is still held, so the stored status never disagrees with the
    /// heap. A failing `persist` rolls the heap back to its prior state.
    ///
    /// Arming an already-armed job moves its single entry and bumps its
    /// generation; the arm token (and so any in-flight run) is kept.
    pub fn arm_with<Tz, F, E>(
        &self,
        job_id: JobId,
        expr: &str,
        from: DateTime<Tz>,
        persist: F,
    ) -> Result<DateTime<FixedOffset>>
    where
        Tz: TimeZone,
        F: FnOnce(DateTime<FixedOffset>) -> std::result::Result<(), E>,
        E: Display,
    {
        self.arm_inner(job_id, ArmSource::Expr(expr), from, persist)
    }

    /// Re-arm after a dispatched run finished.
    ///
    /// The next fire time is computed from whichever is later, now or one
    /// second past the dispatched fire time, so a run that finishes inside
    /// its own fire second is not dispatched twice.
    pub fn rearm(&self, dispatch: &Dispatch) -> Result<DateTime<FixedOffset>> {
        self.rearm_with(dispatch, |_| Ok::<(), String>(()))
    }

    /// [`Scheduler::rearm`] with a persistence hook run under the lock.
    pub fn rearm_with<F, E>(&self, dispatch: &Dispatch, persist: F) -> Result<DateTime<FixedOffset>>
    where
        F: FnOnce(DateTime<FixedOffset>) -> std::result::Result<(), E>,
        E: Display,
    {
        let floor = dispatch.fire_at + chrono::Duration::seconds(1);
        let now = calendar::now();
        let from = if now > floor { now } else { floor };
        self.arm_inner(
            dispatch.job_id,
            ArmSource::Rearm(dispatch.generation),
            from,
            persist,
        )
    }

    fn arm_inner<Tz, F, E>(
        &self,
        job_id: JobId,
        source: ArmSource<'_>,
        from: DateTime<Tz>,
        persist: F,
    ) -> Result<DateTime<FixedOffset>>
    where
        Tz: TimeZone,
        F: FnOnce(DateTime<FixedOffset>) -> std::result::Result<(), E>,
        E: Display,
    {
        let mut inner = self.write();

        let cron = match (source, inner.jobs.get(&job_id)) {
            (ArmSource::Expr(expr), Some(armed)) if armed.expr.as_str() == expr => {
                armed.expr.clone()
            }
            (ArmSource::Expr(expr), _) => CronExpr::new(expr),
            (ArmSource::Rearm(generation), Some(armed)) if armed.generation == generation => {
                armed.expr.clone()
            }
            (ArmSource::Rearm(_), Some(_)) => return Err(SchedulerError::Superseded { id: job_id }),
            (ArmSource::Rearm(_), None) => return Err(SchedulerError::NotArmed { id: job_id }),
        };
        let next = cron.next_exec_time(from)?;

        inner.generation += 1;
        let generation = inner.generation;
        let previous = inner.jobs.remove(&job_id);
        let token = previous
            .as_ref()
            .map(|armed| armed.token.clone())
            .unwrap_or_default();
        let previous_priority = inner.heap.upsert(job_id, next.timestamp());
        inner.jobs.insert(
            job_id,
            Armed {
                expr: cron,
                generation,
                token,
            },
        );

        if let Err(e) = persist(next) {
            match previous {
                Some(armed) => {
                    inner.jobs.insert(job_id, armed);
                }
                None => {
                    inner.jobs.remove(&job_id);
                }
            }
            match previous_priority {
                Some(p) => {
                    inner.heap.upsert(job_id, p);
                }
                None => {
                    inner.heap.remove(&job_id);
                }
            }
            return Err(SchedulerError::Persist(e.to_string()));
        }

        debug!(%job_id, next = %next, generation, "job armed");
        Ok(next)
    }

    /// Remove `job_id`'s entry and cancel its in-flight token.
    ///
    /// Returns `true` when the job was armed.
    pub fn disarm(&self, job_id: JobId) -> bool {
        let armed = {
            let mut inner = self.write();
            inner.heap.remove(&job_id);
            inner.jobs.remove(&job_id)
        };
        match armed {
            Some(armed) => {
                armed.token.cancel();
                debug!(%job_id, "job disarmed");
                true
            }
            None => false,
        }
    }

    /// [`Scheduler::disarm`] with a persistence hook run under the lock.
    ///
    /// A failing `persist` restores the entry and leaves the token live.
    pub fn disarm_with<F, E>(&self, job_id: JobId, persist: F) -> Result<bool>
    where
        F: FnOnce() -> std::result::Result<(), E>,
        E: Display,
    {
        let armed = {
            let mut inner = self.write();
            let priority = inner.heap.remove(&job_id);
            let armed = inner.jobs.remove(&job_id);
            if let Err(e) = persist() {
                if let Some(armed) = armed {
                    inner.jobs.insert(job_id, armed);
                }
                if let Some(p) = priority {
                    inner.heap.upsert(job_id, p);
                }
                return Err(SchedulerError::Persist(e.to_string()));
            }
            armed
        };
        match armed {
            Some(armed) => {
                armed.token.cancel();
                debug!(%job_id, "job disarmed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Disarm every job, returning how many were armed.
    pub fn disarm_all(&self) -> usize {
        let drained: Vec<Armed> = {
            let mut inner = self.write();
            inner.heap.clear();
            inner.jobs.drain().map(|(_, armed)| armed).collect()
        };
        for armed in &drained {
            armed.token.cancel();
        }
        drained.len()
    }

    pub fn is_armed(&self, job_id: JobId) -> bool {
        self.read().jobs.contains_key(&job_id)
    }

    /// Pending fire time, `None` while the job is disarmed or executing.
    pub fn next_fire(&self, job_id: JobId) -> Option<i64> {
        self.read().heap.priority_of(&job_id)
    }

    pub fn armed_count(&self) -> usize {
        self.read().jobs.len()
    }

    /// Number of live heap entries.
    pub fn pending_count(&self) -> usize {
        self.read().heap.len()
    }

    /// Pop every entry due at `now` and build its dispatch.
    fn collect_due(&self, now: i64) -> Vec<Dispatch> {
        let zone = calendar::zone();
        let mut inner = self.write();
        let mut due = Vec::new();
        while let Some((job_id, priority)) = inner.heap.pop_due(now) {
            let Some(armed) = inner.jobs.get(&job_id) else {
                continue;
            };
            let Some(fire_at) = zone.timestamp_opt(priority, 0).single() else {
                continue;
            };
            due.push(Dispatch {
                job_id,
                fire_at,
                generation: armed.generation,
                token: armed.token.child_token(),
            });
        }
        due
    }

    /// Move due entries into the dispatch queue.
    ///
    /// Sending waits for queue space rather than dropping, since a dropped
    /// dispatch would leave the job disarmed forever.
    pub async fn tick(&self) -> usize {
        let due = self.collect_due(calendar::unix_now());
        let count = due.len();
        for dispatch in due {
            let job_id = dispatch.job_id;
            if self.dispatch_tx.send(dispatch).await.is_err() {
                warn!(%job_id, "dispatch queue closed; dropping due job");
            }
        }
        count
    }

    /// Poll loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.poll_interval.as_millis() as u64, "scheduler started");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let n = self.tick().await;
                    if n > 0 {
                        debug!(count = n, "jobs dispatched");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
