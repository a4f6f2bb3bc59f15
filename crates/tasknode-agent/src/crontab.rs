//! Timed-job supervision: turns dispatches and manual requests into process
//! runs, applies timeout/error triggers and writes every run back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use tasknode_core::types::{JobId, RunId};
use tasknode_cron::calendar;
use tasknode_exec::{truncate_output, CommandSpec, Exit, Finished};
use tasknode_scheduler::{Dispatch, SchedulerError};
use tasknode_store::{Crontab, CrontabLog, CrontabStatus, ExecStatus, RunRecord, TriggerAction};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AgentContext;
use crate::error::Result;
use crate::notify::{self, Alert, AlertCause, JobKind};

/// How one execution ended, before it is written back.
#[derive(Debug, Clone)]
struct Outcome {
    status: ExecStatus,
    message: String,
    output: String,
    start_time: i64,
    end_time: i64,
    cost: Duration,
    /// Ended by `kill`/`stop` rather than by the process itself.
    cancelled: bool,
}

impl Outcome {
    fn aborted(start_time: i64, message: &str) -> Self {
        Self {
            status: ExecStatus::Error,
            message: message.to_string(),
            output: String::new(),
            start_time,
            end_time: calendar::unix_now(),
            cost: Duration::ZERO,
            cancelled: false,
        }
    }

    fn record(&self, status: CrontabStatus) -> RunRecord {
        RunRecord {
            status,
            exec_time: self.start_time,
            exec_status: self.status,
            message: self.message.clone(),
            cost_time: round_cost(self.cost),
        }
    }
}

/// Seconds, rounded to four decimals.
fn round_cost(cost: Duration) -> f64 {
    (cost.as_secs_f64() * 10_000.0).round() / 10_000.0
}

pub struct CrontabSupervisor {
    ctx: Arc<AgentContext>,
    /// In-flight runs per job, scheduled and manual alike.
    runs: DashMap<JobId, HashMap<RunId, CancellationToken>>,
}

impl CrontabSupervisor {
    pub fn new(ctx: Arc<AgentContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            runs: DashMap::new(),
        })
    }

    /// Re-arm every job left `Timing` or `Running` by a previous process.
    ///
    /// Rows that can no longer be armed are logged and skipped.
    pub fn recover(&self) -> usize {
        let jobs = match self
            .ctx
            .store
            .crontabs_in_status(&[CrontabStatus::Timing, CrontabStatus::Running])
        {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "could not load timed jobs for recovery");
                return 0;
            }
        };

        let mut armed = 0;
        for job in &jobs {
            match self.start(job) {
                Ok(_) => armed += 1,
                Err(e) => warn!(job_id = job.id, error = %e, "timed job not recovered"),
            }
        }
        info!(armed, total = jobs.len(), "timed jobs recovered");
        armed
    }

    /// Arm `job` and mark it `Timing`. Returns the next fire time.
    pub fn start(&self, job: &Crontab) -> Result<i64> {
        let store = &self.ctx.store;
        let next = self.ctx.scheduler.arm_with(
            JobId(job.id),
            &job.time_expr,
            calendar::now(),
            |next| store.schedule_crontab(job.id, next.timestamp()),
        )?;
        info!(job_id = job.id, next = %next, "timed job scheduled");
        Ok(next.timestamp())
    }

    /// Disarm, mark `Stopped` and kill whatever is running.
    pub fn stop(&self, id: i64) -> Result<()> {
        let store = &self.ctx.store;
        self.ctx
            .scheduler
            .disarm_with(JobId(id), || store.stop_crontab(id))?;
        let killed = self.kill(id);
        info!(job_id = id, killed, "timed job stopped");
        Ok(())
    }

    /// Disarm and kill without touching the row, ahead of an edit or delete.
    pub fn release(&self, id: i64) -> usize {
        self.ctx.scheduler.disarm(JobId(id));
        self.kill(id)
    }

    /// [`release`](Self::release), then wait up to `limit` for the killed
    /// runs to finish writing back. Returns `false` on timeout.
    pub async fn release_and_wait(&self, id: i64, limit: Duration) -> bool {
        self.release(id);
        let deadline = tokio::time::Instant::now() + limit;
        while self.running(id) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(job_id = id, pending = self.running(id), "killed runs still finishing");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Cancel every in-flight run of `id`. The schedule is left alone.
    pub fn kill(&self, id: i64) -> usize {
        let Some(runs) = self.runs.get(&JobId(id)) else {
            return 0;
        };
        for token in runs.values() {
            token.cancel();
        }
        runs.len()
    }

    /// Shutdown path: disarm everything and cancel every run.
    ///
    /// Rows keep their status so the next start recovers them.
    pub fn kill_all(&self) -> usize {
        let disarmed = self.ctx.scheduler.disarm_all();
        let mut killed = 0;
        for runs in self.runs.iter() {
            for token in runs.values() {
                token.cancel();
                killed += 1;
            }
        }
        info!(disarmed, killed, "timed jobs halted");
        killed
    }

    /// Wait up to `limit` for every in-flight run to finish writing back.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while !self.runs.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(pending = self.runs.len(), "timed runs still finishing");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Number of in-flight runs of `id`.
    pub fn running(&self, id: i64) -> usize {
        self.runs.get(&JobId(id)).map_or(0, |runs| runs.len())
    }

    /// Start a one-off run of `id` outside its schedule.
    pub fn exec(self: &Arc<Self>, id: i64, user_id: i64) -> Result<RunId> {
        let job = self.ctx.store.get_crontab(id)?;
        let run_id = RunId::new();
        let token = CancellationToken::new();
        self.track(JobId(id), run_id.clone(), token.clone());

        let this = Arc::clone(self);
        let run = run_id.clone();
        tokio::spawn(async move { this.run_manual(job, run, token, user_id).await });
        info!(job_id = id, run_id = %run_id, "manual run started");
        Ok(run_id)
    }

    /// Dispatch consumer: one task per due job until shutdown.
    pub async fn consume(
        self: Arc<Self>,
        mut dispatches: mpsc::Receiver<Dispatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                dispatch = dispatches.recv() => {
                    let Some(dispatch) = dispatch else { break };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.run_scheduled(dispatch).await });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("dispatch consumer stopped");
    }

    fn track(&self, id: JobId, run_id: RunId, token: CancellationToken) {
        self.runs.entry(id).or_default().insert(run_id, token);
    }

    fn untrack(&self, id: JobId, run_id: &RunId) {
        if let Entry::Occupied(mut runs) = self.runs.entry(id) {
            runs.get_mut().remove(run_id);
            if runs.get().is_empty() {
                runs.remove();
            }
        }
    }

    async fn run_scheduled(self: Arc<Self>, dispatch: Dispatch) {
        let id = dispatch.job_id;
        let job = match self.ctx.store.find_crontab(id.get()) {
            Ok(Some(job)) if job.status.is_scheduled() => job,
            Ok(Some(job)) => {
                debug!(job_id = %id, status = %job.status, "job no longer scheduled; dispatch discarded");
                self.ctx.scheduler.disarm(id);
                return;
            }
            Ok(None) => {
                warn!(job_id = %id, "job row missing; disarmed");
                self.ctx.scheduler.disarm(id);
                return;
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "job load failed; skipping this fire");
                if let Err(e) = self.ctx.scheduler.rearm(&dispatch) {
                    debug!(job_id = %id, error = %e, "re-arm after load failure skipped");
                }
                return;
            }
        };

        match self.ctx.store.mark_crontab_running(job.id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %id, "job stopped before launch; dispatch discarded");
                return;
            }
            Err(e) => warn!(job_id = %id, error = %e, "could not mark job running"),
        }

        let run_id = RunId::new();
        self.track(id, run_id.clone(), dispatch.token.clone());
        let outcome = self.execute_guarded(&job, dispatch.token.clone()).await;
        let stopped = self.fire_triggers(&job, &outcome).await;
        self.append_log(&job, &outcome, false, 0);
        self.finish_scheduled(&job, &outcome, &dispatch, stopped);
        self.untrack(id, &run_id);
    }

    /// Write the run back and re-arm, unless a trigger stopped the job.
    fn finish_scheduled(&self, job: &Crontab, outcome: &Outcome, dispatch: &Dispatch, stopped: bool) {
        let id = dispatch.job_id;
        let record = outcome.record(CrontabStatus::Timing);
        if stopped {
            self.write_run(job.id, &record);
            return;
        }

        let store = &self.ctx.store;
        let mut written = false;
        let rearmed = self.ctx.scheduler.rearm_with(dispatch, |next| {
            store.finish_crontab_run(job.id, &record)?;
            written = true;
            store.set_next_exec_time(job.id, next.timestamp())
        });
        if !written {
            self.write_run(job.id, &record);
        }
        match rearmed {
            Ok(next) => debug!(job_id = %id, next = %next, "job re-armed"),
            Err(SchedulerError::Superseded { .. }) | Err(SchedulerError::NotArmed { .. }) => {
                debug!(job_id = %id, "job stopped or re-armed during the run");
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "re-arm failed; stopping job");
                if let Err(e) = self.stop(job.id) {
                    warn!(job_id = %id, error = %e, "could not stop job");
                }
            }
        }
    }

    async fn run_manual(
        self: Arc<Self>,
        job: Crontab,
        run_id: RunId,
        token: CancellationToken,
        user_id: i64,
    ) {
        let outcome = self.execute_guarded(&job, token).await;
        self.fire_triggers(&job, &outcome).await;
        // Manual runs never move the status; `Running` here is a no-op restore.
        self.write_run(job.id, &outcome.record(CrontabStatus::Running));
        self.append_log(&job, &outcome, true, user_id);
        self.untrack(JobId(job.id), &run_id);
        debug!(job_id = job.id, run_id = %run_id, status = %outcome.status, "manual run finished");
    }

    /// Run the job on its own task so a panic becomes an `Error` outcome.
    async fn execute_guarded(&self, job: &Crontab, token: CancellationToken) -> Outcome {
        let start_time = calendar::unix_now();
        match tokio::spawn(execute(job.clone(), token)).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                warn!(job_id = job.id, "execution panicked");
                Outcome::aborted(start_time, "execution panicked")
            }
            Err(_) => Outcome::aborted(start_time, "execution aborted"),
        }
    }

    /// Apply the trigger list matching the outcome, each distinct action
    /// once. Returns `true` when a `ForceKill` stopped the job.
    async fn fire_triggers(&self, job: &Crontab, outcome: &Outcome) -> bool {
        let (actions, cause) = match outcome.status {
            ExecStatus::Timeout => (
                &job.timeout_trigger,
                AlertCause::Timeout { secs: job.timeout },
            ),
            ExecStatus::Error if !outcome.cancelled => (
                &job.error_trigger,
                AlertCause::Failed {
                    reason: outcome.message.clone(),
                },
            ),
            _ => return false,
        };

        let mut seen = HashSet::new();
        let mut stopped = false;
        for action in actions {
            if !seen.insert(action) {
                continue;
            }
            match action {
                TriggerAction::ForceKill => match self.stop(job.id) {
                    Ok(()) => stopped = true,
                    Err(e) => warn!(job_id = job.id, error = %e, "force-kill trigger failed"),
                },
                TriggerAction::NotifyExternal => {
                    let alert = Alert {
                        node_addr: self.ctx.config.node.address.clone(),
                        kind: JobKind::Timed,
                        job_id: job.id,
                        job_name: job.name.clone(),
                        cause: cause.clone(),
                        at: outcome.end_time,
                    };
                    notify::send_logged(&self.ctx, &job.notify_addrs, &alert).await;
                }
                TriggerAction::Unknown(name) => {
                    debug!(job_id = job.id, action = %name, "unknown trigger action ignored");
                }
            }
        }
        stopped
    }

    fn write_run(&self, id: i64, record: &RunRecord) {
        if let Err(e) = self.ctx.store.finish_crontab_run(id, record) {
            warn!(job_id = id, error = %e, "could not record run result");
        }
    }

    fn append_log(&self, job: &Crontab, outcome: &Outcome, once: bool, exec_user_id: i64) {
        let result = if outcome.output.is_empty() && outcome.status != ExecStatus::Success {
            outcome.message.as_str()
        } else {
            outcome.output.as_str()
        };
        let log = CrontabLog {
            id: 0,
            crontab_id: job.id,
            status: outcome.status,
            once,
            start_time: outcome.start_time,
            end_time: outcome.end_time,
            cost_time: round_cost(outcome.cost),
            result: truncate_output(result, self.ctx.config.exec.max_output_chars),
            exec_user_id,
            create_time: calendar::unix_now(),
        };
        if let Err(e) = self.ctx.store.insert_crontab_log(&log) {
            warn!(job_id = job.id, error = %e, "could not append run log");
        }
    }
}

async fn execute(job: Crontab, token: CancellationToken) -> Outcome {
    let spec = CommandSpec::new(&job.command)
        .dir(&job.dir)
        .env(job.env.clone())
        .user(&job.user);
    let timeout = u64::try_from(job.timeout)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let start_time = calendar::unix_now();
    let mut output = String::new();
    let result = tasknode_exec::run(&spec, timeout, &token, |line| {
        output.push_str(line);
        output.push('\n');
    })
    .await;

    let (status, message, cost, cancelled) = match result {
        Ok(Finished {
            exit: Exit::Success,
            elapsed,
        }) => (ExecStatus::Success, "success".to_string(), elapsed, false),
        Ok(Finished {
            exit: Exit::Failed(reason),
            elapsed,
        }) => (ExecStatus::Error, reason, elapsed, false),
        Ok(Finished {
            exit: Exit::TimedOut,
            elapsed,
        }) => (
            ExecStatus::Timeout,
            format!("timed out after {}s", job.timeout),
            elapsed,
            false,
        ),
        Ok(Finished {
            exit: Exit::Cancelled,
            elapsed,
        }) => (ExecStatus::Error, "killed".to_string(), elapsed, true),
        Err(e) => (ExecStatus::Error, e.to_string(), Duration::ZERO, false),
    };

    Outcome {
        status,
        message,
        output,
        start_time,
        end_time: calendar::unix_now(),
        cost,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tasknode_core::TaskNodeConfig;
    use tasknode_rpc::ClientPool;
    use tasknode_scheduler::Scheduler;
    use tasknode_store::{CrontabDraft, LogFilter, Store};

    fn supervisor() -> (Arc<CrontabSupervisor>, mpsc::Receiver<Dispatch>) {
        let mut config = TaskNodeConfig::default();
        config.rpc.manage_addr = String::new();
        let store = Store::open_in_memory().unwrap();
        let (scheduler, rx) = Scheduler::new(Duration::from_millis(20), 16);
        let ctx = AgentContext::new(config, store, Arc::new(scheduler), ClientPool::default());
        (CrontabSupervisor::new(Arc::new(ctx)), rx)
    }

    fn add(sup: &CrontabSupervisor, draft: CrontabDraft) -> Crontab {
        let job = sup.ctx.store.add_crontab(&draft, 1).unwrap();
        sup.ctx.store.audit_crontabs(&[job.id], 1).unwrap();
        sup.ctx.store.get_crontab(job.id).unwrap()
    }

    fn draft(command: &str) -> CrontabDraft {
        CrontabDraft {
            name: "job".into(),
            command: command.into(),
            time_expr: "* * * * * *".into(),
            ..Default::default()
        }
    }

    /// Arm `job` for a fire time in the past and pull its dispatch.
    async fn due(
        sup: &CrontabSupervisor,
        rx: &mut mpsc::Receiver<Dispatch>,
        job: &Crontab,
    ) -> Dispatch {
        let past = calendar::zone()
            .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
            .unwrap();
        let store = &sup.ctx.store;
        sup.ctx
            .scheduler
            .arm_with(JobId(job.id), &job.time_expr, past, |next| {
                store.schedule_crontab(job.id, next.timestamp())
            })
            .unwrap();
        sup.ctx.scheduler.tick().await;
        rx.try_recv().unwrap()
    }

    fn logs(sup: &CrontabSupervisor, id: i64) -> Vec<CrontabLog> {
        sup.ctx
            .store
            .list_crontab_logs(&LogFilter {
                crontab_id: id,
                ..Default::default()
            })
            .unwrap()
            .items
    }

    async fn wait_for_logs(sup: &CrontabSupervisor, id: i64, n: usize) -> Vec<CrontabLog> {
        for _ in 0..100 {
            let logs = logs(sup, id);
            if logs.len() >= n {
                return logs;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("run log for job {id} never reached {n} rows");
    }

    #[tokio::test]
    async fn scheduled_success_is_logged_and_rearmed() {
        let (sup, mut rx) = supervisor();
        let job = add(&sup, draft("echo hello; echo oops >&2"));
        let dispatch = due(&sup, &mut rx, &job).await;

        Arc::clone(&sup).run_scheduled(dispatch).await;

        let row = sup.ctx.store.get_crontab(job.id).unwrap();
        assert_eq!(row.status, CrontabStatus::Timing);
        assert_eq!(row.last_exec_status, Some(ExecStatus::Success));
        assert!(row.next_exec_time > 0);
        assert_eq!(sup.ctx.scheduler.next_fire(JobId(job.id)), Some(row.next_exec_time));

        let logs = logs(&sup, job.id);
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].once);
        assert!(logs[0].result.contains("hello"));
        assert!(logs[0].result.contains("oops"));
        assert_eq!(sup.running(job.id), 0);
    }

    #[tokio::test]
    async fn timeout_with_force_kill_stops_job() {
        let (sup, mut rx) = supervisor();
        let job = add(
            &sup,
            CrontabDraft {
                timeout: 1,
                timeout_trigger: vec![TriggerAction::ForceKill, TriggerAction::ForceKill],
                ..draft("sleep 10")
            },
        );
        let dispatch = due(&sup, &mut rx, &job).await;

        Arc::clone(&sup).run_scheduled(dispatch).await;

        let row = sup.ctx.store.get_crontab(job.id).unwrap();
        assert_eq!(row.status, CrontabStatus::Stopped);
        assert_eq!(row.next_exec_time, 0);
        assert_eq!(row.last_exec_status, Some(ExecStatus::Timeout));
        assert!(!sup.ctx.scheduler.is_armed(JobId(job.id)));
        assert_eq!(logs(&sup, job.id)[0].status, ExecStatus::Timeout);
    }

    #[tokio::test]
    async fn timeout_without_force_kill_rearms() {
        let (sup, mut rx) = supervisor();
        let job = add(
            &sup,
            CrontabDraft {
                timeout: 1,
                timeout_trigger: vec![TriggerAction::Unknown("Page".into())],
                ..draft("sleep 10")
            },
        );
        let dispatch = due(&sup, &mut rx, &job).await;

        Arc::clone(&sup).run_scheduled(dispatch).await;

        let row = sup.ctx.store.get_crontab(job.id).unwrap();
        assert_eq!(row.status, CrontabStatus::Timing);
        assert_eq!(row.last_exec_status, Some(ExecStatus::Timeout));
        assert!(sup.ctx.scheduler.is_armed(JobId(job.id)));
    }

    #[tokio::test]
    async fn failing_command_records_error() {
        let (sup, mut rx) = supervisor();
        let job = add(&sup, draft("exit 3"));
        let dispatch = due(&sup, &mut rx, &job).await;

        Arc::clone(&sup).run_scheduled(dispatch).await;

        let row = sup.ctx.store.get_crontab(job.id).unwrap();
        assert_eq!(row.last_exec_status, Some(ExecStatus::Error));
        assert!(row.last_exec_msg.contains('3'), "{}", row.last_exec_msg);
        assert_eq!(row.status, CrontabStatus::Timing);
    }

    #[tokio::test]
    async fn stopped_job_dispatch_is_discarded() {
        let (sup, mut rx) = supervisor();
        let job = add(&sup, draft("echo never"));
        let dispatch = due(&sup, &mut rx, &job).await;
        sup.ctx.store.stop_crontab(job.id).unwrap();

        Arc::clone(&sup).run_scheduled(dispatch).await;

        assert!(logs(&sup, job.id).is_empty());
        assert!(!sup.ctx.scheduler.is_armed(JobId(job.id)));
    }

    #[tokio::test]
    async fn missing_row_disarms() {
        let (sup, mut rx) = supervisor();
        let job = add(&sup, draft("echo never"));
        let dispatch = due(&sup, &mut rx, &job).await;
        sup.ctx.store.delete_crontab(job.id).unwrap();

        Arc::clone(&sup).run_scheduled(dispatch).await;
        assert!(!sup.ctx.scheduler.is_armed(JobId(job.id)));
    }

    #[tokio::test]
    async fn manual_run_is_logged_once_without_status_change() {
        let (sup, _rx) = supervisor();
        let job = add(&sup, draft("echo manual"));

        sup.exec(job.id, 9).unwrap();
        let logs = wait_for_logs(&sup, job.id, 1).await;

        assert!(logs[0].once);
        assert_eq!(logs[0].exec_user_id, 9);
        assert_eq!(logs[0].result, "manual\n");
        let row = sup.ctx.store.get_crontab(job.id).unwrap();
        assert_eq!(row.status, CrontabStatus::Ok);
        assert_eq!(row.last_exec_status, Some(ExecStatus::Success));
    }

    #[tokio::test]
    async fn kill_cancels_manual_run() {
        let (sup, _rx) = supervisor();
        let job = add(&sup, draft("sleep 30"));

        sup.exec(job.id, 1).unwrap();
        assert_eq!(sup.running(job.id), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sup.kill(job.id), 1);

        let logs = wait_for_logs(&sup, job.id, 1).await;
        assert_eq!(logs[0].status, ExecStatus::Error);
        assert_eq!(logs[0].result, "killed");
        assert!(sup.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(sup.running(job.id), 0);
    }

    #[tokio::test]
    async fn deleted_job_leaves_no_run_log() {
        let (sup, _rx) = supervisor();
        let job = add(&sup, draft("sleep 30"));

        sup.exec(job.id, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sup.release_and_wait(job.id, Duration::from_secs(3)).await);
        assert_eq!(sup.running(job.id), 0);
        sup.ctx.store.delete_crontab(job.id).unwrap();
        sup.ctx.store.clean_crontab_logs(job.id).unwrap();

        // A run that finishes after the delete must not add a log row.
        let orphan = Outcome::aborted(calendar::unix_now(), "killed");
        sup.append_log(&job, &orphan, true, 1);
        assert!(logs(&sup, job.id).is_empty());
    }

    #[tokio::test]
    async fn exec_of_unknown_job_is_not_found() {
        let (sup, _rx) = supervisor();
        let err = sup.exec(404, 1).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn start_and_stop_move_status() {
        let (sup, _rx) = supervisor();
        let job = add(&sup, draft("true"));

        let next = sup.start(&job).unwrap();
        let row = sup.ctx.store.get_crontab(job.id).unwrap();
        assert_eq!(row.status, CrontabStatus::Timing);
        assert_eq!(row.next_exec_time, next);

        sup.stop(job.id).unwrap();
        let row = sup.ctx.store.get_crontab(job.id).unwrap();
        assert_eq!(row.status, CrontabStatus::Stopped);
        assert_eq!(row.next_exec_time, 0);
        assert!(!sup.ctx.scheduler.is_armed(JobId(job.id)));
    }

    #[tokio::test]
    async fn recover_skips_invalid_rows() {
        let (sup, _rx) = supervisor();
        let good = add(&sup, draft("true"));
        let bad = add(
            &sup,
            CrontabDraft {
                time_expr: "not a cron".into(),
                ..draft("true")
            },
        );
        sup.ctx.store.schedule_crontab(good.id, 1).unwrap();
        sup.ctx.store.schedule_crontab(bad.id, 1).unwrap();

        assert_eq!(sup.recover(), 1);
        assert!(sup.ctx.scheduler.is_armed(JobId(good.id)));
        assert!(!sup.ctx.scheduler.is_armed(JobId(bad.id)));
    }

    #[test]
    fn cost_is_rounded_to_four_places() {
        assert_eq!(round_cost(Duration::from_micros(1_234_567)), 1.2346);
    }
}
