//! Daemon-job supervision: keep one long-running process alive per job,
//! restarting it after error exits up to the job's retry cap.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use tasknode_core::types::DaemonId;
use tasknode_cron::calendar;
use tasknode_exec::{CommandSpec, DayLog, Exit, Finished};
use tasknode_store::{Daemon, TriggerAction};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AgentContext;
use crate::error::Result;
use crate::notify::{self, Alert, AlertCause, JobKind};

/// Pause between an error exit and the next launch.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Daemons stopped this recently are restarted when the agent starts.
pub const RECOVERY_WINDOW_SECS: i64 = 30;

const STOPPED_REASON: &str = "manually stopped";

struct Loop {
    generation: u64,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub struct DaemonSupervisor {
    ctx: Arc<AgentContext>,
    loops: DashMap<DaemonId, Loop>,
    generation: AtomicU64,
    /// Set by [`DaemonSupervisor::stop_all`]; loops ended by shutdown send
    /// no failure notice.
    halting: AtomicBool,
}

impl DaemonSupervisor {
    pub fn new(ctx: Arc<AgentContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            loops: DashMap::new(),
            generation: AtomicU64::new(0),
            halting: AtomicBool::new(false),
        })
    }

    /// Start supervising `daemon`. Returns `false` when a loop for the same
    /// id is already running.
    pub fn start(self: &Arc<Self>, daemon: Daemon) -> Result<bool> {
        let id = DaemonId(daemon.id);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        match self.loops.entry(id) {
            Entry::Occupied(_) => {
                debug!(daemon_id = %id, "daemon already supervised");
                return Ok(false);
            }
            Entry::Vacant(slot) => {
                slot.insert(Loop {
                    generation,
                    token: token.clone(),
                    handle: None,
                });
            }
        }

        if let Err(e) = self.ctx.store.mark_daemon_running(id.get(), calendar::unix_now()) {
            self.loops.remove(&id);
            return Err(e.into());
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.supervise(daemon, generation, token).await });
        if let Some(mut slot) = self.loops.get_mut(&id) {
            if slot.generation == generation {
                slot.handle = Some(handle);
            }
        }
        info!(daemon_id = %id, "daemon started");
        Ok(true)
    }

    /// Cancel the loop for `id` and wait for it to record its end.
    pub async fn stop(&self, id: i64) -> bool {
        let Some((_, running)) = self.loops.remove(&DaemonId(id)) else {
            return false;
        };
        running.token.cancel();
        if let Some(handle) = running.handle {
            if let Err(e) = handle.await {
                warn!(daemon_id = id, error = %e, "daemon loop ended abnormally");
            }
        }
        true
    }

    /// Shutdown path: stop every loop without failure notices.
    pub async fn stop_all(&self) -> usize {
        self.halting.store(true, Ordering::SeqCst);
        let ids: Vec<i64> = self.loops.iter().map(|entry| entry.key().get()).collect();
        let mut stopped = 0;
        for id in ids {
            if self.stop(id).await {
                stopped += 1;
            }
        }
        info!(stopped, "daemon loops halted");
        stopped
    }

    pub fn is_running(&self, id: i64) -> bool {
        self.loops.contains_key(&DaemonId(id))
    }

    /// Restart daemons whose loop ended within [`RECOVERY_WINDOW_SECS`],
    /// i.e. the ones a previous agent process stopped on its way down.
    pub fn recover(self: &Arc<Self>) -> usize {
        let since = calendar::unix_now() - RECOVERY_WINDOW_SECS;
        let daemons = match self.ctx.store.daemons_stopped_since(since) {
            Ok(daemons) => daemons,
            Err(e) => {
                warn!(error = %e, "could not load daemons for recovery");
                return 0;
            }
        };

        let mut started = 0;
        for daemon in daemons {
            let id = daemon.id;
            match self.start(daemon) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!(daemon_id = id, error = %e, "daemon not recovered"),
            }
        }
        info!(started, "daemons recovered");
        started
    }

    async fn supervise(self: Arc<Self>, daemon: Daemon, generation: u64, token: CancellationToken) {
        let id = DaemonId(daemon.id);
        let spec = CommandSpec::new(&daemon.command)
            .dir(&daemon.dir)
            .env(daemon.env.clone())
            .user(&daemon.user);
        let mut log = DayLog::new(&self.ctx.config.daemon.log_dir, format!("{id}.log"));
        let mut retries = 0u32;

        let (reason, cancelled) = loop {
            let result = tasknode_exec::run(&spec, None, &token, |line| {
                if let Err(e) = log.write_line(line) {
                    debug!(daemon_id = %id, error = %e, "daemon log write failed");
                }
            })
            .await;

            let failure = match result {
                Ok(Finished {
                    exit: Exit::Cancelled,
                    ..
                }) => break (STOPPED_REASON.to_string(), true),
                Ok(Finished {
                    exit: Exit::Success,
                    ..
                }) => break ("script exited without error".to_string(), false),
                Ok(Finished {
                    exit: Exit::Failed(reason),
                    ..
                }) => reason,
                Ok(Finished {
                    exit: Exit::TimedOut,
                    ..
                }) => "timed out".to_string(),
                Err(e) => e.to_string(),
            };

            retries += 1;
            if retries > daemon.failed_restart_num {
                break (
                    format!("no retry enabled or max retries reached: {failure}"),
                    false,
                );
            }
            warn!(
                daemon_id = %id,
                retry = retries,
                max = daemon.failed_restart_num,
                reason = %failure,
                "daemon exited; restarting"
            );
            tokio::select! {
                _ = token.cancelled() => break (STOPPED_REASON.to_string(), true),
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
        };

        self.loops.remove_if(&id, |_, running| running.generation == generation);
        if let Err(e) = self
            .ctx
            .store
            .mark_daemon_failed(id.get(), &reason, calendar::unix_now())
        {
            warn!(daemon_id = %id, error = %e, "could not record daemon end");
        }
        info!(daemon_id = %id, reason = %reason, "daemon supervision ended");

        if cancelled && self.halting.load(Ordering::SeqCst) {
            debug!(daemon_id = %id, "agent shutting down; failure notice skipped");
        } else {
            self.notice(&daemon, &reason).await;
        }
    }

    async fn notice(&self, daemon: &Daemon, reason: &str) {
        let mut seen = HashSet::new();
        for action in &daemon.failed_notice {
            if !seen.insert(action) {
                continue;
            }
            match action {
                TriggerAction::NotifyExternal => {
                    let alert = Alert {
                        node_addr: self.ctx.config.node.address.clone(),
                        kind: JobKind::Daemon,
                        job_id: daemon.id,
                        job_name: daemon.name.clone(),
                        cause: AlertCause::Failed {
                            reason: reason.to_string(),
                        },
                        at: calendar::unix_now(),
                    };
                    notify::send_logged(&self.ctx, &daemon.notify_addrs, &alert).await;
                }
                other => {
                    debug!(daemon_id = daemon.id, action = ?other, "failure notice action ignored");
                }
            }
        }
    }
}
