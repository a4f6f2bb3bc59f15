//! RPC services this node exposes to the control plane.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use tasknode_cron::{calendar, CronExpr};
use tasknode_exec::{read_chunk, DayLog, ExecError};
use tasknode_rpc::{decode_args, encode_reply, frames::codes, ErrorShape, Service};
use tasknode_store::{
    Crontab, CrontabDraft, CrontabLog, CrontabStatus, Daemon, DaemonDraft, DaemonStatus,
    LogFilter, Page, Pagination,
};
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::crontab::CrontabSupervisor;
use crate::daemon::DaemonSupervisor;
use crate::error::{AgentError, Result};
use crate::proto::{
    CleanArgs, CrontabArgs, DaemonArgs, DaemonLogArgs, DaemonLogReply, ExecReply, GetArgs,
    IdsArgs, ListArgs, LogArgs, StartedRun,
};

/// Lines returned by a daemon log read when the caller asks for none.
pub const DEFAULT_LOG_LINES: u32 = 100;
pub const MAX_LOG_LINES: u32 = 1_000;

/// How long `Edit` and `Del` wait for killed runs to write back.
const RELEASE_WAIT: Duration = Duration::from_secs(5);

fn unknown_method(service: &str, method: &str) -> ErrorShape {
    ErrorShape::new(
        codes::METHOD_NOT_FOUND,
        format!("method '{service}.{method}' not found"),
    )
}

fn require_ids(ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Err(AgentError::BadRequest("ids must not be empty".to_string()));
    }
    Ok(())
}

/// `Serve`: liveness check answered by every node.
pub struct NodeService;

#[async_trait]
impl Service for NodeService {
    fn name(&self) -> &'static str {
        "Serve"
    }

    fn methods(&self) -> &'static [&'static str] {
        &["Ping"]
    }

    async fn call(&self, method: &str, _body: &[u8]) -> std::result::Result<Vec<u8>, ErrorShape> {
        match method {
            "Ping" => encode_reply(&()),
            _ => Err(unknown_method(self.name(), method)),
        }
    }
}

/// `CrontabServe`: timed-job management.
pub struct CrontabService {
    ctx: Arc<AgentContext>,
    supervisor: Arc<CrontabSupervisor>,
}

impl CrontabService {
    pub fn new(ctx: Arc<AgentContext>, supervisor: Arc<CrontabSupervisor>) -> Self {
        Self { ctx, supervisor }
    }

    fn validate(draft: &CrontabDraft) -> Result<()> {
        if draft.command.trim().is_empty() {
            return Err(AgentError::BadRequest("command must not be empty".to_string()));
        }
        if draft.timeout < 0 {
            return Err(AgentError::BadRequest("timeout must not be negative".to_string()));
        }
        CronExpr::new(draft.time_expr.as_str()).validate()?;
        Ok(())
    }

    fn list(&self, args: ListArgs) -> Result<Page<Crontab>> {
        Ok(self.ctx.store.list_crontabs(&args.keyword, args.pagination())?)
    }

    fn add(&self, args: CrontabArgs) -> Result<Crontab> {
        Self::validate(&args.draft)?;
        let job = self.ctx.store.add_crontab(&args.draft, args.user_id)?;
        info!(job_id = job.id, user_id = args.user_id, "timed job added");
        Ok(job)
    }

    fn get(&self, args: GetArgs) -> Result<Crontab> {
        Ok(self.ctx.store.get_crontab(args.id)?)
    }

    async fn edit(&self, args: CrontabArgs) -> Result<Crontab> {
        Self::validate(&args.draft)?;
        self.ctx.store.get_crontab(args.id)?;
        self.supervisor.release_and_wait(args.id, RELEASE_WAIT).await;
        let job = self.ctx.store.edit_crontab(args.id, &args.draft, args.user_id)?;
        info!(job_id = job.id, user_id = args.user_id, "timed job edited");
        Ok(job)
    }

    fn audit(&self, args: IdsArgs) -> Result<Vec<Crontab>> {
        require_ids(&args.ids)?;
        Ok(self.ctx.store.audit_crontabs(&args.ids, args.user_id)?)
    }

    fn start(&self, args: IdsArgs) -> Result<Vec<Crontab>> {
        require_ids(&args.ids)?;
        let jobs = self
            .ctx
            .store
            .crontabs_by_ids(&args.ids, &[CrontabStatus::Ok, CrontabStatus::Stopped])?;
        let mut started = Vec::with_capacity(jobs.len());
        for job in &jobs {
            match self.supervisor.start(job) {
                Ok(_) => started.push(job.id),
                Err(e) => warn!(job_id = job.id, error = %e, "timed job not started"),
            }
        }
        Ok(self.ctx.store.crontabs_by_ids(&started, &[])?)
    }

    fn stop(&self, args: IdsArgs) -> Result<Vec<Crontab>> {
        require_ids(&args.ids)?;
        let jobs = self
            .ctx
            .store
            .crontabs_by_ids(&args.ids, &[CrontabStatus::Timing, CrontabStatus::Running])?;
        let mut stopped = Vec::with_capacity(jobs.len());
        for job in &jobs {
            match self.supervisor.stop(job.id) {
                Ok(()) => stopped.push(job.id),
                Err(e) => warn!(job_id = job.id, error = %e, "timed job not stopped"),
            }
        }
        Ok(self.ctx.store.crontabs_by_ids(&stopped, &[])?)
    }

    async fn del(&self, args: IdsArgs) -> Result<Vec<i64>> {
        require_ids(&args.ids)?;
        let mut deleted = Vec::new();
        for &id in &args.ids {
            self.supervisor.release_and_wait(id, RELEASE_WAIT).await;
            if self.ctx.store.delete_crontab(id)? {
                deleted.push(id);
            }
        }
        Ok(deleted)
    }

    fn exec(&self, args: IdsArgs) -> Result<ExecReply> {
        require_ids(&args.ids)?;
        let mut runs = Vec::with_capacity(args.ids.len());
        for &id in &args.ids {
            match self.supervisor.exec(id, args.user_id) {
                Ok(run_id) => runs.push(StartedRun {
                    crontab_id: id,
                    run_id: run_id.to_string(),
                }),
                Err(e) => warn!(job_id = id, error = %e, "manual run not started"),
            }
        }
        Ok(ExecReply { runs })
    }

    fn kill(&self, args: IdsArgs) -> Result<u64> {
        require_ids(&args.ids)?;
        let killed: usize = args.ids.iter().map(|&id| self.supervisor.kill(id)).sum();
        Ok(killed as u64)
    }

    fn log(&self, args: LogArgs) -> Result<Page<CrontabLog>> {
        let filter = LogFilter {
            crontab_id: args.crontab_id,
            start_from: args.start_from,
            start_until: args.start_until,
            status: args.status,
            page: Pagination::new(args.page, args.page_size),
        };
        Ok(self.ctx.store.list_crontab_logs(&filter)?)
    }

    fn clean(&self, args: CleanArgs) -> Result<u64> {
        let removed = self.ctx.store.clean_crontab_logs(args.crontab_id)?;
        info!(job_id = args.crontab_id, removed, "run log cleaned");
        Ok(removed as u64)
    }
}

#[async_trait]
impl Service for CrontabService {
    fn name(&self) -> &'static str {
        "CrontabServe"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[
            "List", "Add", "Get", "Edit", "Audit", "Start", "Stop", "Del", "Exec", "Kill", "Log",
            "Clean",
        ]
    }

    async fn call(&self, method: &str, body: &[u8]) -> std::result::Result<Vec<u8>, ErrorShape> {
        match method {
            "List" => encode_reply(&self.list(decode_args(body)?)?),
            "Add" => encode_reply(&self.add(decode_args(body)?)?),
            "Get" => encode_reply(&self.get(decode_args(body)?)?),
            "Edit" => encode_reply(&self.edit(decode_args(body)?).await?),
            "Audit" => encode_reply(&self.audit(decode_args(body)?)?),
            "Start" => encode_reply(&self.start(decode_args(body)?)?),
            "Stop" => encode_reply(&self.stop(decode_args(body)?)?),
            "Del" => encode_reply(&self.del(decode_args(body)?).await?),
            "Exec" => encode_reply(&self.exec(decode_args(body)?)?),
            "Kill" => encode_reply(&self.kill(decode_args(body)?)?),
            "Log" => encode_reply(&self.log(decode_args(body)?)?),
            "Clean" => encode_reply(&self.clean(decode_args(body)?)?),
            _ => Err(unknown_method(self.name(), method)),
        }
    }
}

/// `DaemonServe`: daemon-job management.
pub struct DaemonService {
    ctx: Arc<AgentContext>,
    supervisor: Arc<DaemonSupervisor>,
}

impl DaemonService {
    pub fn new(ctx: Arc<AgentContext>, supervisor: Arc<DaemonSupervisor>) -> Self {
        Self { ctx, supervisor }
    }

    fn validate(draft: &DaemonDraft) -> Result<()> {
        if draft.command.trim().is_empty() {
            return Err(AgentError::BadRequest("command must not be empty".to_string()));
        }
        Ok(())
    }

    fn list(&self, args: ListArgs) -> Result<Page<Daemon>> {
        Ok(self.ctx.store.list_daemons(&args.keyword, args.pagination())?)
    }

    fn add(&self, args: DaemonArgs) -> Result<Daemon> {
        Self::validate(&args.draft)?;
        let daemon = self.ctx.store.add_daemon(&args.draft, args.user_id)?;
        info!(daemon_id = daemon.id, user_id = args.user_id, "daemon added");
        Ok(daemon)
    }

    fn get(&self, args: GetArgs) -> Result<Daemon> {
        Ok(self.ctx.store.get_daemon(args.id)?)
    }

    async fn edit(&self, args: DaemonArgs) -> Result<Daemon> {
        Self::validate(&args.draft)?;
        self.ctx.store.get_daemon(args.id)?;
        self.supervisor.stop(args.id).await;
        let daemon = self.ctx.store.edit_daemon(args.id, &args.draft, args.user_id)?;
        info!(daemon_id = daemon.id, user_id = args.user_id, "daemon edited");
        Ok(daemon)
    }

    fn audit(&self, args: IdsArgs) -> Result<Vec<Daemon>> {
        require_ids(&args.ids)?;
        Ok(self.ctx.store.audit_daemons(&args.ids, args.user_id)?)
    }

    fn start(&self, args: IdsArgs) -> Result<Vec<Daemon>> {
        require_ids(&args.ids)?;
        let daemons = self
            .ctx
            .store
            .daemons_by_ids(&args.ids, &[DaemonStatus::Ok, DaemonStatus::Stopped])?;
        let mut started = Vec::with_capacity(daemons.len());
        for daemon in daemons {
            let id = daemon.id;
            match self.supervisor.start(daemon) {
                Ok(_) => started.push(id),
                Err(e) => warn!(daemon_id = id, error = %e, "daemon not started"),
            }
        }
        Ok(self.ctx.store.daemons_by_ids(&started, &[])?)
    }

    async fn stop(&self, args: IdsArgs) -> Result<Vec<Daemon>> {
        require_ids(&args.ids)?;
        let daemons = self
            .ctx
            .store
            .daemons_by_ids(&args.ids, &[DaemonStatus::Running])?;
        for daemon in &daemons {
            if !self.supervisor.stop(daemon.id).await {
                // Marked running by a process that is gone.
                self.ctx.store.set_daemon_status(daemon.id, DaemonStatus::Stopped)?;
            }
        }
        let ids: Vec<i64> = daemons.iter().map(|d| d.id).collect();
        Ok(self.ctx.store.daemons_by_ids(&ids, &[])?)
    }

    async fn del(&self, args: IdsArgs) -> Result<Vec<i64>> {
        require_ids(&args.ids)?;
        let mut deleted = Vec::new();
        for &id in &args.ids {
            self.supervisor.stop(id).await;
            if self.ctx.store.delete_daemon(id)? {
                deleted.push(id);
            }
        }
        Ok(deleted)
    }

    async fn log(&self, args: DaemonLogArgs) -> Result<DaemonLogReply> {
        let date = if args.date.is_empty() {
            calendar::log_date(&calendar::now())
        } else {
            NaiveDate::parse_from_str(&args.date, calendar::DATE_LAYOUT)
                .map_err(|e| AgentError::BadRequest(format!("bad date '{}': {e}", args.date)))?
                .format(calendar::DATE_LAYOUT)
                .to_string()
        };
        let keyword = match args.keyword.as_str() {
            "" => None,
            pattern => Some(Regex::new(pattern).map_err(ExecError::from)?),
        };
        let size = match args.size {
            0 => DEFAULT_LOG_LINES,
            n => n.min(MAX_LOG_LINES),
        } as usize;
        let path = DayLog::path_for(
            Path::new(&self.ctx.config.daemon.log_dir),
            &date,
            &format!("{}.log", args.id),
        );

        let chunk = tokio::task::spawn_blocking(move || {
            read_chunk(&path, args.offset, size, keyword.as_ref())
        })
        .await
        .map_err(|e| AgentError::Io(std::io::Error::other(e)))??;
        Ok(DaemonLogReply {
            offset: chunk.offset,
            lines: chunk.lines,
        })
    }
}

#[async_trait]
impl Service for DaemonService {
    fn name(&self) -> &'static str {
        "DaemonServe"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[
            "List", "Add", "Get", "Edit", "Audit", "Start", "Stop", "Del", "Log",
        ]
    }

    async fn call(&self, method: &str, body: &[u8]) -> std::result::Result<Vec<u8>, ErrorShape> {
        match method {
            "List" => encode_reply(&self.list(decode_args(body)?)?),
            "Add" => encode_reply(&self.add(decode_args(body)?)?),
            "Get" => encode_reply(&self.get(decode_args(body)?)?),
            "Edit" => encode_reply(&self.edit(decode_args(body)?).await?),
            "Audit" => encode_reply(&self.audit(decode_args(body)?)?),
            "Start" => encode_reply(&self.start(decode_args(body)?)?),
            "Stop" => encode_reply(&self.stop(decode_args(body)?).await?),
            "Del" => encode_reply(&self.del(decode_args(body)?).await?),
            "Log" => encode_reply(&self.log(decode_args(body)?).await?),
            _ => Err(unknown_method(self.name(), method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crontab_draft_validation() {
        let ok = CrontabDraft {
            command: "true".into(),
            time_expr: "0 */5 * * * *".into(),
            ..Default::default()
        };
        assert!(CrontabService::validate(&ok).is_ok());

        let err = CrontabService::validate(&CrontabDraft {
            time_expr: "61 * * * * *".into(),
            ..ok.clone()
        })
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_EXPRESSION");

        let err = CrontabService::validate(&CrontabDraft {
            command: " ".into(),
            ..ok.clone()
        })
        .unwrap_err();
        assert_eq!(err.code(), codes::BAD_REQUEST);

        let err = CrontabService::validate(&CrontabDraft { timeout: -1, ..ok }).unwrap_err();
        assert_eq!(err.code(), codes::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ping_replies_unit() {
        let reply = NodeService.call("Ping", &[]).await.unwrap();
        tasknode_rpc::frames::decode::<()>(&reply).unwrap();
        let err = NodeService.call("Pong", &[]).await.unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }
}
