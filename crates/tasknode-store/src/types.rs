use serde::{Deserialize, Serialize};

/// Lifecycle of a timed job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrontabStatus {
    /// Created or edited, waiting for review.
    Unaudited,
    /// Reviewed, not scheduled.
    Ok,
    /// Armed in the scheduler, waiting for its next fire time.
    Timing,
    /// A scheduled execution is in flight.
    Running,
    Stopped,
}

impl CrontabStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CrontabStatus::Unaudited => "Unaudited",
            CrontabStatus::Ok => "Ok",
            CrontabStatus::Timing => "Timing",
            CrontabStatus::Running => "Running",
            CrontabStatus::Stopped => "Stopped",
        }
    }

    /// Statuses the scheduler owns; rows in them are re-armed on startup.
    pub fn is_scheduled(self) -> bool {
        matches!(self, CrontabStatus::Timing | CrontabStatus::Running)
    }
}

impl std::fmt::Display for CrontabStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CrontabStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Unaudited" => Ok(CrontabStatus::Unaudited),
            "Ok" => Ok(CrontabStatus::Ok),
            "Timing" => Ok(CrontabStatus::Timing),
            "Running" => Ok(CrontabStatus::Running),
            "Stopped" => Ok(CrontabStatus::Stopped),
            other => Err(format!("unknown crontab status: {other}")),
        }
    }
}

/// Lifecycle of a daemon job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DaemonStatus {
    Unaudited,
    Ok,
    Running,
    Stopped,
}

impl DaemonStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DaemonStatus::Unaudited => "Unaudited",
            DaemonStatus::Ok => "Ok",
            DaemonStatus::Running => "Running",
            DaemonStatus::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DaemonStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Unaudited" => Ok(DaemonStatus::Unaudited),
            "Ok" => Ok(DaemonStatus::Ok),
            "Running" => Ok(DaemonStatus::Running),
            "Stopped" => Ok(DaemonStatus::Stopped),
            other => Err(format!("unknown daemon status: {other}")),
        }
    }
}

/// Outcome of one timed-job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecStatus {
    Success,
    Error,
    Timeout,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::Success => "Success",
            ExecStatus::Error => "Error",
            ExecStatus::Timeout => "Timeout",
        }
    }

    /// Parse a stored column; the empty string means "never ran".
    pub fn from_column(s: &str) -> std::result::Result<Option<Self>, String> {
        match s {
            "" => Ok(None),
            "Success" => Ok(Some(ExecStatus::Success)),
            "Error" => Ok(Some(ExecStatus::Error)),
            "Timeout" => Ok(Some(ExecStatus::Timeout)),
            other => Err(format!("unknown exec status: {other}")),
        }
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action taken when a run times out, fails, or a daemon gives up.
///
/// Stored and sent as a plain string. `"DingTalkNotify"` is the legacy
/// spelling of [`TriggerAction::NotifyExternal`]; anything unrecognised is
/// kept verbatim and ignored when triggers run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TriggerAction {
    ForceKill,
    NotifyExternal,
    Unknown(String),
}

impl From<String> for TriggerAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ForceKill" => TriggerAction::ForceKill,
            "NotifyExternal" | "DingTalkNotify" => TriggerAction::NotifyExternal,
            _ => TriggerAction::Unknown(s),
        }
    }
}

impl From<TriggerAction> for String {
    fn from(action: TriggerAction) -> Self {
        match action {
            TriggerAction::ForceKill => "ForceKill".to_string(),
            TriggerAction::NotifyExternal => "NotifyExternal".to_string(),
            TriggerAction::Unknown(s) => s,
        }
    }
}

/// A persisted timed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crontab {
    pub id: i64,
    pub name: String,
    /// Shell command line.
    pub command: String,
    /// Working directory; ignored when empty or missing on disk.
    pub dir: String,
    /// OS account to run as; empty runs as the agent's own user.
    pub user: String,
    /// `KEY=VALUE` pairs. Non-empty replaces the inherited environment.
    pub env: Vec<String>,
    pub time_expr: String,
    /// Seconds; `0` disables the timeout.
    pub timeout: i64,
    pub timeout_trigger: Vec<TriggerAction>,
    pub error_trigger: Vec<TriggerAction>,
    /// Webhook targets forwarded with external notifications.
    pub notify_addrs: Vec<String>,
    pub status: CrontabStatus,
    pub last_exec_time: i64,
    pub next_exec_time: i64,
    pub last_exec_status: Option<ExecStatus>,
    pub last_exec_msg: String,
    pub last_cost_time: f64,
    pub create_user_id: i64,
    pub update_user_id: i64,
    pub create_time: i64,
    pub update_time: i64,
}

/// Editable fields of a timed job, as supplied by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrontabDraft {
    pub name: String,
    pub command: String,
    pub dir: String,
    pub user: String,
    pub env: Vec<String>,
    pub time_expr: String,
    pub timeout: i64,
    pub timeout_trigger: Vec<TriggerAction>,
    pub error_trigger: Vec<TriggerAction>,
    pub notify_addrs: Vec<String>,
}

/// Result of one finished run, written back onto the job row.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// Status the row returns to once the run is over.
    pub status: CrontabStatus,
    pub exec_time: i64,
    pub exec_status: ExecStatus,
    pub message: String,
    pub cost_time: f64,
}

/// One row of `crontab_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrontabLog {
    pub id: i64,
    pub crontab_id: i64,
    pub status: ExecStatus,
    /// Manual one-off run rather than a scheduled fire.
    pub once: bool,
    pub start_time: i64,
    pub end_time: i64,
    pub cost_time: f64,
    pub result: String,
    pub exec_user_id: i64,
    pub create_time: i64,
}

/// A persisted daemon job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Daemon {
    pub id: i64,
    pub name: String,
    pub command: String,
    pub dir: String,
    pub user: String,
    pub env: Vec<String>,
    /// Restart attempts allowed after an error exit.
    pub failed_restart_num: u32,
    pub status: DaemonStatus,
    pub failed: bool,
    pub failed_reason: String,
    pub failed_notice: Vec<TriggerAction>,
    pub notify_addrs: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub create_user_id: i64,
    pub update_user_id: i64,
    pub create_time: i64,
    pub update_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonDraft {
    pub name: String,
    pub command: String,
    pub dir: String,
    pub user: String,
    pub env: Vec<String>,
    pub failed_restart_num: u32,
    pub failed_notice: Vec<TriggerAction>,
    pub notify_addrs: Vec<String>,
}

/// 1-based page request. A zero page size falls back to
/// [`Pagination::DEFAULT_PAGE_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub(crate) fn limit(self) -> i64 {
        if self.page_size == 0 {
            i64::from(Self::DEFAULT_PAGE_SIZE)
        } else {
            i64::from(self.page_size)
        }
    }

    pub(crate) fn offset(self) -> i64 {
        i64::from(self.page.max(1) - 1) * self.limit()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: i64,
    pub items: Vec<T>,
}

/// Filter for run-log queries. Zero bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
    pub crontab_id: i64,
    pub start_from: i64,
    pub start_until: i64,
    pub status: Option<ExecStatus>,
    pub page: Pagination,
}

/// Job counters reported with each heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub crontab_num: i64,
    pub audit_crontab_num: i64,
    /// Scheduled jobs whose last run ended in error.
    pub fail_crontab_num: i64,
    pub daemon_num: i64,
    pub audit_daemon_num: i64,
    pub fail_daemon_num: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_action_accepts_legacy_name() {
        assert_eq!(
            TriggerAction::from("DingTalkNotify".to_string()),
            TriggerAction::NotifyExternal
        );
        let parsed: Vec<TriggerAction> =
            serde_json::from_str(r#"["ForceKill","DingTalkNotify","Pager"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                TriggerAction::ForceKill,
                TriggerAction::NotifyExternal,
                TriggerAction::Unknown("Pager".to_string()),
            ]
        );
    }

    #[test]
    fn trigger_action_serializes_canonical_names() {
        let json = serde_json::to_string(&vec![
            TriggerAction::NotifyExternal,
            TriggerAction::Unknown("Pager".to_string()),
        ])
        .unwrap();
        assert_eq!(json, r#"["NotifyExternal","Pager"]"#);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            CrontabStatus::Unaudited,
            CrontabStatus::Ok,
            CrontabStatus::Timing,
            CrontabStatus::Running,
            CrontabStatus::Stopped,
        ] {
            assert_eq!(status.as_str().parse::<CrontabStatus>().unwrap(), status);
        }
        assert!("timing".parse::<CrontabStatus>().is_err());
    }

    #[test]
    fn exec_status_empty_column_is_none() {
        assert_eq!(ExecStatus::from_column("").unwrap(), None);
        assert_eq!(
            ExecStatus::from_column("Timeout").unwrap(),
            Some(ExecStatus::Timeout)
        );
        assert!(ExecStatus::from_column("Bogus").is_err());
    }

    #[test]
    fn pagination_offsets() {
        assert_eq!(Pagination::new(1, 10).offset(), 0);
        assert_eq!(Pagination::new(3, 10).offset(), 20);
        assert_eq!(Pagination::new(0, 10).offset(), 0);
        assert_eq!(Pagination::new(2, 0).limit(), 20);
        assert_eq!(Pagination::new(2, 0).offset(), 20);
    }
}
