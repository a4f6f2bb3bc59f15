//! Argument and reply bodies exchanged with the control plane.
//!
//! Everything here is bincode-encoded, so the types stick to plain structs
//! and externally tagged enums.

use serde::{Deserialize, Serialize};
use tasknode_store::{CrontabDraft, DaemonDraft, ExecStatus, NodeCounts, Pagination};

/// `List` on either job service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListArgs {
    /// Substring matched against name and command; empty matches everything.
    pub keyword: String,
    pub page: u32,
    pub page_size: u32,
}

impl ListArgs {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.page_size)
    }
}

/// `Get` on either job service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetArgs {
    pub id: i64,
}

/// `CrontabServe.Add` / `CrontabServe.Edit`. `id` is ignored by `Add`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrontabArgs {
    pub id: i64,
    pub draft: CrontabDraft,
    pub user_id: i64,
}

/// `DaemonServe.Add` / `DaemonServe.Edit`. `id` is ignored by `Add`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonArgs {
    pub id: i64,
    pub draft: DaemonDraft,
    pub user_id: i64,
}

/// Batch actions: `Audit`, `Start`, `Stop`, `Del`, `Exec`, `Kill`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdsArgs {
    pub ids: Vec<i64>,
    pub user_id: i64,
}

/// `CrontabServe.Log`. Zero time bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogArgs {
    pub crontab_id: i64,
    pub start_from: i64,
    pub start_until: i64,
    pub status: Option<ExecStatus>,
    pub page: u32,
    pub page_size: u32,
}

/// `CrontabServe.Clean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanArgs {
    pub crontab_id: i64,
}

/// `DaemonServe.Log`: tail one day's log file from a byte offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonLogArgs {
    pub id: i64,
    /// `YYYY-MM-DD`; empty means today.
    pub date: String,
    pub offset: u64,
    /// Maximum lines returned.
    pub size: u32,
    /// Regex; empty returns every line.
    pub keyword: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonLogReply {
    /// Offset to pass back on the next call.
    pub offset: u64,
    pub lines: Vec<String>,
}

/// `CrontabServe.Exec`: the run ids started, one per job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecReply {
    pub runs: Vec<StartedRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedRun {
    pub crontab_id: i64,
    pub run_id: String,
}

/// Heartbeat body for `Serve.Sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSync {
    pub address: String,
    pub node: NodeStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    pub name: String,
    pub address: String,
    pub counts: NodeCounts,
}

/// The control plane's view of this node, returned by `Serve.Sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub sync_time: i64,
}

/// `Serve.DingTalkNotice`: the control plane relays `body` to each webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeArgs {
    pub addresses: Vec<String>,
    pub body: String,
}
