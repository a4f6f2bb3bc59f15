//! Failure alerts relayed through the control plane's webhook notifier.

use serde_json::json;
use tasknode_cron::calendar;
use tasknode_rpc::methods;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::AgentContext;
use crate::error::{AgentError, Result};
use crate::proto::NoticeArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Timed,
    Daemon,
}

impl JobKind {
    fn label(self) -> &'static str {
        match self {
            JobKind::Timed => "timed job",
            JobKind::Daemon => "daemon job",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertCause {
    Timeout { secs: i64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub node_addr: String,
    pub kind: JobKind,
    pub job_id: i64,
    pub job_name: String,
    pub cause: AlertCause,
    /// Unix seconds.
    pub at: i64,
}

impl Alert {
    pub fn title(&self) -> String {
        let what = match self.cause {
            AlertCause::Timeout { .. } => "task timeout",
            AlertCause::Failed { .. } => "task failed",
        };
        format!("{} alert: {what}", self.node_addr)
    }

    /// Markdown message body.
    pub fn text(&self) -> String {
        let detail = match &self.cause {
            AlertCause::Timeout { secs } => format!("- **Timeout**: {secs}s"),
            AlertCause::Failed { reason } => format!("- **Reason**: {reason}"),
        };
        format!(
            "### {title}\n\
             - **Node**: {node}\n\
             - **Type**: {kind}\n\
             - **Task ID**: {id}\n\
             - **Task**: {name}\n\
             {detail}\n\
             - **Time**: {time}\n",
            title = self.title(),
            node = self.node_addr,
            kind = self.kind.label(),
            id = self.job_id,
            name = self.job_name,
            time = calendar::format_unix(self.at),
        )
    }

    /// Webhook payload in the markdown message shape.
    pub fn body(&self) -> String {
        json!({
            "msgtype": "markdown",
            "markdown": {
                "title": self.title(),
                "text": self.text(),
            },
        })
        .to_string()
    }
}

/// Ask the control plane to deliver `alert` to `addresses`.
///
/// Returns `Ok(false)` without a call when there is nothing to notify or no
/// control plane is configured.
pub async fn send(ctx: &AgentContext, addresses: &[String], alert: &Alert) -> Result<bool> {
    if addresses.is_empty() {
        debug!(job_id = alert.job_id, "no notify addresses; alert skipped");
        return Ok(false);
    }
    let Some(manage) = ctx.manage_addr() else {
        debug!(job_id = alert.job_id, "no control plane configured; alert skipped");
        return Ok(false);
    };

    let args = NoticeArgs {
        addresses: addresses.to_vec(),
        body: alert.body(),
    };
    ctx.clients
        .call(manage, methods::DING_TALK_NOTICE, &CancellationToken::new(), &args)
        .await
        .map_err(AgentError::from)
}

/// [`send`], logging instead of returning failures.
pub async fn send_logged(ctx: &AgentContext, addresses: &[String], alert: &Alert) {
    if let Err(e) = send(ctx, addresses, alert).await {
        warn!(job_id = alert.job_id, error = %e, "alert delivery failed");
    }
}
