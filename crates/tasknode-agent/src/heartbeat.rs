use std::sync::Arc;
use std::time::Duration;

use tasknode_rpc::methods;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AgentContext;
use crate::error::Result;
use crate::proto::{NodeRecord, NodeStats, NodeSync};

/// Snapshot of this node's job counters.
pub fn node_stats(ctx: &AgentContext) -> Result<NodeStats> {
    Ok(NodeStats {
        name: ctx.config.node.name.clone(),
        address: ctx.config.node.address.clone(),
        counts: ctx.store.node_counts()?,
    })
}

/// Report once to the control plane at `manage`.
pub async fn sync_once(ctx: &AgentContext, manage: &str, cancel: &CancellationToken) -> Result<NodeRecord> {
    let body = NodeSync {
        address: ctx.config.node.address.clone(),
        node: node_stats(ctx)?,
    };
    Ok(ctx.clients.call(manage, methods::SYNC, cancel, &body).await?)
}

/// Report every `node.heartbeat_interval_secs` until shutdown.
pub async fn run(ctx: Arc<AgentContext>, mut shutdown: watch::Receiver<bool>) {
    let Some(manage) = ctx.manage_addr().map(str::to_string) else {
        info!("no control plane configured; heartbeat disabled");
        return;
    };
    let period = Duration::from_secs(ctx.config.node.heartbeat_interval_secs);
    info!(manage = %manage, period_secs = period.as_secs(), "heartbeat started");

    let cancel = CancellationToken::new();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        tokio::select! {
            result = sync_once(&ctx, &manage, &cancel) => match result {
                Ok(record) => debug!(node_id = record.id, "heartbeat acknowledged"),
                Err(e) => warn!(manage = %manage, error = %e, "heartbeat failed"),
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    debug!("heartbeat stopped");
}
