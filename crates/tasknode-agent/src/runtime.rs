use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tasknode_core::TaskNodeConfig;
use tasknode_rpc::{ClientPool, Router};
use tasknode_scheduler::Scheduler;
use tasknode_store::Store;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::crontab::CrontabSupervisor;
use crate::daemon::DaemonSupervisor;
use crate::error::Result;
use crate::heartbeat;
use crate::serve::{CrontabService, DaemonService, NodeService};

/// How long shutdown waits for killed timed runs to record their result.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running node agent and its background tasks.
pub struct Agent {
    ctx: Arc<AgentContext>,
    crontabs: Arc<CrontabSupervisor>,
    daemons: Arc<DaemonSupervisor>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Open the store, build the subsystems, recover persisted jobs and
    /// start serving RPC on `rpc.listen_addr`.
    pub async fn start(config: TaskNodeConfig) -> Result<Self> {
        ensure_parent_dir(&config.database.path)?;
        info!(path = %config.database.path, "opening SQLite database");
        let store = Store::open(&config.database.path)?;

        let clients = ClientPool::default();
        let (scheduler, dispatches) = Scheduler::new(
            Duration::from_millis(config.scheduler.poll_interval_ms),
            config.scheduler.dispatch_capacity,
        );
        let listener = TcpListener::bind(&config.rpc.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let ctx = Arc::new(AgentContext::new(
            config,
            store,
            Arc::new(scheduler),
            clients,
        ));
        let crontabs = CrontabSupervisor::new(ctx.clone());
        let daemons = DaemonSupervisor::new(ctx.clone());
        let router = Arc::new(
            Router::new()
                .register(Arc::new(NodeService))
                .register(Arc::new(CrontabService::new(ctx.clone(), crontabs.clone())))
                .register(Arc::new(DaemonService::new(ctx.clone(), daemons.clone()))),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let scheduler = ctx.scheduler.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { scheduler.run(rx).await }));
        tasks.push(tokio::spawn(
            crontabs.clone().consume(dispatches, shutdown_rx.clone()),
        ));

        let timed = crontabs.recover();
        let recovered_daemons = daemons.recover();

        tasks.push(tokio::spawn(heartbeat::run(ctx.clone(), shutdown_rx.clone())));
        tasks.push(tokio::spawn(tasknode_rpc::serve(
            listener,
            router,
            shutdown_rx,
        )));

        info!(
            addr = %local_addr,
            node = %ctx.config.node.name,
            timed,
            daemons = recovered_daemons,
            "tasknode agent started"
        );
        Ok(Self {
            ctx,
            crontabs,
            daemons,
            local_addr,
            shutdown_tx,
            tasks,
        })
    }

    /// Address the RPC server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    pub fn crontabs(&self) -> &Arc<CrontabSupervisor> {
        &self.crontabs
    }

    pub fn daemons(&self) -> &Arc<DaemonSupervisor> {
        &self.daemons
    }

    /// Kill timed runs, stop daemon loops, then stop the background tasks.
    pub async fn shutdown(self) {
        self.crontabs.kill_all();
        self.crontabs.wait_idle(DRAIN_TIMEOUT).await;
        self.daemons.stop_all().await;

        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "agent task ended abnormally");
            }
        }
        info!("tasknode agent stopped");
    }
}

fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
