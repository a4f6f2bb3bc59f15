use std::sync::Arc;

use tasknode_core::TaskNodeConfig;
use tasknode_rpc::ClientPool;
use tasknode_scheduler::Scheduler;
use tasknode_store::Store;

/// Shared handles passed to every supervisor and service.
pub struct AgentContext {
    pub config: TaskNodeConfig,
    pub store: Store,
    pub scheduler: Arc<Scheduler>,
    /// Outbound connections, keyed by peer address.
    pub clients: ClientPool,
}

impl AgentContext {
    pub fn new(
        config: TaskNodeConfig,
        store: Store,
        scheduler: Arc<Scheduler>,
        clients: ClientPool,
    ) -> Self {
        Self {
            config,
            store,
            scheduler,
            clients,
        }
    }

    /// Address of the control plane, or `None` when reporting is disabled.
    pub fn manage_addr(&self) -> Option<&str> {
        let addr = self.config.rpc.manage_addr.trim();
        (!addr.is_empty()).then_some(addr)
    }
}
