use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RPC_LISTEN_ADDR: &str = "0.0.0.0:9901";
pub const DEFAULT_MANAGE_ADDR: &str = "127.0.0.1:9900";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_DISPATCH_CAPACITY: usize = 100;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 30_000;

/// Top-level config (tasknode.toml + TASKNODE_* env overrides).
///
/// Nested keys are addressed with a double underscore in the environment,
/// e.g. `TASKNODE_RPC__MANAGE_ADDR=10.0.0.2:9900`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskNodeConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Identity this agent reports to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_name")]
    pub name: String,
    /// Address the control plane dials to reach this node.
    #[serde(default = "default_node_address")]
    pub address: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            address: default_node_address(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_manage_addr")]
    pub manage_addr: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_rpc_listen_addr(),
            manage_addr: default_manage_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Root of the date-partitioned daemon logs: `<log_dir>/<date>/<id>.log`.
    #[serde(default = "default_daemon_log_dir")]
    pub log_dir: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_dir: default_daemon_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Captured output stored per run log is truncated to this many chars.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            max_output_chars: default_max_output_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            dispatch_capacity: default_dispatch_capacity(),
        }
    }
}

fn default_node_name() -> String {
    "tasknode".to_string()
}
fn default_node_address() -> String {
    "127.0.0.1:9901".to_string()
}
fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}
fn default_rpc_listen_addr() -> String {
    DEFAULT_RPC_LISTEN_ADDR.to_string()
}
fn default_manage_addr() -> String {
    DEFAULT_MANAGE_ADDR.to_string()
}
fn default_db_path() -> String {
    format!("{}/tasknode.db", home_dir())
}
fn default_daemon_log_dir() -> String {
    format!("{}/log/daemon", home_dir())
}
fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_dispatch_capacity() -> usize {
    DEFAULT_DISPATCH_CAPACITY
}

impl TaskNodeConfig {
    /// Load config from a TOML file with env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TaskNodeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TASKNODE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the agent.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.node.heartbeat_interval_secs == 0 {
            return Err(crate::error::CoreError::Config(
                "node.heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(crate::error::CoreError::Config(
                "scheduler.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.scheduler.dispatch_capacity == 0 {
            return Err(crate::error::CoreError::Config(
                "scheduler.dispatch_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn home_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.tasknode")
}

fn default_config_path() -> String {
    format!("{}/tasknode.toml", home_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = TaskNodeConfig::default();
        assert_eq!(cfg.rpc.listen_addr, DEFAULT_RPC_LISTEN_ADDR);
        assert_eq!(cfg.scheduler.poll_interval_ms, 200);
        assert_eq!(cfg.scheduler.dispatch_capacity, 100);
        assert!(cfg.database.path.ends_with("tasknode.db"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_reads_toml_and_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
name = "worker-7"
address = "10.0.0.7:9901"

[rpc]
manage_addr = "10.0.0.1:9900"

[daemon]
log_dir = "/var/log/tasknode/daemon"
"#
        )
        .unwrap();

        let cfg = TaskNodeConfig::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.node.name, "worker-7");
        assert_eq!(cfg.node.address, "10.0.0.7:9901");
        assert_eq!(cfg.node.heartbeat_interval_secs, DEFAULT_HEARTBEAT_INTERVAL_SECS);
        assert_eq!(cfg.rpc.manage_addr, "10.0.0.1:9900");
        assert_eq!(cfg.rpc.listen_addr, DEFAULT_RPC_LISTEN_ADDR);
        assert_eq!(cfg.daemon.log_dir, "/var/log/tasknode/daemon");
        assert_eq!(cfg.exec.max_output_chars, DEFAULT_MAX_OUTPUT_CHARS);
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\npoll_interval_ms = 0").unwrap();

        let err = TaskNodeConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
