// Method names, `"Service.Method"`.

// control plane, consumed by the agent
pub const PING: &str = "Serve.Ping";
pub const SYNC: &str = "Serve.Sync";
pub const DING_TALK_NOTICE: &str = "Serve.DingTalkNotice";

// timed jobs, served by the agent
pub const CRONTAB_LIST: &str = "CrontabServe.List";
pub const CRONTAB_ADD: &str = "CrontabServe.Add";
pub const CRONTAB_GET: &str = "CrontabServe.Get";
pub const CRONTAB_EDIT: &str = "CrontabServe.Edit";
pub const CRONTAB_AUDIT: &str = "CrontabServe.Audit";
pub const CRONTAB_START: &str = "CrontabServe.Start";
pub const CRONTAB_STOP: &str = "CrontabServe.Stop";
pub const CRONTAB_DEL: &str = "CrontabServe.Del";
pub const CRONTAB_EXEC: &str = "CrontabServe.Exec";
pub const CRONTAB_KILL: &str = "CrontabServe.Kill";
pub const CRONTAB_LOG: &str = "CrontabServe.Log";
pub const CRONTAB_CLEAN: &str = "CrontabServe.Clean";

// daemon jobs, served by the agent
pub const DAEMON_LIST: &str = "DaemonServe.List";
pub const DAEMON_ADD: &str = "DaemonServe.Add";
pub const DAEMON_GET: &str = "DaemonServe.Get";
pub const DAEMON_EDIT: &str = "DaemonServe.Edit";
pub const DAEMON_AUDIT: &str = "DaemonServe.Audit";
pub const DAEMON_START: &str = "DaemonServe.Start";
pub const DAEMON_STOP: &str = "DaemonServe.Stop";
pub const DAEMON_DEL: &str = "DaemonServe.Del";
pub const DAEMON_LOG: &str = "DaemonServe.Log";

/// Split `"Service.Method"` into its two halves.
pub fn split(full: &str) -> Option<(&str, &str)> {
    full.split_once('.')
        .filter(|(service, method)| !service.is_empty() && !method.is_empty())
}
