use rusqlite::params;

use crate::{
    error::Result,
    types::{CrontabStatus, DaemonStatus, ExecStatus, NodeCounts},
    Store,
};

impl Store {
    /// Job counters for the heartbeat.
    pub fn node_counts(&self) -> Result<NodeCounts> {
        let conn = self.conn();
        let counts = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM crontab),
                (SELECT COUNT(*) FROM crontab WHERE status = ?1),
                (SELECT COUNT(*) FROM crontab WHERE last_exec_status = ?2 AND status IN (?3, ?4)),
                (SELECT COUNT(*) FROM daemon),
                (SELECT COUNT(*) FROM daemon WHERE status = ?5),
                (SELECT COUNT(*) FROM daemon WHERE failed = 1)",
            params![
                CrontabStatus::Unaudited.as_str(),
                ExecStatus::Error.as_str(),
                CrontabStatus::Timing.as_str(),
                CrontabStatus::Running.as_str(),
                DaemonStatus::Unaudited.as_str(),
            ],
            |r| {
                Ok(NodeCounts {
                    crontab_num: r.get(0)?,
                    audit_crontab_num: r.get(1)?,
                    fail_crontab_num: r.get(2)?,
                    daemon_num: r.get(3)?,
                    audit_daemon_num: r.get(4)?,
                    fail_daemon_num: r.get(5)?,
                })
            },
        )?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrontabDraft, DaemonDraft, RunRecord};

    #[test]
    fn counts_reflect_rows() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.node_counts().unwrap(), NodeCounts::default());

        let draft = CrontabDraft {
            name: "a".into(),
            command: "false".into(),
            time_expr: "0 * * * * *".into(),
            ..Default::default()
        };
        let a = store.add_crontab(&draft, 1).unwrap();
        store.add_crontab(&draft, 1).unwrap();
        store.schedule_crontab(a.id, 100).unwrap();
        assert!(store.mark_crontab_running(a.id).unwrap());
        store
            .finish_crontab_run(
                a.id,
                &RunRecord {
                    status: CrontabStatus::Timing,
                    exec_time: 1,
                    exec_status: ExecStatus::Error,
                    message: "exit status: 1".into(),
                    cost_time: 0.01,
                },
            )
            .unwrap();

        let d = store
            .add_daemon(
                &DaemonDraft {
                    name: "d".into(),
                    command: "false".into(),
                    ..Default::default()
                },
                1,
            )
            .unwrap();
        store.mark_daemon_failed(d.id, "script error", 5).unwrap();

        let counts = store.node_counts().unwrap();
        assert_eq!(counts.crontab_num, 2);
        assert_eq!(counts.audit_crontab_num, 1);
        assert_eq!(counts.fail_crontab_num, 1);
        assert_eq!(counts.daemon_num, 1);
        assert_eq!(counts.audit_daemon_num, 0);
        assert_eq!(counts.fail_daemon_num, 1);
    }
}
