//! Daemon-job rows.

use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use tasknode_cron::calendar::unix_now;
use tracing::info;

use crate::{
    db::{json_column, parsed_column, placeholders},
    error::{Result, StoreError},
    types::{Daemon, DaemonDraft, DaemonStatus, Page, Pagination},
    Store,
};

const DAEMON_COLUMNS: &str = "id, name, command, dir, user, env, failed_restart_num, status,
     failed, failed_reason, failed_notice, notify_addrs, start_time, end_time,
     create_user_id, update_user_id, create_time, update_time";

fn daemon_from_row(row: &Row<'_>) -> rusqlite::Result<Daemon> {
    Ok(Daemon {
        id: row.get(0)?,
        name: row.get(1)?,
        command: row.get(2)?,
        dir: row.get(3)?,
        user: row.get(4)?,
        env: json_column(row, 5)?,
        failed_restart_num: row.get(6)?,
        status: parsed_column(row, 7)?,
        failed: row.get::<_, i64>(8)? != 0,
        failed_reason: row.get(9)?,
        failed_notice: json_column(row, 10)?,
        notify_addrs: json_column(row, 11)?,
        start_time: row.get(12)?,
        end_time: row.get(13)?,
        create_user_id: row.get(14)?,
        update_user_id: row.get(15)?,
        create_time: row.get(16)?,
        update_time: row.get(17)?,
    })
}

fn fetch_daemon(conn: &Connection, id: i64) -> Result<Option<Daemon>> {
    let sql = format!("SELECT {DAEMON_COLUMNS} FROM daemon WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], daemon_from_row).optional()?)
}

fn select_daemons(conn: &Connection, ids: &[i64], statuses: &[DaemonStatus]) -> Result<Vec<Daemon>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut sql = format!(
        "SELECT {DAEMON_COLUMNS} FROM daemon WHERE id IN ({})",
        placeholders(ids.len())
    );
    let mut values: Vec<Value> = ids.iter().map(|&id| Value::Integer(id)).collect();
    if !statuses.is_empty() {
        sql.push_str(&format!(" AND status IN ({})", placeholders(statuses.len())));
        values.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), daemon_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl Store {
    pub fn list_daemons(&self, keyword: &str, page: Pagination) -> Result<Page<Daemon>> {
        let conn = self.conn();
        let pattern = format!("%{keyword}%");
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM daemon WHERE (?1 = '' OR name LIKE ?2 OR command LIKE ?2)",
            params![keyword, pattern],
            |r| r.get(0),
        )?;
        let sql = format!(
            "SELECT {DAEMON_COLUMNS} FROM daemon
             WHERE (?1 = '' OR name LIKE ?2 OR command LIKE ?2)
             ORDER BY update_time DESC, id DESC LIMIT ?3 OFFSET ?4"
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![keyword, pattern, page.limit(), page.offset()],
                daemon_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page { total, items })
    }

    pub fn add_daemon(&self, draft: &DaemonDraft, user_id: i64) -> Result<Daemon> {
        let conn = self.conn();
        let now = unix_now();
        conn.execute(
            "INSERT INTO daemon
             (name, command, dir, user, env, failed_restart_num, status, failed_notice,
              notify_addrs, create_user_id, update_user_id, create_time, update_time)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?10,?11,?11)",
            params![
                draft.name,
                draft.command,
                draft.dir,
                draft.user,
                serde_json::to_string(&draft.env)?,
                draft.failed_restart_num,
                DaemonStatus::Unaudited.as_str(),
                serde_json::to_string(&draft.failed_notice)?,
                serde_json::to_string(&draft.notify_addrs)?,
                user_id,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(daemon_id = id, name = %draft.name, "daemon added");
        fetch_daemon(&conn, id)?.ok_or(StoreError::NotFound { kind: "daemon", id })
    }

    pub fn find_daemon(&self, id: i64) -> Result<Option<Daemon>> {
        fetch_daemon(&self.conn(), id)
    }

    pub fn get_daemon(&self, id: i64) -> Result<Daemon> {
        self.find_daemon(id)?
            .ok_or(StoreError::NotFound { kind: "daemon", id })
    }

    /// Overwrite the editable fields, clear run state and send the job back
    /// to review.
    pub fn edit_daemon(&self, id: i64, draft: &DaemonDraft, user_id: i64) -> Result<Daemon> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE daemon SET
                name = ?2, command = ?3, dir = ?4, user = ?5, env = ?6,
                failed_restart_num = ?7, failed_notice = ?8, notify_addrs = ?9,
                status = ?10, start_time = 0, end_time = 0, failed = 0, failed_reason = '',
                update_user_id = ?11, update_time = ?12
             WHERE id = ?1",
            params![
                id,
                draft.name,
                draft.command,
                draft.dir,
                draft.user,
                serde_json::to_string(&draft.env)?,
                draft.failed_restart_num,
                serde_json::to_string(&draft.failed_notice)?,
                serde_json::to_string(&draft.notify_addrs)?,
                DaemonStatus::Unaudited.as_str(),
                user_id,
                unix_now(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { kind: "daemon", id });
        }
        fetch_daemon(&conn, id)?.ok_or(StoreError::NotFound { kind: "daemon", id })
    }

    pub fn audit_daemons(&self, ids: &[i64], user_id: i64) -> Result<Vec<Daemon>> {
        let conn = self.conn();
        let pending = select_daemons(&conn, ids, &[DaemonStatus::Unaudited])?;
        let now = unix_now();
        for daemon in &pending {
            conn.execute(
                "UPDATE daemon SET status = ?2, update_user_id = ?3, update_time = ?4 WHERE id = ?1",
                params![daemon.id, DaemonStatus::Ok.as_str(), user_id, now],
            )?;
        }
        let ids: Vec<i64> = pending.iter().map(|d| d.id).collect();
        select_daemons(&conn, &ids, &[])
    }

    pub fn daemons_by_ids(&self, ids: &[i64], statuses: &[DaemonStatus]) -> Result<Vec<Daemon>> {
        select_daemons(&self.conn(), ids, statuses)
    }

    /// `Stopped` daemons whose loop ended at or after `since`: candidates for
    /// restart after an agent crash.
    pub fn daemons_stopped_since(&self, since: i64) -> Result<Vec<Daemon>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {DAEMON_COLUMNS} FROM daemon WHERE status = ?1 AND end_time > ?2 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![DaemonStatus::Stopped.as_str(), since], daemon_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// A supervision loop has (re)started the process.
    pub fn mark_daemon_running(&self, id: i64, start_time: i64) -> Result<()> {
        self.update_daemon(
            id,
            "UPDATE daemon SET status = ?2, start_time = ?3, failed = 0, failed_reason = ''
             WHERE id = ?1",
            params![id, DaemonStatus::Running.as_str(), start_time],
        )
    }

    /// A supervision loop has ended for good.
    pub fn mark_daemon_failed(&self, id: i64, reason: &str, end_time: i64) -> Result<()> {
        self.update_daemon(
            id,
            "UPDATE daemon SET status = ?2, failed = 1, failed_reason = ?3, end_time = ?4
             WHERE id = ?1",
            params![id, DaemonStatus::Stopped.as_str(), reason, end_time],
        )
    }

    pub fn set_daemon_status(&self, id: i64, status: DaemonStatus) -> Result<()> {
        self.update_daemon(
            id,
            "UPDATE daemon SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )
    }

    pub fn delete_daemon(&self, id: i64) -> Result<bool> {
        let n = self.conn().execute("DELETE FROM daemon WHERE id = ?1", [id])?;
        if n > 0 {
            info!(daemon_id = id, "daemon deleted");
        }
        Ok(n > 0)
    }

    fn update_daemon(&self, id: i64, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let n = self.conn().execute(sql, params)?;
        if n == 0 {
            return Err(StoreError::NotFound { kind: "daemon", id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggerAction;

    fn draft(name: &str) -> DaemonDraft {
        DaemonDraft {
            name: name.to_string(),
            command: "sleep 1000".to_string(),
            failed_restart_num: 3,
            failed_notice: vec![TriggerAction::NotifyExternal],
            notify_addrs: vec!["https://hooks.example/a".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn add_get_and_list() {
        let store = Store::open_in_memory().unwrap();
        let d = store.add_daemon(&draft("worker"), 5).unwrap();
        assert_eq!(d.status, DaemonStatus::Unaudited);
        assert_eq!(d.failed_restart_num, 3);
        assert_eq!(store.get_daemon(d.id).unwrap(), d);

        store.add_daemon(&draft("indexer"), 5).unwrap();
        let page = store.list_daemons("work", Pagination::default()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "worker");
    }

    #[test]
    fn run_state_transitions() {
        let store = Store::open_in_memory().unwrap();
        let d = store.add_daemon(&draft("worker"), 1).unwrap();

        store.mark_daemon_running(d.id, 1_000).unwrap();
        let row = store.get_daemon(d.id).unwrap();
        assert_eq!(row.status, DaemonStatus::Running);
        assert_eq!(row.start_time, 1_000);

        store.mark_daemon_failed(d.id, "script error", 1_050).unwrap();
        let row = store.get_daemon(d.id).unwrap();
        assert_eq!(row.status, DaemonStatus::Stopped);
        assert!(row.failed);
        assert_eq!(row.failed_reason, "script error");
        assert_eq!(row.end_time, 1_050);

        assert_eq!(store.daemons_stopped_since(1_040).unwrap().len(), 1);
        assert!(store.daemons_stopped_since(1_050).unwrap().is_empty());
    }

    #[test]
    fn edit_clears_failure() {
        let store = Store::open_in_memory().unwrap();
        let d = store.add_daemon(&draft("worker"), 1).unwrap();
        store.mark_daemon_failed(d.id, "boom", 10).unwrap();

        let edited = store.edit_daemon(d.id, &draft("worker2"), 2).unwrap();
        assert_eq!(edited.status, DaemonStatus::Unaudited);
        assert!(!edited.failed);
        assert_eq!(edited.failed_reason, "");
        assert_eq!(edited.end_time, 0);
        assert_eq!(edited.name, "worker2");
    }

    #[test]
    fn audit_and_status_filter() {
        let store = Store::open_in_memory().unwrap();
        let a = store.add_daemon(&draft("a"), 1).unwrap();
        let b = store.add_daemon(&draft("b"), 1).unwrap();
        store.set_daemon_status(b.id, DaemonStatus::Running).unwrap();

        let audited = store.audit_daemons(&[a.id, b.id], 1).unwrap();
        assert_eq!(audited.len(), 1);
        assert_eq!(audited[0].status, DaemonStatus::Ok);

        let startable = store
            .daemons_by_ids(&[a.id, b.id], &[DaemonStatus::Ok, DaemonStatus::Stopped])
            .unwrap();
        assert_eq!(startable.len(), 1);
        assert_eq!(startable[0].id, a.id);

        assert!(store.delete_daemon(a.id).unwrap());
        assert_eq!(store.get_daemon(a.id).unwrap_err().code(), "NOT_FOUND");
    }
}
