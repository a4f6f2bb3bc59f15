//! Timed-job rows and their run log.

use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use tasknode_cron::calendar::unix_now;
use tracing::{debug, info};

use crate::{
    db::{json_column, parsed_column, placeholders},
    error::{Result, StoreError},
    types::{Crontab, CrontabDraft, CrontabLog, CrontabStatus, ExecStatus, LogFilter, Page, Pagination, RunRecord},
    Store,
};

const CRONTAB_COLUMNS: &str = "id, name, command, dir, user, env, time_expr, timeout,
     timeout_trigger, error_trigger, notify_addrs, status, last_exec_time, next_exec_time,
     last_exec_status, last_exec_msg, last_cost_time, create_user_id, update_user_id,
     create_time, update_time";

const LOG_COLUMNS: &str =
    "id, crontab_id, status, once, start_time, end_time, cost_time, result, exec_user_id, create_time";

fn crontab_from_row(row: &Row<'_>) -> rusqlite::Result<Crontab> {
    let last_exec_status: String = row.get(14)?;
    Ok(Crontab {
        id: row.get(0)?,
        name: row.get(1)?,
        command: row.get(2)?,
        dir: row.get(3)?,
        user: row.get(4)?,
        env: json_column(row, 5)?,
        time_expr: row.get(6)?,
        timeout: row.get(7)?,
        timeout_trigger: json_column(row, 8)?,
        error_trigger: json_column(row, 9)?,
        notify_addrs: json_column(row, 10)?,
        status: parsed_column(row, 11)?,
        last_exec_time: row.get(12)?,
        next_exec_time: row.get(13)?,
        last_exec_status: ExecStatus::from_column(&last_exec_status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, e.into())
        })?,
        last_exec_msg: row.get(15)?,
        last_cost_time: row.get(16)?,
        create_user_id: row.get(17)?,
        update_user_id: row.get(18)?,
        create_time: row.get(19)?,
        update_time: row.get(20)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<CrontabLog> {
    let status: String = row.get(2)?;
    let status = ExecStatus::from_column(&status)
        .and_then(|s| s.ok_or_else(|| "empty run status".to_string()))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?;
    Ok(CrontabLog {
        id: row.get(0)?,
        crontab_id: row.get(1)?,
        status,
        once: row.get::<_, i64>(3)? != 0,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        cost_time: row.get(6)?,
        result: row.get(7)?,
        exec_user_id: row.get(8)?,
        create_time: row.get(9)?,
    })
}

fn fetch_crontab(conn: &Connection, id: i64) -> Result<Option<Crontab>> {
    let sql = format!("SELECT {CRONTAB_COLUMNS} FROM crontab WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], crontab_from_row).optional()?)
}

/// Rows among `ids` whose status is one of `statuses` (any status when empty).
fn select_crontabs(
    conn: &Connection,
    ids: &[i64],
    statuses: &[CrontabStatus],
) -> Result<Vec<Crontab>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut sql = format!(
        "SELECT {CRONTAB_COLUMNS} FROM crontab WHERE id IN ({})",
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
        .query_map(params_from_iter(values), crontab_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl Store {
    /// Page through timed jobs, newest edits first. `keyword` matches
    /// anywhere in the name or command.
    pub fn list_crontabs(&self, keyword: &str, page: Pagination) -> Result<Page<Crontab>> {
        let conn = self.conn();
        let pattern = format!("%{keyword}%");
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM crontab WHERE (?1 = '' OR name LIKE ?2 OR command LIKE ?2)",
            params![keyword, pattern],
            |r| r.get(0),
        )?;
        let sql = format!(
            "SELECT {CRONTAB_COLUMNS} FROM crontab
             WHERE (?1 = '' OR name LIKE ?2 OR command LIKE ?2)
             ORDER BY update_time DESC, id DESC LIMIT ?3 OFFSET ?4"
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![keyword, pattern, page.limit(), page.offset()],
                crontab_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page { total, items })
    }

    /// Insert a new job in `Unaudited` status.
    pub fn add_crontab(&self, draft: &CrontabDraft, user_id: i64) -> Result<Crontab> {
        let conn = self.conn();
        let now = unix_now();
        conn.execute(
            "INSERT INTO crontab
             (name, command, dir, user, env, time_expr, timeout, timeout_trigger,
              error_trigger, notify_addrs, status, create_user_id, update_user_id,
              create_time, update_time)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?12,?13,?13)",
            params![
                draft.name,
                draft.command,
                draft.dir,
                draft.user,
                serde_json::to_string(&draft.env)?,
                draft.time_expr,
                draft.timeout,
                serde_json::to_string(&draft.timeout_trigger)?,
                serde_json::to_string(&draft.error_trigger)?,
                serde_json::to_string(&draft.notify_addrs)?,
                CrontabStatus::Unaudited.as_str(),
                user_id,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(crontab_id = id, name = %draft.name, "crontab added");
        fetch_crontab(&conn, id)?.ok_or(StoreError::NotFound { kind: "crontab", id })
    }

    pub fn find_crontab(&self, id: i64) -> Result<Option<Crontab>> {
        fetch_crontab(&self.conn(), id)
    }

    pub fn get_crontab(&self, id: i64) -> Result<Crontab> {
        self.find_crontab(id)?
            .ok_or(StoreError::NotFound { kind: "crontab", id })
    }

    /// Overwrite the editable fields and send the job back to review.
    pub fn edit_crontab(&self, id: i64, draft: &CrontabDraft, user_id: i64) -> Result<Crontab> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE crontab SET
                name = ?2, command = ?3, dir = ?4, user = ?5, env = ?6, time_expr = ?7,
                timeout = ?8, timeout_trigger = ?9, error_trigger = ?10, notify_addrs = ?11,
                status = ?12, next_exec_time = 0, update_user_id = ?13, update_time = ?14
             WHERE id = ?1",
            params![
                id,
                draft.name,
                draft.command,
                draft.dir,
                draft.user,
                serde_json::to_string(&draft.env)?,
                draft.time_expr,
                draft.timeout,
                serde_json::to_string(&draft.timeout_trigger)?,
                serde_json::to_string(&draft.error_trigger)?,
                serde_json::to_string(&draft.notify_addrs)?,
                CrontabStatus::Unaudited.as_str(),
                user_id,
                unix_now(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { kind: "crontab", id });
        }
        fetch_crontab(&conn, id)?.ok_or(StoreError::NotFound { kind: "crontab", id })
    }

    /// Move the `Unaudited` jobs among `ids` to `Ok`; returns the moved rows.
    pub fn audit_crontabs(&self, ids: &[i64], user_id: i64) -> Result<Vec<Crontab>> {
        let conn = self.conn();
        let pending = select_crontabs(&conn, ids, &[CrontabStatus::Unaudited])?;
        let now = unix_now();
        for job in &pending {
            conn.execute(
                "UPDATE crontab SET status = ?2, update_user_id = ?3, update_time = ?4 WHERE id = ?1",
                params![job.id, CrontabStatus::Ok.as_str(), user_id, now],
            )?;
        }
        let ids: Vec<i64> = pending.iter().map(|c| c.id).collect();
        select_crontabs(&conn, &ids, &[])
    }

    /// Rows among `ids` in one of `statuses`; an empty status list matches any.
    pub fn crontabs_by_ids(&self, ids: &[i64], statuses: &[CrontabStatus]) -> Result<Vec<Crontab>> {
        select_crontabs(&self.conn(), ids, statuses)
    }

    /// Every job currently in one of `statuses`.
    pub fn crontabs_in_status(&self, statuses: &[CrontabStatus]) -> Result<Vec<Crontab>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let sql = format!(
            "SELECT {CRONTAB_COLUMNS} FROM crontab WHERE status IN ({}) ORDER BY id",
            placeholders(statuses.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(statuses.iter().map(|s| s.as_str())), crontab_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Mark the job armed: status `Timing` with its next fire time.
    pub fn schedule_crontab(&self, id: i64, next_exec_time: i64) -> Result<()> {
        self.update_crontab(
            id,
            "UPDATE crontab SET status = ?2, next_exec_time = ?3 WHERE id = ?1",
            params![id, CrontabStatus::Timing.as_str(), next_exec_time],
        )
    }

    /// Record the next fire time without touching the status.
    pub fn set_next_exec_time(&self, id: i64, next_exec_time: i64) -> Result<()> {
        self.update_crontab(
            id,
            "UPDATE crontab SET next_exec_time = ?2 WHERE id = ?1",
            params![id, next_exec_time],
        )
    }

    /// Flip a scheduled row to `Running`. Returns `false` when the row is
    /// no longer `Timing`/`Running`, i.e. it was stopped or edited since the
    /// dispatch was queued.
    pub fn mark_crontab_running(&self, id: i64) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE crontab SET status = ?2 WHERE id = ?1 AND status IN (?3, ?2)",
            params![
                id,
                CrontabStatus::Running.as_str(),
                CrontabStatus::Timing.as_str()
            ],
        )?;
        Ok(n > 0)
    }

    /// Status `Stopped` with no next fire time.
    pub fn stop_crontab(&self, id: i64) -> Result<()> {
        self.update_crontab(
            id,
            "UPDATE crontab SET status = ?2, next_exec_time = 0 WHERE id = ?1",
            params![id, CrontabStatus::Stopped.as_str()],
        )
    }

    /// Write back a finished run. The status is only restored while the row
    /// is still `Running`, so a stop issued mid-run is not overwritten.
    pub fn finish_crontab_run(&self, id: i64, run: &RunRecord) -> Result<()> {
        self.update_crontab(
            id,
            "UPDATE crontab SET
                status = CASE WHEN status = ?2 THEN ?3 ELSE status END,
                last_exec_time = ?4, last_exec_status = ?5, last_exec_msg = ?6,
                last_cost_time = ?7
             WHERE id = ?1",
            params![
                id,
                CrontabStatus::Running.as_str(),
                run.status.as_str(),
                run.exec_time,
                run.exec_status.as_str(),
                run.message,
                run.cost_time,
            ],
        )
    }

    /// Delete the job row. Its run log is kept.
    pub fn delete_crontab(&self, id: i64) -> Result<bool> {
        let n = self.conn().execute("DELETE FROM crontab WHERE id = ?1", [id])?;
        if n > 0 {
            info!(crontab_id = id, "crontab deleted");
        }
        Ok(n > 0)
    }

    /// Append a run record; `log.id` is ignored.
    ///
    /// Returns the new row id, or `None` when the job row no longer exists.
    pub fn insert_crontab_log(&self, log: &CrontabLog) -> Result<Option<i64>> {
        let conn = self.conn();
        let n = conn.execute(
            "INSERT INTO crontab_log
             (crontab_id, status, once, start_time, end_time, cost_time, result,
              exec_user_id, create_time)
             SELECT ?1,?2,?3,?4,?5,?6,?7,?8,?9
             WHERE EXISTS (SELECT 1 FROM crontab WHERE id = ?1)",
            params![
                log.crontab_id,
                log.status.as_str(),
                i64::from(log.once),
                log.start_time,
                log.end_time,
                log.cost_time,
                log.result,
                log.exec_user_id,
                log.create_time,
            ],
        )?;
        if n == 0 {
            debug!(crontab_id = log.crontab_id, "run log dropped for deleted job");
            return Ok(None);
        }
        let id = conn.last_insert_rowid();
        debug!(crontab_id = log.crontab_id, log_id = id, status = %log.status, "run logged");
        Ok(Some(id))
    }

    /// Run records for one job, newest first.
    pub fn list_crontab_logs(&self, filter: &LogFilter) -> Result<Page<CrontabLog>> {
        let conn = self.conn();
        let status = filter.status.map(|s| s.as_str()).unwrap_or("");
        let clause = "crontab_id = ?1
             AND (?2 = 0 OR start_time >= ?2)
             AND (?3 = 0 OR start_time <= ?3)
             AND (?4 = '' OR status = ?4)";
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM crontab_log WHERE {clause}"),
            params![filter.crontab_id, filter.start_from, filter.start_until, status],
            |r| r.get(0),
        )?;
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM crontab_log WHERE {clause} ORDER BY id DESC LIMIT ?5 OFFSET ?6"
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![
                    filter.crontab_id,
                    filter.start_from,
                    filter.start_until,
                    status,
                    filter.page.limit(),
                    filter.page.offset(),
                ],
                log_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page { total, items })
    }

    /// Drop every run record of a job, returning how many were removed.
    pub fn clean_crontab_logs(&self, crontab_id: i64) -> Result<usize> {
        let n = self
            .conn()
            .execute("DELETE FROM crontab_log WHERE crontab_id = ?1", [crontab_id])?;
        info!(crontab_id, removed = n, "run log cleaned");
        Ok(n)
    }

    fn update_crontab(&self, id: i64, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let n = self.conn().execute(sql, params)?;
        if n == 0 {
            return Err(StoreError::NotFound { kind: "crontab", id });
        }
        Ok(())
    }
}
