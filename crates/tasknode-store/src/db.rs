use rusqlite::{types::Type, Connection, Row};
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Initialise the job schema in `conn`. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS crontab (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            name             TEXT    NOT NULL,
            command          TEXT    NOT NULL,
            dir              TEXT    NOT NULL DEFAULT '',
            user             TEXT    NOT NULL DEFAULT '',
            env              TEXT    NOT NULL DEFAULT '[]',   -- JSON array of K=V
            time_expr        TEXT    NOT NULL,
            timeout          INTEGER NOT NULL DEFAULT 0,      -- seconds, 0 = none
            timeout_trigger  TEXT    NOT NULL DEFAULT '[]',
            error_trigger    TEXT    NOT NULL DEFAULT '[]',
            notify_addrs     TEXT    NOT NULL DEFAULT '[]',
            status           TEXT    NOT NULL DEFAULT 'Unaudited',
            last_exec_time   INTEGER NOT NULL DEFAULT 0,
            next_exec_time   INTEGER NOT NULL DEFAULT 0,
            last_exec_status TEXT    NOT NULL DEFAULT '',
            last_exec_msg    TEXT    NOT NULL DEFAULT '',
            last_cost_time   REAL    NOT NULL DEFAULT 0,
            create_user_id   INTEGER NOT NULL DEFAULT 0,
            update_user_id   INTEGER NOT NULL DEFAULT 0,
            create_time      INTEGER NOT NULL,
            update_time      INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_crontab_status ON crontab (status);

        CREATE TABLE IF NOT EXISTS crontab_log (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            crontab_id   INTEGER NOT NULL,
            status       TEXT    NOT NULL,
            once         INTEGER NOT NULL DEFAULT 0,   -- 1 = manual run
            start_time   INTEGER NOT NULL,
            end_time     INTEGER NOT NULL,
            cost_time    REAL    NOT NULL,
            result       TEXT    NOT NULL DEFAULT '',
            exec_user_id INTEGER NOT NULL DEFAULT 0,
            create_time  INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_crontab_log_job ON crontab_log (crontab_id, start_time);

        CREATE TABLE IF NOT EXISTS daemon (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            name               TEXT    NOT NULL,
            command            TEXT    NOT NULL,
            dir                TEXT    NOT NULL DEFAULT '',
            user               TEXT    NOT NULL DEFAULT '',
            env                TEXT    NOT NULL DEFAULT '[]',
            failed_restart_num INTEGER NOT NULL DEFAULT 0,
            status             TEXT    NOT NULL DEFAULT 'Unaudited',
            failed             INTEGER NOT NULL DEFAULT 0,
            failed_reason      TEXT    NOT NULL DEFAULT '',
            failed_notice      TEXT    NOT NULL DEFAULT '[]',
            notify_addrs       TEXT    NOT NULL DEFAULT '[]',
            start_time         INTEGER NOT NULL DEFAULT 0,
            end_time           INTEGER NOT NULL DEFAULT 0,
            create_user_id     INTEGER NOT NULL DEFAULT 0,
            update_user_id     INTEGER NOT NULL DEFAULT 0,
            create_time        INTEGER NOT NULL,
            update_time        INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_daemon_status ON daemon (status, end_time);
        ",
    )?;
    Ok(())
}

/// `?,?,?` with `n` placeholders, for `IN (...)` clauses.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Decode a JSON text column.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode a text column through `FromStr`.
pub(crate) fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('crontab','crontab_log','daemon')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn placeholder_list() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?,?,?");
    }
}
