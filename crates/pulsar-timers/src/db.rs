use rusqlite::Connection;

use crate::error::Result;

/// Initialise the timer schema in `conn`.
///
/// Creates the `timers` table (idempotent) and an index on `expires` so the
/// earliest-deadline query stays cheap with many pending timers.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS timers (
            id      INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            expires TEXT    NOT NULL,   -- ISO-8601 UTC deadline
            created TEXT    NOT NULL,   -- ISO-8601 UTC registration time
            event   TEXT    NOT NULL,
            extra   TEXT    NOT NULL DEFAULT '{}'  -- JSON: {\"args\": [...], \"kwargs\": {...}}
        ) STRICT;

        -- Earliest-deadline query: SELECT … WHERE expires < ?  ORDER BY expires
        CREATE INDEX IF NOT EXISTS idx_timers_expires ON timers (expires);
        ",
    )?;
    Ok(())
}
