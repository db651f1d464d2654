use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, TimerError};
use crate::types::TimerRecord;

/// Durable storage contract for long-delay timers.
///
/// The dispatcher needs exactly three operations. Keeping them behind a
/// trait lets tests stand in a failing store to exercise loop recovery.
pub trait TimerStore: Send + Sync {
    /// Insert a timer row, returning the generated id.
    fn insert(
        &self,
        event: &str,
        extra: &Value,
        expires: DateTime<Utc>,
        created: DateTime<Utc>,
    ) -> Result<i64>;

    /// Delete a fired timer row. Deleting an id that no longer exists is a
    /// no-op, so a concurrent deleter cannot wedge the dispatch loop.
    fn delete(&self, id: i64) -> Result<()>;

    /// The single earliest timer expiring strictly before `cutoff`, if any.
    fn earliest_before(&self, cutoff: DateTime<Utc>) -> Result<Option<TimerRecord>>;
}

/// SQLite-backed store.
///
/// The connection lives behind a mutex so the dispatch loop and concurrent
/// `schedule` callers can share one handle. Timestamps are stored as
/// RFC 3339 TEXT; second-granularity values compare correctly as strings.
pub struct SqliteTimerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTimerStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl TimerStore for SqliteTimerStore {
    fn insert(
        &self,
        event: &str,
        extra: &Value,
        expires: DateTime<Utc>,
        created: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().expect("timer store poisoned");
        conn.execute(
            "INSERT INTO timers (event, extra, expires, created) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                event,
                extra.to_string(),
                expires.to_rfc3339(),
                created.to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("timer store poisoned");
        conn.execute("DELETE FROM timers WHERE id = ?1", [id])?;
        Ok(())
    }

    fn earliest_before(&self, cutoff: DateTime<Utc>) -> Result<Option<TimerRecord>> {
        let conn = self.conn.lock().expect("timer store poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT id, event, extra, expires, created FROM timers
             WHERE expires < ?1 ORDER BY expires LIMIT 1",
        )?;

        let row = stmt
            .query_row([cutoff.to_rfc3339()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,    // id
                    row.get::<_, String>(1)?, // event
                    row.get::<_, String>(2)?, // extra JSON
                    row.get::<_, String>(3)?, // expires
                    row.get::<_, String>(4)?, // created
                ))
            })
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, event, extra, expires, created)) => {
                let expires = parse_ts("expires", &expires)?;
                let created = parse_ts("created", &created)?;
                Ok(Some(TimerRecord::from_stored(
                    id, event, &extra, expires, created,
                )?))
            }
        }
    }
}

fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimerError::CorruptTimestamp {
            column,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn open_store() -> SqliteTimerStore {
        let conn = Connection::open_in_memory().expect("open failed");
        SqliteTimerStore::new(conn).expect("init failed")
    }

    #[test]
    fn insert_then_fetch_earliest() {
        let store = open_store();
        let now = Utc::now();

        let id = store
            .insert(
                "mute",
                &json!({"args": [111, 222], "kwargs": {}}),
                now + Duration::hours(2),
                now,
            )
            .expect("insert failed");

        let fetched = store
            .earliest_before(now + Duration::days(40))
            .expect("query failed")
            .expect("no row");
        assert_eq!(fetched.id, Some(id));
        assert_eq!(fetched.event, "mute");
        assert_eq!(fetched.args, vec![json!(111), json!(222)]);
    }

    #[test]
    fn earliest_prefers_the_nearest_deadline() {
        let store = open_store();
        let now = Utc::now();
        let extra = json!({"args": [], "kwargs": {}});

        store
            .insert("later", &extra, now + Duration::hours(5), now)
            .expect("insert failed");
        let near = store
            .insert("sooner", &extra, now + Duration::hours(1), now)
            .expect("insert failed");

        let fetched = store
            .earliest_before(now + Duration::days(40))
            .expect("query failed")
            .expect("no row");
        assert_eq!(fetched.id, Some(near));
        assert_eq!(fetched.event, "sooner");
    }

    #[test]
    fn cutoff_excludes_far_timers() {
        let store = open_store();
        let now = Utc::now();

        store
            .insert(
                "distant",
                &json!({"args": [], "kwargs": {}}),
                now + Duration::days(60),
                now,
            )
            .expect("insert failed");

        assert!(store
            .earliest_before(now + Duration::days(40))
            .expect("query failed")
            .is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let store = open_store();
        let now = Utc::now();
        let id = store
            .insert(
                "mute",
                &json!({"args": [], "kwargs": {}}),
                now + Duration::hours(1),
                now,
            )
            .expect("insert failed");

        store.delete(id).expect("first delete failed");
        store.delete(id).expect("second delete should be a no-op");
        assert!(store
            .earliest_before(now + Duration::days(40))
            .expect("query failed")
            .is_none());
    }

    #[test]
    fn corrupt_timestamp_surfaces_as_such() {
        let store = open_store();
        {
            let conn = store.conn.lock().expect("poisoned");
            conn.execute(
                "INSERT INTO timers (event, extra, expires, created)
                 VALUES ('x', '{}', '2020-13-45T99:99:99+00:00', '2020-13-45T99:99:99+00:00')",
                [],
            )
            .expect("raw insert failed");
        }

        let err = store
            .earliest_before(Utc::now() + Duration::days(40))
            .unwrap_err();
        assert!(matches!(err, TimerError::CorruptTimestamp { .. }));
        assert!(!err.is_transient());
    }
}
