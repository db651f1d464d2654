use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::error::Result;

/// Delays at or below this many seconds never touch the store: the timer is
/// fired from an in-process sleep task instead.
pub const SHORT_DELAY_CUTOFF_SECS: i64 = 60;

/// One scheduled fire-event: a UTC deadline plus the payload forwarded to
/// whoever subscribed to its completion tag.
#[derive(Debug, Clone)]
pub struct TimerRecord {
    /// Store row id. `None` for a short-delay timer that was never persisted.
    pub id: Option<i64>,
    /// Event tag; completions are published under `"{event}_complete"`.
    pub event: String,
    /// Positional payload values.
    pub args: Vec<Value>,
    /// Named payload values.
    pub kwargs: Map<String, Value>,
    /// Registration time (UTC). Feeds the short-delay classification and
    /// elapsed-time displays.
    pub created: DateTime<Utc>,
    /// Absolute UTC deadline.
    pub expires: DateTime<Utc>,
}

impl TimerRecord {
    /// Build a never-persisted record (`id = None`).
    ///
    /// `created` defaults to the current time; callers pass `Some(..)` when
    /// they want displays anchored to an upstream moment, e.g. the message
    /// that asked for the reminder.
    pub fn ephemeral(
        expires: DateTime<Utc>,
        event: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        created: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: None,
            event: event.into(),
            args,
            kwargs,
            created: created.unwrap_or_else(Utc::now),
            expires,
        }
    }

    /// Rebuild a record from its stored columns, decoding the `extra` JSON
    /// document. Missing `args`/`kwargs` keys default to empty.
    pub(crate) fn from_stored(
        id: i64,
        event: String,
        extra_json: &str,
        expires: DateTime<Utc>,
        created: DateTime<Utc>,
    ) -> Result<Self> {
        let extra: Value = serde_json::from_str(extra_json)?;
        let args = match extra.get("args") {
            Some(Value::Array(a)) => a.clone(),
            _ => Vec::new(),
        };
        let kwargs = match extra.get("kwargs") {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        };
        Ok(Self {
            id: Some(id),
            event,
            args,
            kwargs,
            created,
            expires,
        })
    }

    /// The `extra` column document: `{"args": [...], "kwargs": {...}}`.
    pub fn extra(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("args".to_string(), Value::Array(self.args.clone()));
        doc.insert("kwargs".to_string(), Value::Object(self.kwargs.clone()));
        Value::Object(doc)
    }

    /// True when the delay between registration and deadline is small
    /// enough to skip persistence.
    pub fn is_short_delay(&self) -> bool {
        self.expires - self.created <= Duration::seconds(SHORT_DELAY_CUTOFF_SECS)
    }

    /// The pub/sub key this timer fires under.
    pub fn completion_tag(&self) -> String {
        format!("{}_complete", self.event)
    }

    /// Coarse human-readable rendering of the full delay ("3 days").
    /// Presentational only.
    pub fn human_delta(&self) -> String {
        format_coarse_duration(self.expires - self.created)
    }
}

/// Two records are the same timer only when both carry a store id and the
/// ids match. An ephemeral record has no identity and equals nothing.
impl PartialEq for TimerRecord {
    fn eq(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Render a duration as its single largest whole unit.
///
/// Negative durations clamp to "0 seconds". The unit is pluralised the
/// plain English way ("1 hour", "2 hours").
pub fn format_coarse_duration(delta: Duration) -> String {
    let secs = delta.num_seconds().max(0);
    let (count, unit) = if secs >= 86_400 {
        (secs / 86_400, "day")
    } else if secs >= 3_600 {
        (secs / 3_600, "hour")
    } else if secs >= 60 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}
