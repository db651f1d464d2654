use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Timelike, Utc};
use pulsar_core::config::DispatcherConfig;
use serde_json::{Map, Value};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::bus::CompletionBus;
use crate::error::Result;
use crate::store::TimerStore;
use crate::types::TimerRecord;

/// Pause before restarting a dispatch pass after a transient store failure,
/// so a down store is polled instead of hammered.
const RETRY_PAUSE: std::time::Duration = std::time::Duration::from_secs(1);

/// Owns the single background wait for the nearest stored timer.
///
/// Cheaply cloneable; all clones share state through an `Arc`. The intended
/// wiring is one clone driving [`run`](TimerDispatcher::run) in a spawned
/// task while any number of callers invoke
/// [`schedule`](TimerDispatcher::schedule) concurrently:
///
/// ```ignore
/// let dispatcher = TimerDispatcher::new(store, bus, &config.dispatcher);
/// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
/// tokio::spawn(dispatcher.clone().run(shutdown_rx));
/// ```
#[derive(Clone)]
pub struct TimerDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TimerStore>,
    bus: Arc<CompletionBus>,
    /// Signals the loop that a nearer timer may have been stored. Carries a
    /// permit, so a wakeup sent while the loop is between awaits is not lost.
    wakeup: Notify,
    /// The timer the loop is currently sleeping towards, if any. Guarded by
    /// a plain mutex; never held across an await.
    current: Mutex<Option<PendingWait>>,
    /// How far ahead the loop pre-fetches stored timers.
    lookahead: Duration,
}

/// Identity and deadline of the in-flight wait — all `schedule` needs to
/// decide whether a new timer preempts it.
#[derive(Clone, Copy)]
struct PendingWait {
    id: i64,
    expires: DateTime<Utc>,
}

impl TimerDispatcher {
    pub fn new(
        store: Arc<dyn TimerStore>,
        bus: Arc<CompletionBus>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                wakeup: Notify::new(),
                current: Mutex::new(None),
                lookahead: Duration::days(config.lookahead_days),
            }),
        }
    }

    /// The bus completions are published on.
    pub fn bus(&self) -> Arc<CompletionBus> {
        Arc::clone(&self.inner.bus)
    }

    /// Schedule a fire-event for `when`, registered as of now.
    ///
    /// Delays of [`crate::types::SHORT_DELAY_CUTOFF_SECS`] or less skip the
    /// store: a spawned task sleeps out the remainder and publishes the
    /// completion directly. Longer delays are persisted; the returned record
    /// carries the generated row id. A `when` in the past is not rejected —
    /// the timer fires on the loop's next pass.
    ///
    /// Must be called from within a tokio runtime (the short-delay path
    /// spawns).
    pub fn schedule(
        &self,
        when: DateTime<Utc>,
        event: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<TimerRecord> {
        self.schedule_with_created(when, event, args, kwargs, Utc::now())
    }

    /// Like [`schedule`](TimerDispatcher::schedule), but with an explicit
    /// registration timestamp — used when elapsed-time displays should be
    /// anchored to an upstream moment, e.g. the message that asked for the
    /// reminder.
    pub fn schedule_with_created(
        &self,
        when: DateTime<Utc>,
        event: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        created: DateTime<Utc>,
    ) -> Result<TimerRecord> {
        // Whole-second granularity keeps stored deltas consistent.
        let when = truncate_to_second(when);
        let created = truncate_to_second(created);

        let mut record = TimerRecord::ephemeral(when, event, args, kwargs, Some(created));

        if record.is_short_delay() {
            debug!(event = %record.event, "short timer scheduled in-process");
            let bus = Arc::clone(&self.inner.bus);
            let short = record.clone();
            tokio::spawn(async move {
                sleep_until_deadline(short.expires).await;
                bus.publish(&short);
            });
            return Ok(record);
        }

        let id = self
            .inner
            .store
            .insert(&record.event, &record.extra(), when, created)?;
        record.id = Some(id);
        info!(timer_id = id, event = %record.event, delta = %record.human_delta(), "timer stored");

        // Wake the loop when this timer lands inside the prefetch window
        // while it is parked, or in front of the wait it is serving. The
        // current slot is only cleared/written by the loop, under the same
        // mutex, so this decision cannot tear.
        let current = self.inner.current.lock().expect("dispatcher state poisoned");
        let should_wake = match *current {
            Some(pending) => when < pending.expires,
            None => when - created <= self.inner.lookahead,
        };
        drop(current);

        if should_wake {
            self.inner.wakeup.notify_one();
        }

        Ok(record)
    }

    /// Drive the dispatch loop until `shutdown` flips to true (or its
    /// sender is dropped).
    ///
    /// Transient store failures abort the pass; the loop pauses briefly and
    /// starts over from a fresh query, indefinitely. Non-transient failures
    /// (corrupt stored rows) stop the loop — retrying would spin on the
    /// same row forever.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("timer dispatch loop started");
        loop {
            tokio::select! {
                res = self.dispatch_pass() => match res {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => {
                        warn!(error = %e, "dispatch pass failed; restarting");
                        tokio::time::sleep(RETRY_PAUSE).await;
                    }
                    Err(e) => {
                        error!(error = %e, "dispatch loop stopped on unrecoverable error");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("timer dispatch loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass: find the nearest stored timer, wait for its deadline, fire
    /// it. Returns early (without firing) when woken to retarget, so the
    /// caller always restarts from a fresh query.
    async fn dispatch_pass(&self) -> Result<()> {
        let inner = &self.inner;

        // A pass owns no wait yet. Clearing under the mutex means schedule()
        // can no longer match a stale pending entry and skip its wakeup.
        *inner.current.lock().expect("dispatcher state poisoned") = None;

        let cutoff = Utc::now() + inner.lookahead;
        let Some(timer) = inner.store.earliest_before(cutoff)? else {
            // Nothing stored inside the window. Park until schedule()
            // signals; a permit stored while we were querying wakes us
            // immediately.
            inner.wakeup.notified().await;
            return Ok(());
        };

        if let Some(id) = timer.id {
            *inner.current.lock().expect("dispatcher state poisoned") =
                Some(PendingWait {
                    id,
                    expires: timer.expires,
                });
            debug!(timer_id = id, event = %timer.event, "waiting on timer");
        }

        tokio::select! {
            _ = sleep_until_deadline(timer.expires) => {}
            _ = inner.wakeup.notified() => {
                // A nearer timer may exist now. The row we were serving is
                // still stored and will be found again.
                debug!(timer_id = ?timer.id, "pending wait preempted");
                return Ok(());
            }
        }

        self.fire(&timer)
    }

    /// Delete the fired row, then publish its completion. Delivery is
    /// at-most-once per fetch: once the row is gone, no restart can re-fire
    /// this id.
    fn fire(&self, timer: &TimerRecord) -> Result<()> {
        if let Some(id) = timer.id {
            self.inner.store.delete(id)?;
        }
        info!(timer_id = ?timer.id, event = %timer.event, "timer fired");
        self.inner.bus.publish(timer);
        Ok(())
    }
}

/// Sleep until a wall-clock deadline; returns immediately when it already
/// passed.
async fn sleep_until_deadline(when: DateTime<Utc>) {
    let now = Utc::now();
    if when <= now {
        return;
    }
    let remaining = (when - now).to_std().unwrap_or(std::time::Duration::ZERO);
    tokio::time::sleep(remaining).await;
}

fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap_or(t)
}
