//! `pulsar-timers` — persisted delayed-timer dispatch with SQLite storage.
//!
//! # Overview
//!
//! Callers hand [`dispatch::TimerDispatcher::schedule`] an absolute UTC
//! deadline, an event tag and a JSON payload. The dispatcher keeps at most
//! one in-flight wait for the nearest stored timer; when the deadline
//! arrives it deletes the row and publishes the record on the
//! [`bus::CompletionBus`] under `"{event}_complete"`, where consumers
//! (mute expiry, reminder delivery, scheduled drops) have subscribed.
//!
//! # Two kinds of timer
//!
//! | Kind      | Delay        | Storage                                   |
//! |-----------|--------------|-------------------------------------------|
//! | ephemeral | ≤ 60 seconds | none — fired from an in-process sleep task |
//! | durable   | > 60 seconds | one row in the `timers` table              |
//!
//! Durable timers survive restarts and fire late rather than never; an
//! ephemeral timer dies with the process. Scheduling a durable timer that
//! expires before the one currently being waited on wakes the loop so it
//! retargets immediately.

pub mod bus;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod store;
pub mod types;

pub use bus::CompletionBus;
pub use dispatch::TimerDispatcher;
pub use error::{Result, TimerError};
pub use store::{SqliteTimerStore, TimerStore};
pub use types::{TimerRecord, SHORT_DELAY_CUTOFF_SECS};
