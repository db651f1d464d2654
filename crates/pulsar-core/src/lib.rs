//! `pulsar-core` — configuration and shared error surface for the pulsar
//! timer service.
//!
//! Kept deliberately small: subsystem-specific errors live next to the
//! subsystem (see `pulsar-timers`), this crate only carries what every
//! embedder needs to wire the service up.

pub mod config;
pub mod error;

pub use config::{DatabaseConfig, DispatcherConfig, PulsarConfig, DEFAULT_LOOKAHEAD_DAYS};
pub use error::{CoreError, Result};
