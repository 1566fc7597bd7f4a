//! # meterbus
//!
//! `meterbus` moves smart-meter telemetry over a topic-based pub/sub broker
//! and turns it into billing snapshots. Meters publish readings on
//! `meters/readings/{client}`; the event processor stores them, recomputes
//! the user's bill and publishes it on `meters/billing/{user}`.
//!
//! ## Core Modules
//!
//! - `routing`: topic pattern matching (`+`, `#`, shared groups) and the
//!   subscription registry that resolves handlers for a topic.
//! - `transport`: the session with the broker. Connect, reconnect with a
//!   fixed delay, re-assert subscriptions, acknowledged publishes.
//! - `client`: `Publisher` and `Subscriber` facades with pluggable codecs
//!   and fault-isolated dispatch.
//! - `processor`: the `EventProcessor` bridging readings and billing
//!   commands to the reading store and billing snapshots.
//! - `billing`: pure snapshot aggregation.
//! - `persistence`: the reading store collaborator (sled and in-memory).
//! - `notify`: the realtime broadcaster collaborator.
//! - `broker`: an in-memory development broker served over WebSockets.
//! - `config`: layered configuration from file and environment.
//! - `utils`: error types and logging setup.

pub mod billing;
pub mod broker;
pub mod client;
pub mod config;
pub mod notify;
pub mod persistence;
pub mod processor;
pub mod routing;
pub mod transport;
pub mod utils;
