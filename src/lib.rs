//! Availability and booking scheduler.
//!
//! Admins publish open windows, coaches book pieces of them, and every
//! client derives the still-free time from the same pure calculation. The
//! library holds the core (model, free-segment math, validation, per-role
//! projection, pull-based sync) and the adapters the server binary wires
//! together: a WAL-backed store, a JSON person directory and a Postgres
//! wire front end.

pub mod auth;
pub mod compactor;
pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod ports;
pub mod projection;
pub mod scheduler;
pub mod sql;
pub mod sync;
pub mod tls;
pub mod wal;
pub mod wire;
