//! Geotrail - a transparent reverse proxy with geolocated access logs
//!
//! Every request is forwarded to a fixed upstream. Off the response path,
//! the caller's address is resolved against an in-memory IP range table and
//! an access-log entry is written to the database.
//!
//! # Architecture
//! - `services::geoip`: IP range dataset, range table and resolver
//! - `services::forwarder`: upstream forwarding
//! - `analytics`: request events, bounded dispatcher and sink trait
//! - `storage`: SeaORM access-log storage
//! - `api`: telemetry middleware and proxy handler
//! - `config`: Configuration management
//! - `runtime`: Application lifecycle and execution modes
//! - `system`: Logging setup

pub mod analytics;
pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod system;
pub mod utils;
