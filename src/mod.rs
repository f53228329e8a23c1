//! Supervision of cloud-hypervisor style VMMs.
//!
//! A [`vm::Monitor`] launches one VMM process per instance, talks to it over
//! its API socket and tears it down again. Operations that change an
//! instance are serialized through the job slot in
//! [`domain::instance`]; [`lifecycle`] wraps the monitor calls in jobs.

pub mod config;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod net;
pub mod vm;

pub use error::{ConfigError, Error, JobError, Result, TransportError};
