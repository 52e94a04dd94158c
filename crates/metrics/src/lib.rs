//! Metrics collection and export for rukun.
//!
//! All crates record through the `metrics` facade macros re-exported here.
//! Nothing is collected until [`init_metrics`] installs a recorder; with the
//! `prometheus` feature that recorder also serves `/metrics` over HTTP.
//!
//! ```rust,ignore
//! use rukun_metrics::{counter, outbox};
//!
//! counter!(outbox::ENQUEUED_TOTAL, "template" => key).increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
