//! Resident notifications: templates, typed intents and the delivery worker
//! that drains the outbox over the channel session.

pub mod error;
pub mod intent;
pub mod service;
pub mod template;
pub mod worker;

pub use {
    error::{Error, Result},
    intent::{Decision, Notification},
    service::{NotificationService, Notifier},
    template::{FALLBACK_TEXT, TemplateKey, format_rupiah, render},
    worker::{CycleOutcome, CycleReport, DeliveryWorker, MAX_BATCH_SIZE},
};
