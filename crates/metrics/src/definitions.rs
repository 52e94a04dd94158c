//! Metric name and label definitions.
//!
//! Every metric rukun emits is named here so dashboards have one place to
//! look.

/// Outbox store metrics
pub mod outbox {
    /// Entries accepted into the outbox
    pub const ENQUEUED_TOTAL: &str = "rukun_outbox_enqueued_total";
    /// Enqueue requests dropped because the address normalized to nothing
    pub const DECLINED_TOTAL: &str = "rukun_outbox_declined_total";
    /// FAILED entries moved back to PENDING by an operator
    pub const RETRIED_TOTAL: &str = "rukun_outbox_retried_total";
    /// SENDING entries found at startup and moved to FAILED
    pub const RECOVERED_TOTAL: &str = "rukun_outbox_recovered_total";
}

/// Delivery worker metrics
pub mod worker {
    /// Cycles that ran to completion
    pub const CYCLES_TOTAL: &str = "rukun_worker_cycles_total";
    /// Cycles skipped because the channel was not ready
    pub const CYCLES_DEFERRED_TOTAL: &str = "rukun_worker_cycles_deferred_total";
    /// Cycles aborted by a store fault
    pub const CYCLES_ABORTED_TOTAL: &str = "rukun_worker_cycles_aborted_total";
    /// Messages delivered
    pub const MESSAGES_SENT_TOTAL: &str = "rukun_worker_messages_sent_total";
    /// Messages whose delivery attempt failed
    pub const MESSAGES_FAILED_TOTAL: &str = "rukun_worker_messages_failed_total";
    /// Render + lookup + send time for a single message, in seconds
    pub const DELIVERY_DURATION_SECONDS: &str = "rukun_worker_delivery_duration_seconds";
}

/// Channel session metrics
pub mod channel {
    /// State transitions applied, labelled by target state
    pub const TRANSITIONS_TOTAL: &str = "rukun_channel_transitions_total";
    /// Current state as an ordinal (0 = DISCONNECTED … 5 = AUTH_FAILURE)
    pub const STATE: &str = "rukun_channel_state";
    /// Handshakes started by the reconnect supervisor
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "rukun_channel_reconnect_attempts_total";
    /// Sends or lookups that hit the transport timeout
    pub const TIMEOUTS_TOTAL: &str = "rukun_channel_timeouts_total";
}

/// Common label keys
pub mod labels {
    pub const STATE: &str = "state";
    pub const TEMPLATE: &str = "template";
    pub const REASON: &str = "reason";
    pub const OPERATION: &str = "operation";
}

/// Histogram buckets
pub mod buckets {
    /// Per-message delivery, 10ms to 60s (send timeout upper bound)
    pub const DELIVERY_DURATION: &[f64] = &[
        0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
}
