//! Contract between the session state machine and a concrete messaging
//! backend.

use {async_trait::async_trait, serde_json::Value, tokio::sync::mpsc};

use crate::{Result, state::LifecycleEvent};

/// Where a transport reports lifecycle callbacks for one connection attempt.
pub type LifecycleSender = mpsc::UnboundedSender<LifecycleEvent>;
pub type LifecycleReceiver = mpsc::UnboundedReceiver<LifecycleEvent>;

/// What the backend returned for an accepted message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReceipt {
    /// Backend message id, when it reports one.
    pub message_id: Option<String>,
    /// Raw backend response, kept for the delivery log.
    pub raw: Value,
}

/// A messaging backend the session drives.
///
/// Implementations never change session state themselves. They report what
/// happened through the [`LifecycleSender`] handed to [`connect`] and the
/// session folds those events in order.
///
/// [`connect`]: ChannelTransport::connect
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Begin a handshake. Returns once the backend accepted the request;
    /// progress arrives afterwards on `events`. Events raised by a
    /// superseded connection are ignored by the session.
    async fn connect(&self, events: LifecycleSender) -> Result<()>;

    /// Send a plain text message to a canonical address.
    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt>;

    /// Whether `address` is reachable on this network.
    async fn is_registered(&self, address: &str) -> Result<bool>;

    /// Stop the live connection, if any, keeping stored credentials so the
    /// next handshake can resume. Returns once the backend has stopped.
    async fn disconnect(&self) -> Result<()>;

    /// End the session on the network (unlinking this device) and stop the
    /// connection. Returns once the backend has finished, so credential
    /// files are no longer in use.
    async fn logout(&self) -> Result<()>;

    /// Delete stored credential material so the next handshake starts from
    /// scratch. Returns [`CredentialsBusy`](crate::Error::CredentialsBusy)
    /// when another process still holds the files.
    async fn discard_credentials(&self) -> Result<()>;
}
