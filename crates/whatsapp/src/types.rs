//! JSON messages exchanged with the WhatsApp Web sidecar.
//!
//! Every frame is a JSON object tagged by `type`. Requests that expect an
//! answer carry a `request_id`; the sidecar echoes it on the result.

use {
    rukun_channels::LifecycleEvent,
    serde::{Deserialize, Serialize},
};

/// Gateway → sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayRequest {
    /// Start (or resume) the client for `session`, storing credentials under
    /// `auth_dir`.
    Login { session: String, auth_dir: String },
    /// Destroy the client for `session`. Stored credentials stay on disk and
    /// the device stays linked.
    Stop { request_id: String, session: String },
    /// Log `session` out of WhatsApp (unlinking the device), then destroy the
    /// client. Answered once the credential files are released.
    Logout { request_id: String, session: String },
    SendMessage {
        request_id: String,
        session: String,
        /// Chat id, `<digits>@c.us`.
        to: String,
        text: String,
    },
    CheckNumber {
        request_id: String,
        session: String,
        to: String,
    },
}

/// Sidecar → gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarEvent {
    Qr {
        session: String,
        qr: String,
    },
    Loading {
        session: String,
        #[serde(default)]
        percent: u8,
        #[serde(default)]
        message: String,
    },
    Authenticated {
        session: String,
    },
    AuthFailure {
        session: String,
        #[serde(default)]
        reason: String,
    },
    Ready {
        session: String,
        /// Own number as reported by the client, digits only.
        #[serde(default)]
        phone: Option<String>,
    },
    Disconnected {
        session: String,
        #[serde(default)]
        reason: String,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    CheckNumberResult {
        request_id: String,
        #[serde(default)]
        registered: bool,
        #[serde(default)]
        error: Option<String>,
    },
    StopResult {
        request_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    LogoutResult {
        request_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        session: Option<String>,
        error: String,
    },
}

impl SidecarEvent {
    /// `request_id` of a result frame.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::SendResult { request_id, .. }
            | Self::CheckNumberResult { request_id, .. }
            | Self::StopResult { request_id, .. }
            | Self::LogoutResult { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    /// Session a lifecycle frame belongs to.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        match self {
            Self::Qr { session, .. }
            | Self::Loading { session, .. }
            | Self::Authenticated { session }
            | Self::AuthFailure { session, .. }
            | Self::Ready { session, .. }
            | Self::Disconnected { session, .. } => Some(session),
            Self::Error { session, .. } => session.as_deref(),
            Self::SendResult { .. }
            | Self::CheckNumberResult { .. }
            | Self::StopResult { .. }
            | Self::LogoutResult { .. } => None,
        }
    }

    /// Lifecycle event for the session state machine, if this frame is one.
    #[must_use]
    pub fn into_lifecycle(self) -> Option<LifecycleEvent> {
        match self {
            Self::Qr { qr, .. } => Some(LifecycleEvent::Qr { artifact: qr }),
            Self::Loading {
                percent, message, ..
            } => Some(LifecycleEvent::Loading { percent, message }),
            Self::Authenticated { .. } => Some(LifecycleEvent::Authenticated),
            Self::AuthFailure { reason, .. } => Some(LifecycleEvent::AuthFailure { reason }),
            Self::Ready { phone, .. } => Some(LifecycleEvent::Ready {
                address: phone.unwrap_or_default(),
            }),
            Self::Disconnected { reason, .. } => Some(LifecycleEvent::Disconnected { reason }),
            Self::SendResult { .. }
            | Self::CheckNumberResult { .. }
            | Self::StopResult { .. }
            | Self::LogoutResult { .. }
            | Self::Error { .. } => None,
        }
    }
}

/// Chat id for a canonical address, `None` when it has no digits.
#[must_use]
pub fn chat_id(address: &str) -> Option<String> {
    let digits = rukun_common::normalize_address(address);
    (!digits.is_empty()).then(|| format!("{digits}@c.us"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[rstest]
    #[case("6281234", Some("6281234@c.us"))]
    #[case("081234", Some("6281234@c.us"))]
    #[case("", None)]
    #[case("abc", None)]
    fn chat_ids(#[case] address: &str, #[case] expected: Option<&str>) {
        assert_eq!(chat_id(address).as_deref(), expected);
    }

    #[test]
    fn request_wire_shape() {
        let req = GatewayRequest::SendMessage {
            request_id: "r1".into(),
            session: "portal-rt".into(),
            to: "62811@c.us".into(),
            text: "halo".into(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "type": "send_message",
                "request_id": "r1",
                "session": "portal-rt",
                "to": "62811@c.us",
                "text": "halo",
            })
        );
    }

    #[test]
    fn parses_ready_and_maps_to_lifecycle() {
        let ev: SidecarEvent =
            serde_json::from_str(r#"{"type":"ready","session":"portal-rt","phone":"62811"}"#)
                .unwrap();
        assert_eq!(ev.session(), Some("portal-rt"));
        assert_eq!(
            ev.into_lifecycle(),
            Some(LifecycleEvent::Ready {
                address: "62811".into()
            })
        );
    }

    #[test]
    fn loading_defaults_missing_fields() {
        let ev: SidecarEvent =
            serde_json::from_str(r#"{"type":"loading","session":"s"}"#).unwrap();
        assert_eq!(
            ev.into_lifecycle(),
            Some(LifecycleEvent::Loading {
                percent: 0,
                message: String::new()
            })
        );
    }

    #[test]
    fn results_carry_request_id() {
        let ev: SidecarEvent = serde_json::from_str(
            r#"{"type":"send_result","request_id":"r9","success":true,"message_id":"true_62811@c.us_ABC"}"#,
        )
        .unwrap();
        assert_eq!(ev.request_id(), Some("r9"));
        assert!(ev.session().is_none());
        assert!(ev.into_lifecycle().is_none());

        let ev: SidecarEvent = serde_json::from_str(
            r#"{"type":"check_number_result","request_id":"r10","registered":false}"#,
        )
        .unwrap();
        assert_eq!(ev.request_id(), Some("r10"));

        let ev: SidecarEvent =
            serde_json::from_str(r#"{"type":"logout_result","request_id":"r11"}"#).unwrap();
        assert_eq!(ev, SidecarEvent::LogoutResult {
            request_id: "r11".into(),
            error: None,
        });
        assert_eq!(ev.request_id(), Some("r11"));
    }

    #[test]
    fn stop_and_logout_are_distinct_frames() {
        let stop = GatewayRequest::Stop {
            request_id: "r1".into(),
            session: "portal-rt".into(),
        };
        let logout = GatewayRequest::Logout {
            request_id: "r2".into(),
            session: "portal-rt".into(),
        };
        assert_eq!(serde_json::to_value(&stop).unwrap()["type"], "stop");
        assert_eq!(serde_json::to_value(&logout).unwrap()["type"], "logout");
        assert_eq!(serde_json::to_value(&logout).unwrap()["request_id"], "r2");
    }
}
