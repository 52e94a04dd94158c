//! Session states, lifecycle events and the transition function.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Connectivity state of the outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    /// Waiting for the operator to scan a QR code.
    QrPending,
    Authenticated,
    Ready,
    /// Stored credentials were rejected. `start()` refuses until `reset()`,
    /// even after the transport reports the disconnect that follows.
    AuthFailure,
}

impl SessionState {
    pub const ALL: [Self; 6] = [
        Self::Disconnected,
        Self::Connecting,
        Self::QrPending,
        Self::Authenticated,
        Self::Ready,
        Self::AuthFailure,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::QrPending => "QR_PENDING",
            Self::Authenticated => "AUTHENTICATED",
            Self::Ready => "READY",
            Self::AuthFailure => "AUTH_FAILURE",
        }
    }

    /// A handshake is under way; `start()` must not begin another.
    #[must_use]
    pub fn is_handshaking(self) -> bool {
        matches!(self, Self::Connecting | Self::QrPending | Self::Authenticated)
    }

    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Stable ordinal used for the state gauge.
    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::QrPending => 2,
            Self::Authenticated => 3,
            Self::Ready => 4,
            Self::AuthFailure => 5,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::message(format!("unknown session state: {s}")))
    }
}

/// Callbacks raised by the transport while a connection is alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A QR code must be scanned; `artifact` is the opaque payload to render.
    Qr { artifact: String },
    /// Progress while restoring a session. Never changes state.
    Loading { percent: u8, message: String },
    Authenticated,
    AuthFailure { reason: String },
    /// Connected and able to send as `address`.
    Ready { address: String },
    Disconnected { reason: String },
}

impl LifecycleEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Qr { .. } => "qr",
            Self::Loading { .. } => "loading",
            Self::Authenticated => "authenticated",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Ready { .. } => "ready",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Own address, present only while `READY`.
    pub connected_address: Option<String>,
    /// QR payload, present only while `QR_PENDING`. Never persisted.
    #[serde(skip)]
    pub qr_artifact: Option<String>,
    pub last_connected_at: Option<i64>,
    pub updated_at: i64,
}

impl SessionSnapshot {
    /// Snapshot in `state`, keeping `last_connected_at` and dropping the
    /// fields that only belong to `READY` / `QR_PENDING`.
    #[must_use]
    pub fn with_state(&self, state: SessionState, now: i64) -> Self {
        Self {
            state,
            connected_address: None,
            qr_artifact: None,
            last_connected_at: self.last_connected_at,
            updated_at: now,
        }
    }

    /// Fold one lifecycle event into the snapshot.
    ///
    /// Returns `None` for progress reports, which never change the state.
    #[must_use]
    pub fn apply(&self, event: &LifecycleEvent, now: i64) -> Option<Self> {
        match event {
            LifecycleEvent::Loading { .. } => None,
            LifecycleEvent::Qr { artifact } => Some(Self {
                qr_artifact: Some(artifact.clone()),
                ..self.with_state(SessionState::QrPending, now)
            }),
            LifecycleEvent::Authenticated => {
                Some(self.with_state(SessionState::Authenticated, now))
            },
            LifecycleEvent::AuthFailure { .. } => {
                Some(self.with_state(SessionState::AuthFailure, now))
            },
            LifecycleEvent::Ready { address } => {
                let normalized = rukun_common::normalize_address(address);
                Some(Self {
                    state: SessionState::Ready,
                    connected_address: (!normalized.is_empty()).then_some(normalized),
                    qr_artifact: None,
                    last_connected_at: Some(now),
                    updated_at: now,
                })
            },
            LifecycleEvent::Disconnected { .. } => {
                Some(self.with_state(SessionState::Disconnected, now))
            },
        }
    }
}

/// What `status()` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub state: SessionState,
    pub connected_address: Option<String>,
    pub qr_artifact: Option<String>,
}

impl From<&SessionSnapshot> for ChannelStatus {
    fn from(snap: &SessionSnapshot) -> Self {
        Self {
            state: snap.state,
            connected_address: snap.connected_address.clone(),
            qr_artifact: snap.qr_artifact.clone(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn snap(state: SessionState) -> SessionSnapshot {
        SessionSnapshot {
            state,
            last_connected_at: Some(10),
            updated_at: 10,
            ..Default::default()
        }
    }

    fn ready() -> SessionSnapshot {
        snap(SessionState::Disconnected)
            .apply(
                &LifecycleEvent::Ready {
                    address: "6281234".into(),
                },
                20,
            )
            .unwrap()
    }

    #[test]
    fn state_strings_roundtrip() {
        for state in SessionState::ALL {
            assert_eq!(state.as_str().parse::<SessionState>().unwrap(), state);
        }
        assert!("ONLINE".parse::<SessionState>().is_err());
    }

    #[rstest]
    #[case(SessionState::Connecting, true)]
    #[case(SessionState::QrPending, true)]
    #[case(SessionState::Authenticated, true)]
    #[case(SessionState::Ready, false)]
    #[case(SessionState::Disconnected, false)]
    #[case(SessionState::AuthFailure, false)]
    fn handshaking_states(#[case] state: SessionState, #[case] expected: bool) {
        assert_eq!(state.is_handshaking(), expected);
    }

    #[test]
    fn loading_changes_nothing() {
        let ev = LifecycleEvent::Loading {
            percent: 40,
            message: "syncing".into(),
        };
        assert!(snap(SessionState::Connecting).apply(&ev, 11).is_none());
    }

    #[test]
    fn qr_sets_artifact() {
        let next = snap(SessionState::Connecting)
            .apply(
                &LifecycleEvent::Qr {
                    artifact: "2@abc".into(),
                },
                11,
            )
            .unwrap();
        assert_eq!(next.state, SessionState::QrPending);
        assert_eq!(next.qr_artifact.as_deref(), Some("2@abc"));
        assert_eq!(next.updated_at, 11);
    }

    #[test]
    fn authenticated_clears_artifact() {
        let qr = snap(SessionState::Connecting)
            .apply(
                &LifecycleEvent::Qr {
                    artifact: "2@abc".into(),
                },
                11,
            )
            .unwrap();
        let next = qr.apply(&LifecycleEvent::Authenticated, 12).unwrap();
        assert_eq!(next.state, SessionState::Authenticated);
        assert!(next.qr_artifact.is_none());
    }

    #[test]
    fn ready_sets_address_and_timestamp() {
        let next = ready();
        assert_eq!(next.state, SessionState::Ready);
        assert_eq!(next.connected_address.as_deref(), Some("6281234"));
        assert_eq!(next.last_connected_at, Some(20));
    }

    #[test]
    fn leaving_ready_clears_address_keeps_last_connected() {
        let next = ready()
            .apply(
                &LifecycleEvent::Disconnected {
                    reason: "NAVIGATION".into(),
                },
                30,
            )
            .unwrap();
        assert_eq!(next.state, SessionState::Disconnected);
        assert!(next.connected_address.is_none());
        assert_eq!(next.last_connected_at, Some(20));
    }

    #[test]
    fn auth_failure_then_disconnect_is_disconnected() {
        let failed = snap(SessionState::Connecting)
            .apply(
                &LifecycleEvent::AuthFailure {
                    reason: "bad creds".into(),
                },
                11,
            )
            .unwrap();
        assert_eq!(failed.state, SessionState::AuthFailure);
        let ev = LifecycleEvent::Disconnected {
            reason: "LOGOUT".into(),
        };
        let next = failed.apply(&ev, 12).unwrap();
        assert_eq!(next.state, SessionState::Disconnected);
        assert_eq!(next.last_connected_at, Some(10));
    }

    #[test]
    fn any_state_disconnects() {
        let ev = LifecycleEvent::Disconnected {
            reason: "conflict".into(),
        };
        for state in [
            SessionState::Connecting,
            SessionState::QrPending,
            SessionState::Authenticated,
            SessionState::Ready,
            SessionState::Disconnected,
            SessionState::AuthFailure,
        ] {
            let next = snap(state).apply(&ev, 50).unwrap();
            assert_eq!(next.state, SessionState::Disconnected, "from {state}");
        }
    }

    #[test]
    fn status_view_carries_artifact() {
        let qr = snap(SessionState::Connecting)
            .apply(
                &LifecycleEvent::Qr {
                    artifact: "qr".into(),
                },
                1,
            )
            .unwrap();
        let status = ChannelStatus::from(&qr);
        assert_eq!(status.state, SessionState::QrPending);
        assert_eq!(status.qr_artifact.as_deref(), Some("qr"));
    }
}
