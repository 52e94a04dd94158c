#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end delivery scenarios over the mock transport.

use std::{sync::Arc, time::Duration};

use {
    rstest::rstest,
    rukun_channels::{
        SessionState,
        mock::{MockTransport, session_in},
    },
    rukun_notify::{CycleOutcome, DeliveryWorker, FALLBACK_TEXT, Notifier},
    rukun_outbox::{
        InMemoryOutboxStore, LogStatus, OutboxMessage, OutboxStatus, OutboxStore,
        SqliteOutboxStore,
    },
    serde_json::{Value, json},
};

struct Harness {
    store: Arc<dyn OutboxStore>,
    mock: Arc<MockTransport>,
    worker: DeliveryWorker,
    notifier: Notifier,
    _db: Option<tempfile::TempDir>,
}

async fn harness(state: SessionState, sqlite: bool) -> Harness {
    let (session, mock) = session_in(state).await.unwrap();
    let (store, db): (Arc<dyn OutboxStore>, _) = if sqlite {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("rukun.db").display());
        (Arc::new(SqliteOutboxStore::new(&url).await.unwrap()), Some(dir))
    } else {
        (Arc::new(InMemoryOutboxStore::new()), None)
    };
    let worker = DeliveryWorker::new(Arc::clone(&store), Arc::clone(&session), 10);
    let notifier = Notifier::new(Arc::clone(&store), session);
    Harness {
        store,
        mock,
        worker,
        notifier,
        _db: db,
    }
}

async fn status_of(store: &Arc<dyn OutboxStore>, id: &str) -> OutboxStatus {
    store.get(id).await.unwrap().unwrap().status
}

#[rstest]
#[case::memory(false)]
#[case::sqlite(true)]
#[tokio::test]
async fn unknown_template_is_sent_with_fallback(#[case] sqlite: bool) {
    let h = harness(SessionState::Ready, sqlite).await;
    let id = h
        .notifier
        .enqueue(None, "0812-345-678", "Unknown", json!({}))
        .await
        .unwrap()
        .unwrap();

    let report = h.worker.run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.sent, 1);

    assert_eq!(h.mock.sent(), vec![(
        "62812345678".to_string(),
        FALLBACK_TEXT.to_string()
    )]);
    assert_eq!(status_of(&h.store, &id).await, OutboxStatus::Sent);

    let logs = h.notifier.history(&id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Sent);
    assert!(logs[0].sent_at_ms.is_some());
    let ack: Value = serde_json::from_str(logs[0].response_text.as_deref().unwrap()).unwrap();
    assert_eq!(ack["messageId"], "mock-1");
    assert_eq!(ack["message"], FALLBACK_TEXT);
}

#[rstest]
#[case::memory(false)]
#[case::sqlite(true)]
#[tokio::test]
async fn auth_failure_leaves_everything_pending(#[case] sqlite: bool) {
    let h = harness(SessionState::AuthFailure, sqlite).await;
    let mut ids = Vec::new();
    for to in ["62811", "62812", "62813"] {
        ids.push(
            h.notifier
                .enqueue(Some("rt-01"), to, "KasRtDebitSuccess", json!({ "amount": 1 }))
                .await
                .unwrap()
                .unwrap(),
        );
    }

    let report = h.worker.run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Deferred);
    assert_eq!(report.claimed, 0);
    assert!(h.mock.sent().is_empty());
    for id in &ids {
        assert_eq!(status_of(&h.store, id).await, OutboxStatus::Pending);
        assert!(h.store.logs(id).await.unwrap().is_empty());
    }
}

#[rstest]
#[case::memory(false)]
#[case::sqlite(true)]
#[tokio::test]
async fn retried_entry_is_delivered(#[case] sqlite: bool) {
    let h = harness(SessionState::Ready, sqlite).await;
    let now = rukun_common::now_ms();
    let failed = OutboxMessage {
        id: "outbox-failed-twice".into(),
        tenant_id: None,
        recipient: "62811".into(),
        template_key: "PhoneOtpCode".into(),
        payload: json!({ "code": "123456" }),
        status: OutboxStatus::Failed,
        retry_count: 2,
        created_at_ms: now,
        updated_at_ms: now,
    };
    h.store.insert(&failed).await.unwrap();

    let idle = h.worker.run_cycle().await.unwrap();
    assert_eq!(idle.claimed, 0);

    h.notifier.retry(&failed.id).await.unwrap();
    let report = h.worker.run_cycle().await.unwrap();
    assert_eq!(report.sent, 1);

    let msg = h.store.get(&failed.id).await.unwrap().unwrap();
    assert_eq!(msg.status, OutboxStatus::Sent);
    assert_eq!(msg.retry_count, 2);

    let statuses: Vec<LogStatus> = h
        .store
        .logs(&failed.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.status)
        .collect();
    assert_eq!(statuses, vec![LogStatus::Retry, LogStatus::Sent]);
    assert_eq!(
        h.mock.sent()[0].1,
        "Kode OTP Portal RT: 123456. Berlaku 10 menit."
    );
}

#[rstest]
#[case::memory(false)]
#[case::sqlite(true)]
#[tokio::test]
async fn one_failure_does_not_abort_the_batch(#[case] sqlite: bool) {
    let h = harness(SessionState::Ready, sqlite).await;
    h.mock.fail_sends_to("62822", "chat not found");
    h.mock.unregister("62833");

    let mut ids = Vec::new();
    for to in ["62811", "62822", "62833", "62844"] {
        ids.push(
            h.notifier
                .enqueue(None, to, "WalletTopupApproved", json!({}))
                .await
                .unwrap()
                .unwrap(),
        );
    }

    let report = h.worker.run_cycle().await.unwrap();
    assert_eq!((report.claimed, report.sent, report.failed), (4, 2, 2));

    let expected = [
        OutboxStatus::Sent,
        OutboxStatus::Failed,
        OutboxStatus::Failed,
        OutboxStatus::Sent,
    ];
    for (id, status) in ids.iter().zip(expected) {
        assert_eq!(status_of(&h.store, id).await, status);
    }

    let failure = |id: &str| {
        let store = Arc::clone(&h.store);
        let id = id.to_string();
        async move {
            store.logs(&id).await.unwrap()[0]
                .response_text
                .clone()
                .unwrap()
        }
    };
    assert_eq!(failure(&ids[1]).await, "chat not found");
    assert_eq!(failure(&ids[2]).await, "Nomor WA tidak terdaftar");

    // The unregistered recipient never reached the transport.
    let recipients: Vec<String> = h.mock.sent().into_iter().map(|(to, _)| to).collect();
    assert_eq!(recipients, vec!["62811", "62844"]);
}

#[tokio::test]
async fn disconnect_mid_batch_leaves_rest_pending() {
    let h = harness(SessionState::Ready, false).await;
    h.mock.disconnect_after_sends(1);

    let mut ids = Vec::new();
    for to in ["62811", "62812", "62813"] {
        ids.push(
            h.notifier
                .enqueue(None, to, "WalletTopupRejected", json!({}))
                .await
                .unwrap()
                .unwrap(),
        );
    }

    let report = h.worker.run_cycle().await.unwrap();
    assert_eq!((report.claimed, report.sent, report.failed), (3, 1, 0));
    assert_eq!(h.notifier.channel_status().state, SessionState::Disconnected);

    assert_eq!(status_of(&h.store, &ids[0]).await, OutboxStatus::Sent);
    for id in &ids[1..] {
        assert_eq!(status_of(&h.store, id).await, OutboxStatus::Pending);
        assert!(h.store.logs(id).await.unwrap().is_empty());
    }

    let next = h.worker.run_cycle().await.unwrap();
    assert_eq!(next.outcome, CycleOutcome::Deferred);
}

#[tokio::test]
async fn send_timeout_is_recorded_as_failure() {
    let h = harness(SessionState::Ready, false).await;
    h.mock.set_send_delay(Duration::from_millis(400));
    let id = h
        .notifier
        .enqueue(None, "62811", "WalletTopupApproved", json!({}))
        .await
        .unwrap()
        .unwrap();

    let report = h.worker.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);

    let logs = h.store.logs(&id).await.unwrap();
    assert_eq!(logs[0].status, LogStatus::Failed);
    assert_eq!(
        logs[0].response_text.as_deref(),
        Some("send timed out after 0.2s")
    );
    assert_eq!(h.store.counts().await.unwrap().failed, 1);
}
