mod common;

use common::{test_engine, wait_for_event, wait_for_state};
use whatsam_worker::{
    auth::{RemoteBucket, RemoteStore},
    session::{SessionError, SessionEvent, SessionState},
    wa::{OutboundContent, SendAction},
};

#[tokio::test]
async fn happy_qr_pairing_reaches_connected() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    let outcome = engine.manager.start("s1", "u1", None, false).await?;
    assert!(outcome.created);
    assert_eq!(outcome.snapshot.state, SessionState::Initializing);

    engine.factory.emit_qr("s1", "qrA").await;
    let event = wait_for_event(&mut events, |e| matches!(e, SessionEvent::QrReady { .. })).await;
    let SessionEvent::QrReady { qr, attempt, .. } = event else {
        unreachable!();
    };
    assert_eq!(qr, "qrA");
    assert_eq!(attempt, 1);

    let snapshot = engine.manager.status("s1").await?;
    assert_eq!(snapshot.state, SessionState::QrReady);
    assert_eq!(snapshot.qr.as_ref().map(|c| c.code.as_str()), Some("qrA"));

    engine
        .factory
        .emit_open("s1", "6281234567:5@s.whatsapp.net", Some("Alice"))
        .await;
    let event =
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
    let SessionEvent::Connected {
        phone_number,
        display_name,
        ..
    } = event
    else {
        unreachable!();
    };
    assert_eq!(phone_number.as_deref(), Some("+6281234567"));
    assert_eq!(display_name.as_deref(), Some("Alice"));

    wait_for_state(&engine.manager, "s1", SessionState::Connected).await;
    let snapshot = engine.manager.status("s1").await?;
    assert!(snapshot.qr.is_none());
    assert_eq!(snapshot.qr_attempts, 0);
    assert_eq!(snapshot.phone_number.as_deref(), Some("+6281234567"));
    assert!(snapshot.connected_at.is_some());

    // Auth material mirrored to the remote store under sessions/s1/.
    tokio::fs::write(engine.auth.session_dir("s1").join("creds.json"), b"{}").await?;
    engine.auth.snapshot("s1").await?;
    let keys = engine
        .remote
        .list(RemoteBucket::Sessions, "sessions/s1/")
        .await?;
    assert_eq!(keys, vec!["sessions/s1/creds.json".to_owned()]);

    Ok(())
}

#[tokio::test]
async fn start_is_idempotent_for_live_sessions() -> anyhow::Result<()> {
    let engine = test_engine();

    let first = engine.manager.start("same-1", "u1", None, false).await?;
    assert!(first.created);

    let second = engine.manager.start("same-1", "u1", None, false).await?;
    assert!(!second.created);
    assert_eq!(engine.factory.connect_count("same-1").await, 1);

    engine
        .factory
        .emit_open("same-1", "628111:1@s.whatsapp.net", None)
        .await;
    wait_for_state(&engine.manager, "same-1", SessionState::Connected).await;

    let resumed = engine.manager.start("same-1", "u1", None, false).await?;
    assert!(!resumed.created);
    assert_eq!(resumed.snapshot.state, SessionState::Connected);

    Ok(())
}

#[tokio::test]
async fn strict_create_conflicts_on_existing_id() -> anyhow::Result<()> {
    let engine = test_engine();

    engine.manager.create("dup-1", "u1", None, false).await?;
    let error = engine
        .manager
        .create("dup-1", "u2", None, false)
        .await
        .expect_err("second create must fail");
    assert!(matches!(error, SessionError::AlreadyExists));

    Ok(())
}

#[tokio::test]
async fn invalid_session_ids_are_rejected() {
    let engine = test_engine();

    for bad in ["ab", "bad/../id", "spaced id", &"x".repeat(51)] {
        let error = engine
            .manager
            .start(bad, "u1", None, false)
            .await
            .expect_err("invalid id accepted");
        assert!(matches!(error, SessionError::Validation(_)), "{bad}");
    }
}

#[tokio::test]
async fn delete_drops_state_and_purges_auth() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    engine.manager.start("del-1", "u1", None, false).await?;
    engine
        .factory
        .emit_open("del-1", "628222:1@s.whatsapp.net", None)
        .await;
    wait_for_state(&engine.manager, "del-1", SessionState::Connected).await;

    let dir = engine.auth.session_dir("del-1");
    tokio::fs::write(dir.join("creds.json"), b"{}").await?;
    engine.auth.snapshot("del-1").await?;

    let socket = engine.factory.socket("del-1").await;
    engine.manager.delete("del-1").await?;

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Deleted { .. })).await;
    assert!(matches!(
        engine.manager.status("del-1").await,
        Err(SessionError::NotFound)
    ));
    assert_eq!(socket.logouts.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!dir.exists());
    assert!(
        engine
            .remote
            .list(RemoteBucket::Sessions, "sessions/del-1/")
            .await?
            .is_empty()
    );

    Ok(())
}

#[tokio::test]
async fn manual_disconnect_preserves_auth_and_start_revives() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    engine.manager.start("s4", "u4", None, false).await?;
    engine
        .factory
        .emit_open("s4", "628333:9@s.whatsapp.net", None)
        .await;
    wait_for_state(&engine.manager, "s4", SessionState::Connected).await;

    let dir = engine.auth.session_dir("s4");
    tokio::fs::write(dir.join("creds.json"), b"{}").await?;

    engine.manager.disconnect("s4").await?;
    let event =
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    let SessionEvent::Disconnected { reason, .. } = event else {
        unreachable!();
    };
    assert_eq!(reason, "manual");

    wait_for_state(&engine.manager, "s4", SessionState::Disconnected).await;
    let snapshot = engine.manager.status("s4").await?;
    assert!(snapshot.manual_disconnect);
    assert!(dir.join("creds.json").exists());

    // The library reports the socket close afterwards; no second webhook,
    // no reconnect.
    engine.factory.emit_close("s4", Some(428), "socket ended").await;
    tokio::time::sleep(tokio::time::Duration::from_millis(400)).await;
    assert_eq!(engine.manager.status("s4").await?.state, SessionState::Disconnected);
    assert_eq!(engine.factory.connect_count("s4").await, 1);

    // Start revives through the restart path.
    let outcome = engine.manager.start("s4", "u4", None, false).await?;
    assert!(!outcome.created);
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Reconnecting { .. })).await;
    engine.factory.wait_for_connects("s4", 2).await;
    let snapshot = engine.manager.status("s4").await?;
    assert!(!snapshot.manual_disconnect);

    Ok(())
}

#[tokio::test]
async fn send_requires_connected_and_authenticated() -> anyhow::Result<()> {
    let engine = test_engine();

    engine.manager.start("send-1", "u1", None, false).await?;
    let error = engine
        .manager
        .send(
            "send-1",
            "628444".to_owned(),
            SendAction::Message(OutboundContent::Text {
                body: "early".to_owned(),
            }),
            false,
        )
        .await
        .expect_err("send before connect");
    assert!(matches!(error, SessionError::NotConnected));

    engine
        .factory
        .emit_open("send-1", "628444:1@s.whatsapp.net", None)
        .await;
    wait_for_state(&engine.manager, "send-1", SessionState::Connected).await;

    let receipt = engine
        .manager
        .send(
            "send-1",
            "628555".to_owned(),
            SendAction::Message(OutboundContent::Text {
                body: "hello".to_owned(),
            }),
            false,
        )
        .await?;
    assert!(!receipt.message_id.is_empty());

    let socket = engine.factory.socket("send-1").await;
    let sent = socket.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "628555@s.whatsapp.net");

    Ok(())
}

#[tokio::test]
async fn send_rejects_invalid_recipient() -> anyhow::Result<()> {
    let engine = test_engine();

    engine.manager.start("send-2", "u1", None, false).await?;
    engine
        .factory
        .emit_open("send-2", "628666:1@s.whatsapp.net", None)
        .await;
    wait_for_state(&engine.manager, "send-2", SessionState::Connected).await;

    let error = engine
        .manager
        .send(
            "send-2",
            "not a phone".to_owned(),
            SendAction::Message(OutboundContent::Text {
                body: "hello".to_owned(),
            }),
            false,
        )
        .await
        .expect_err("invalid recipient accepted");
    assert!(matches!(error, SessionError::Validation(_)));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn paced_send_runs_the_presence_choreography_first() -> anyhow::Result<()> {
    let engine = test_engine();

    engine.manager.start("pace-1", "u1", None, false).await?;
    engine
        .factory
        .emit_open("pace-1", "628123:1@s.whatsapp.net", None)
        .await;
    wait_for_state(&engine.manager, "pace-1", SessionState::Connected).await;

    let started = tokio::time::Instant::now();
    engine
        .manager
        .send(
            "pace-1",
            "628555".to_owned(),
            SendAction::Message(OutboundContent::Text {
                body: "paced".to_owned(),
            }),
            true,
        )
        .await?;

    let socket = engine.factory.socket("pace-1").await;
    let sent = socket.sent.lock().await;
    assert_eq!(sent.len(), 1);

    // Read + typing + pre-send delays bound the observed dispatch time.
    let elapsed = sent[0].at.duration_since(started);
    assert!(elapsed >= tokio::time::Duration::from_millis(1700), "{elapsed:?}");
    assert!(elapsed <= tokio::time::Duration::from_millis(3500), "{elapsed:?}");
    drop(sent);

    use whatsam_worker::wa::PresenceKind;
    assert_eq!(
        socket.presence_sequence().await,
        vec![
            PresenceKind::Available,
            PresenceKind::Composing,
            PresenceKind::Paused,
            PresenceKind::Available,
        ]
    );

    Ok(())
}

#[tokio::test]
async fn statistics_bucket_sessions_by_state() -> anyhow::Result<()> {
    let engine = test_engine();

    engine.manager.start("st-a", "u1", None, false).await?;
    engine.manager.start("st-b", "u1", None, false).await?;
    engine
        .factory
        .emit_open("st-a", "628777:1@s.whatsapp.net", None)
        .await;
    wait_for_state(&engine.manager, "st-a", SessionState::Connected).await;

    let stats = engine.manager.statistics().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.connected, 1);
    assert_eq!(stats.initializing, 1);

    let listed = engine.manager.list().await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].session_id, "st-a");

    Ok(())
}
