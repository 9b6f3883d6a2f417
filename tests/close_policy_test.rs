mod common;

use common::{fast_settings, test_engine, test_engine_with, wait_for_event, wait_for_state};
use whatsam_worker::{
    auth::{RemoteBucket, RemoteStore},
    session::{SessionEvent, SessionState},
    wa::close_code,
};

async fn connected_session(engine: &common::TestEngine, session_id: &str) -> anyhow::Result<()> {
    engine.manager.start(session_id, "user", None, false).await?;
    engine
        .factory
        .emit_open(session_id, "6285179971457:52@s.whatsapp.net", Some("Owner"))
        .await;
    wait_for_state(&engine.manager, session_id, SessionState::Connected).await;
    tokio::fs::write(
        engine.auth.session_dir(session_id).join("creds.json"),
        b"{}",
    )
    .await?;
    Ok(())
}

#[tokio::test]
async fn conflict_stream_error_means_remote_unlink() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    connected_session(&engine, "s3").await?;
    engine.auth.snapshot("s3").await?;

    engine
        .factory
        .emit_close("s3", None, "Stream Errored (conflict)")
        .await;

    let event = wait_for_event(&mut events, |e| matches!(e, SessionEvent::LoggedOut { .. })).await;
    let SessionEvent::LoggedOut {
        phone_number,
        display_name,
        ..
    } = event
    else {
        unreachable!();
    };
    // Cached identity rides along even though the socket is gone.
    assert_eq!(phone_number.as_deref(), Some("+6285179971457"));
    assert_eq!(display_name.as_deref(), Some("Owner"));

    wait_for_state(&engine.manager, "s3", SessionState::LoggedOut).await;
    assert!(!engine.auth.session_dir("s3").exists());
    assert!(
        engine
            .remote
            .list(RemoteBucket::Sessions, "sessions/s3/")
            .await?
            .is_empty()
    );
    // Terminal without an operator command: no reconnect.
    tokio::time::sleep(fast_settings().reconnect_interval * 2).await;
    assert_eq!(engine.factory.connect_count("s3").await, 1);

    Ok(())
}

#[tokio::test]
async fn logged_out_status_code_matches_conflict_policy() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    connected_session(&engine, "lo-1").await?;
    engine
        .factory
        .emit_close("lo-1", Some(close_code::LOGGED_OUT), "logged out")
        .await;

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::LoggedOut { .. })).await;
    wait_for_state(&engine.manager, "lo-1", SessionState::LoggedOut).await;
    assert!(!engine.auth.session_dir("lo-1").exists());

    Ok(())
}

#[tokio::test]
async fn connection_replaced_disconnects_without_reconnect() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    connected_session(&engine, "rep-1").await?;
    engine
        .factory
        .emit_close(
            "rep-1",
            Some(close_code::CONNECTION_REPLACED),
            "connection replaced",
        )
        .await;

    let event =
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    let SessionEvent::Disconnected {
        reason,
        requires_auth,
        ..
    } = event
    else {
        unreachable!();
    };
    assert_eq!(reason, "connection_replaced");
    assert!(!requires_auth);

    wait_for_state(&engine.manager, "rep-1", SessionState::Disconnected).await;
    // Auth stays: another device owns the slot, ours is still paired.
    assert!(engine.auth.session_dir("rep-1").join("creds.json").exists());
    tokio::time::sleep(fast_settings().reconnect_interval * 2).await;
    assert_eq!(engine.factory.connect_count("rep-1").await, 1);

    Ok(())
}

#[tokio::test]
async fn bad_session_purges_auth_and_flags_reauth() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    connected_session(&engine, "bad-1").await?;
    engine
        .factory
        .emit_close("bad-1", Some(close_code::BAD_SESSION), "bad session")
        .await;

    let event =
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    let SessionEvent::Disconnected {
        reason,
        requires_auth,
        ..
    } = event
    else {
        unreachable!();
    };
    assert_eq!(reason, "bad_session");
    assert!(requires_auth);

    wait_for_state(&engine.manager, "bad-1", SessionState::Disconnected).await;
    assert!(!engine.auth.session_dir("bad-1").exists());

    Ok(())
}

#[tokio::test]
async fn restart_required_recreates_the_socket_immediately() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    connected_session(&engine, "rr-1").await?;
    engine
        .factory
        .emit_close("rr-1", Some(close_code::RESTART_REQUIRED), "restart required")
        .await;

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Reconnecting { .. })).await;
    engine.factory.wait_for_connects("rr-1", 2).await;
    // Auth untouched on a requested restart.
    assert!(engine.auth.session_dir("rr-1").join("creds.json").exists());

    Ok(())
}

#[tokio::test]
async fn recoverable_close_reconnects_after_the_default_delay() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    connected_session(&engine, "rec-1").await?;
    engine
        .factory
        .emit_close("rec-1", Some(close_code::CONNECTION_CLOSED), "stream ended")
        .await;

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Reconnecting { .. })).await;
    wait_for_state(&engine.manager, "rec-1", SessionState::Reconnecting).await;
    let reconnecting_at = tokio::time::Instant::now();

    engine.factory.wait_for_connects("rec-1", 2).await;
    assert!(reconnecting_at.elapsed() >= fast_settings().reconnect_interval);

    Ok(())
}

#[tokio::test]
async fn timed_out_close_uses_the_longer_delay() -> anyhow::Result<()> {
    let engine = test_engine();
    let mut events = engine.manager.subscribe();

    connected_session(&engine, "to-1").await?;
    engine
        .factory
        .emit_close("to-1", Some(close_code::TIMED_OUT), "timed out")
        .await;

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Reconnecting { .. })).await;
    let reconnecting_at = tokio::time::Instant::now();

    engine.factory.wait_for_connects("to-1", 2).await;
    assert!(reconnecting_at.elapsed() >= fast_settings().timed_out_reconnect_interval);

    Ok(())
}

#[tokio::test]
async fn recovered_sessions_reattach_on_the_short_delay() -> anyhow::Result<()> {
    let engine = test_engine();

    engine.manager.start("recov-1", "user", None, true).await?;
    engine
        .factory
        .emit_open("recov-1", "628999:1@s.whatsapp.net", None)
        .await;
    wait_for_state(&engine.manager, "recov-1", SessionState::Connected).await;

    // connectionReplaced would park a normal session; a recovered one retries.
    engine
        .factory
        .emit_close(
            "recov-1",
            Some(close_code::CONNECTION_REPLACED),
            "connection replaced",
        )
        .await;

    engine.factory.wait_for_connects("recov-1", 2).await;

    // Remote unlink still short-circuits to cleanup.
    engine
        .factory
        .emit_close("recov-1", Some(close_code::LOGGED_OUT), "logged out")
        .await;
    wait_for_state(&engine.manager, "recov-1", SessionState::LoggedOut).await;

    Ok(())
}

#[tokio::test]
async fn reconnect_attempts_cap_transitions_to_failed() -> anyhow::Result<()> {
    let mut settings = fast_settings();
    settings.max_reconnect_attempts = 2;
    let engine = test_engine_with(settings);
    let mut events = engine.manager.subscribe();

    connected_session(&engine, "cap-1").await?;

    engine
        .factory
        .emit_close("cap-1", Some(close_code::CONNECTION_CLOSED), "drop 1")
        .await;
    engine.factory.wait_for_connects("cap-1", 2).await;
    engine
        .factory
        .emit_close("cap-1", Some(close_code::CONNECTION_CLOSED), "drop 2")
        .await;
    engine.factory.wait_for_connects("cap-1", 3).await;
    engine
        .factory
        .emit_close("cap-1", Some(close_code::CONNECTION_CLOSED), "drop 3")
        .await;

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Failed { .. })).await;
    wait_for_state(&engine.manager, "cap-1", SessionState::Failed).await;

    Ok(())
}
