//! End-to-end scenarios over real sockets: admission, chat fan-out,
//! presenter arbitration, moderation, host transfer.

mod common;

use std::time::Duration;

use common::{spawn_hub, TestClient};
use lm_proto::message::Message;

#[tokio::test(flavor = "multi_thread")]
async fn admit_and_chat_excludes_sender() {
    let spool = tempfile::tempdir().unwrap();
    let mut hub = spawn_hub(spool.path().to_path_buf()).await;
    let mut console = hub.console();

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    assert_eq!(alice.id(), 1);
    assert_eq!(alice.login.host_id, 0);
    let names: Vec<_> = alice.login.participants.iter().map(|p| p.name.as_str()).collect();
    assert!(names.contains(&"host"));
    assert!(names.contains(&"alice"));

    let mut bob = TestClient::connect(hub.control_addr, "bob").await;
    alice.recv_until(|m| matches!(m, Message::UserJoined { name, .. } if name == "bob")).await;

    alice.send(Message::Chat { text: "hi".into(), sender_id: None, sender_name: None }).await;

    match bob.recv_until(|m| matches!(m, Message::Chat { .. })).await {
        Message::Chat { text, sender_id, sender_name } => {
            assert_eq!(text, "hi");
            assert_eq!(sender_id, Some(1));
            assert_eq!(sender_name.as_deref(), Some("alice"));
        }
        _ => unreachable!(),
    }

    // the host console sees the chat too
    loop {
        let env = console.recv().await.expect("console event");
        if let Message::Chat { text, .. } = env.msg {
            assert_eq!(text, "hi");
            break;
        }
    }

    // the sender never receives its own chat
    assert!(alice.silent_for(Duration::from_millis(300)).await);

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn late_joiner_gets_chat_history() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    alice.send(Message::Chat { text: "first".into(), sender_id: None, sender_name: None }).await;
    alice.send(Message::Chat { text: "second".into(), sender_id: None, sender_name: None }).await;

    // get_files_list doubles as a sync point: once answered, both chats are logged
    alice.send(Message::GetFilesList).await;
    alice.recv_until(|m| matches!(m, Message::FilesListUpdate { .. })).await;

    let bob = TestClient::connect(hub.control_addr, "bob").await;
    let texts: Vec<_> = bob.login.chat_history.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn presenter_arbitration_first_wins() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    alice.send(Message::RequestPresenter).await;
    alice.recv_until(|m| matches!(m, Message::PresenterGranted)).await;

    bob.send(Message::RequestPresenter).await;
    match bob.recv_until(|m| matches!(m, Message::PresenterDenied { .. })).await {
        Message::PresenterDenied { reason } => assert_eq!(reason, "busy"),
        _ => unreachable!(),
    }

    for c in [&mut alice, &mut bob] {
        match c
            .recv_until(|m| matches!(m, Message::PresenterChanged { .. }))
            .await
        {
            Message::PresenterChanged { presenter_id } => assert_eq!(presenter_id, Some(1)),
            _ => unreachable!(),
        }
    }

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn screen_frames_fan_out_latest_wins_channel() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    // frames from a non-presenter are dropped
    alice.send(Message::ScreenFrame { frame_data: vec![1, 2, 3] }).await;
    assert!(bob.silent_for(Duration::from_millis(300)).await);

    alice.send(Message::RequestPresenter).await;
    alice.recv_until(|m| matches!(m, Message::PresenterGranted)).await;

    let frame: Vec<u8> = (0..200u8).collect();
    alice.send(Message::ScreenFrame { frame_data: frame.clone() }).await;
    match bob.recv_until(|m| matches!(m, Message::ScreenFrame { .. })).await {
        Message::ScreenFrame { frame_data } => assert_eq!(frame_data, frame),
        _ => unreachable!(),
    }

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn force_mute_notifies_target_and_broadcasts_delta() {
    let spool = tempfile::tempdir().unwrap();
    let mut hub = spawn_hub(spool.path().to_path_buf()).await;
    let console = hub.console();

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    bob.send(Message::MediaState { video_on: false, audio_on: true, id: None }).await;
    alice
        .recv_until(|m| matches!(m, Message::MediaState { audio_on: true, .. }))
        .await;

    console.force_mute(bob.id()).await;

    // the target gets the typed notification so its client stops capture
    bob.recv_until(|m| matches!(m, Message::ForceMute { .. })).await;
    // everyone gets the compact state delta
    match alice
        .recv_until(|m| matches!(m, Message::MediaState { audio_on: false, .. }))
        .await
    {
        Message::MediaState { id, video_on, audio_on } => {
            assert_eq!(id, Some(bob.id()));
            assert!(!video_on);
            assert!(!audio_on);
        }
        _ => unreachable!(),
    }

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn guests_cannot_use_host_commands() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    alice.send(Message::Kick { target: bob.id() }).await;
    match alice.recv_until(|m| matches!(m, Message::PermissionError { .. })).await {
        Message::PermissionError { message } => assert!(message.contains("host only")),
        _ => unreachable!(),
    }
    // bob unaffected
    assert!(bob.silent_for(Duration::from_millis(200)).await);

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn kick_evicts_and_broadcasts_reason() {
    let spool = tempfile::tempdir().unwrap();
    let mut hub = spawn_hub(spool.path().to_path_buf()).await;
    let console = hub.console();

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;
    alice.recv_until(|m| matches!(m, Message::UserJoined { name, .. } if name == "bob")).await;

    console.kick(bob.id()).await;

    match alice.recv_until(|m| matches!(m, Message::UserLeft { .. })).await {
        Message::UserLeft { id, reason } => {
            assert_eq!(id, bob.id());
            assert_eq!(reason.as_deref(), Some("kicked"));
        }
        _ => unreachable!(),
    }
    bob.expect_closed().await;

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn revoked_chat_permission_yields_typed_error() {
    let spool = tempfile::tempdir().unwrap();
    let mut hub = spawn_hub(spool.path().to_path_buf()).await;
    let console = hub.console();

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    console.set_permission(alice.id(), "may_chat", false).await;
    alice
        .recv_until(|m| matches!(m, Message::SetPermission { value: false, .. }))
        .await;

    alice.send(Message::Chat { text: "blocked?".into(), sender_id: None, sender_name: None }).await;
    alice.recv_until(|m| matches!(m, Message::PermissionError { .. })).await;
    assert!(bob.silent_for(Duration::from_millis(200)).await);

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_size_boundary() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    let exactly = "x".repeat(4 * 1024);
    alice.send(Message::Chat { text: exactly.clone(), sender_id: None, sender_name: None }).await;
    match bob.recv_until(|m| matches!(m, Message::Chat { .. })).await {
        Message::Chat { text, .. } => assert_eq!(text, exactly),
        _ => unreachable!(),
    }

    let over = "x".repeat(4 * 1024 + 1);
    alice.send(Message::Chat { text: over, sender_id: None, sender_name: None }).await;
    alice.recv_until(|m| matches!(m, Message::PermissionError { .. })).await;

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_message_types_are_tolerated() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    alice
        .send_raw(br#"{"type":"hologram_start","timestamp":"2026-01-01T00:00:00Z","x":1}"#)
        .await;

    // the connection survives and keeps working
    alice.send(Message::Chat { text: "still here".into(), sender_id: None, sender_name: None }).await;
    match bob.recv_until(|m| matches!(m, Message::Chat { .. })).await {
        Message::Chat { text, .. } => assert_eq!(text, "still here"),
        _ => unreachable!(),
    }

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn host_logout_promotes_oldest_participant() {
    let spool = tempfile::tempdir().unwrap();
    let mut hub = spawn_hub(spool.path().to_path_buf()).await;
    let console = hub.console();

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    let alice_id = alice.login.client_id;
    console.logout().await;

    for c in [&mut alice, &mut bob] {
        match c.recv_until(|m| matches!(m, Message::UserLeft { .. })).await {
            Message::UserLeft { id, .. } => assert_eq!(id, 0),
            _ => unreachable!(),
        }
        match c.recv_until(|m| matches!(m, Message::HostChanged { .. })).await {
            Message::HostChanged { host_id } => assert_eq!(host_id, alice_id),
            _ => unreachable!(),
        }
    }

    // a late joiner sees alice as host
    let carol = TestClient::connect(hub.control_addr, "carol").await;
    assert_eq!(carol.login.host_id, alice_id);
    let host_entry = carol.login.participants.iter().find(|p| p.is_host).unwrap();
    assert_eq!(host_entry.name, "alice");

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_broadcasts_notice() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let shutdown = tokio::spawn(hub.shutdown());

    alice.recv_until(|m| matches!(m, Message::ServerShutdown)).await;
    shutdown.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_names_are_rejected() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let err = TestClient::try_connect(hub.control_addr, "   ").await.unwrap_err();
    assert!(err.contains("display name"));

    let long = "x".repeat(51);
    let err = TestClient::try_connect(hub.control_addr, &long).await.unwrap_err();
    assert!(err.contains("too long"));

    // duplicates are fine, disambiguated by id
    let a = TestClient::connect(hub.control_addr, "twin").await;
    let b = TestClient::connect(hub.control_addr, "twin").await;
    assert_ne!(a.id(), b.id());

    hub.shutdown().await;
}
