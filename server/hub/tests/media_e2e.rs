//! Datagram fan-out over real UDP sockets, and heartbeat-driven eviction.

mod common;

use std::time::Duration;

use common::{spawn_hub, test_config, TestClient};
use lm_hub::Hub;
use lm_proto::datagram::AudioHeader;
use lm_proto::message::Message;
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn media_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

fn audio_packet(id: u32, ts: u32) -> Vec<u8> {
    AudioHeader { client_id: id, timestamp: ts }.encode(&[0x5A; 160]).to_vec()
}

/// Send `packet` from `from` until `to` observes a datagram or attempts run
/// out; LAN loopback makes the first try land almost always.
async fn pump_until_received(
    hub: &Hub,
    from: &UdpSocket,
    to: &UdpSocket,
    packet: &[u8],
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 64 * 1024];
    for _ in 0..20 {
        from.send_to(packet, hub.audio_addr).await.unwrap();
        if let Ok(Ok((n, _))) = timeout(Duration::from_millis(100), to.recv_from(&mut buf)).await {
            return Some(buf[..n].to_vec());
        }
    }
    None
}

/// Discard anything still buffered on `sock`.
async fn drain(sock: &UdpSocket) {
    let mut buf = vec![0u8; 64 * 1024];
    while timeout(Duration::from_millis(200), sock.recv_from(&mut buf)).await.is_ok() {}
}

async fn assert_no_delivery(hub: &Hub, from: &UdpSocket, to: &UdpSocket, packet: &[u8]) {
    drain(to).await;
    let mut buf = vec![0u8; 64 * 1024];
    for _ in 0..5 {
        from.send_to(packet, hub.audio_addr).await.unwrap();
    }
    assert!(
        timeout(Duration::from_millis(300), to.recv_from(&mut buf)).await.is_err(),
        "datagram was forwarded despite policy"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn audio_fans_out_and_respects_force_mute() {
    let spool = tempfile::tempdir().unwrap();
    let mut hub = spawn_hub(spool.path().to_path_buf()).await;
    let console = hub.console();

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    let mut bob = TestClient::connect(hub.control_addr, "bob").await;

    // both report live microphones
    alice.send(Message::MediaState { video_on: false, audio_on: true, id: None }).await;
    bob.send(Message::MediaState { video_on: false, audio_on: true, id: None }).await;
    alice
        .recv_until(|m| matches!(m, Message::MediaState { id: Some(id), .. } if *id == 2))
        .await;

    let alice_udp = media_socket().await;
    let bob_udp = media_socket().await;

    // bob's first datagram teaches the hub his endpoint
    bob_udp.send_to(&audio_packet(bob.id(), 1), hub.audio_addr).await.unwrap();

    let got = pump_until_received(&hub, &alice_udp, &bob_udp, &audio_packet(alice.id(), 2)).await;
    let got = got.expect("bob should receive alice's audio");
    // forwarded verbatim, header included
    let hdr = AudioHeader::parse(&got).unwrap();
    assert_eq!(hdr.client_id, alice.id());

    // the sender is never a recipient of its own stream
    let mut buf = [0u8; 2048];
    assert!(timeout(Duration::from_millis(200), alice_udp.recv_from(&mut buf)).await.is_err());

    // force mute: subsequent datagrams from alice are dropped by policy
    console.force_mute(alice.id()).await;
    alice.recv_until(|m| matches!(m, Message::ForceMute { .. })).await;
    assert_no_delivery(&hub, &alice_udp, &bob_udp, &audio_packet(alice.id(), 3)).await;

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn datagrams_with_unknown_ids_are_discarded() {
    let spool = tempfile::tempdir().unwrap();
    let hub = spawn_hub(spool.path().to_path_buf()).await;

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    alice.send(Message::MediaState { video_on: false, audio_on: true, id: None }).await;
    alice
        .recv_until(|m| matches!(m, Message::MediaState { id: Some(id), .. } if *id == 1))
        .await;

    let alice_udp = media_socket().await;
    let stranger = media_socket().await;
    alice_udp.send_to(&audio_packet(alice.id(), 1), hub.audio_addr).await.unwrap();

    // a forged id that was never admitted reaches nobody
    assert_no_delivery(&hub, &stranger, &alice_udp, &audio_packet(999, 1)).await;

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_timeout_evicts_and_broadcasts() {
    let spool = tempfile::tempdir().unwrap();
    let mut cfg = test_config(spool.path().to_path_buf());
    cfg.heartbeat_soft_s = 1;
    cfg.heartbeat_hard_s = 2;
    let hub = Hub::spawn(cfg).await.unwrap();

    let alice = TestClient::connect(hub.control_addr, "alice").await;
    let bob = TestClient::connect(hub.control_addr, "bob").await;

    // bob keeps heartbeating from the write half; alice goes silent
    let alice_id = alice.id();
    let (mut bob_rd, mut bob_wr, _) = bob.split();
    let keepalive = tokio::spawn(async move {
        loop {
            bob_wr.send(Message::Heartbeat).await;
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
    });

    let left = timeout(
        Duration::from_secs(10),
        bob_rd.recv_until(|m| matches!(m, Message::UserLeft { .. })),
    )
    .await
    .expect("eviction within hard timeout + slack");
    match left {
        Message::UserLeft { id, reason } => {
            assert_eq!(id, alice_id);
            assert_eq!(reason.as_deref(), Some("timeout"));
        }
        _ => unreachable!(),
    }
    keepalive.abort();

    // bob survived the whole time
    let carol = TestClient::connect(hub.control_addr, "carol").await;
    let names: Vec<_> = carol.login.participants.iter().map(|p| p.name.clone()).collect();
    assert!(names.contains(&"bob".to_string()));
    assert!(!names.contains(&"alice".to_string()));

    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn steady_heartbeats_prevent_eviction() {
    let spool = tempfile::tempdir().unwrap();
    let mut cfg = test_config(spool.path().to_path_buf());
    cfg.heartbeat_soft_s = 1;
    cfg.heartbeat_hard_s = 2;
    let hub = Hub::spawn(cfg).await.unwrap();

    let mut alice = TestClient::connect(hub.control_addr, "alice").await;
    for _ in 0..6 {
        alice.send(Message::Heartbeat).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // still admitted after 3 s of hard-timeout-sized silence windows
    let carol = TestClient::connect(hub.control_addr, "carol").await;
    assert!(carol.login.participants.iter().any(|p| p.name == "alice"));

    hub.shutdown().await;
}
