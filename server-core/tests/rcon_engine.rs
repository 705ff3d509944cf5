//! End-to-end exercises of the RCON engine against an in-process fake
//! server speaking the real wire format.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{PASSWORD, Responder, rcon_config, simple_responder, spawn_server, text_response};
use bytes::BytesMut;
use rcon_protocol::{AUTH, AUTH_RESPONSE, Decoded, END, MID, RESPONSE_VALUE};
use server_core::bus::EventBus;
use server_core::error::{CommandError, ConnectionError};
use server_core::rcon::{ConnectionState, RconEngine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn wait_for_state(engine: &RconEngine, wanted: ConnectionState) {
    let mut rx = engine.watch_state();
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if *rx.borrow() == wanted {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {wanted:?}"));
}

#[tokio::test]
async fn authenticates_and_connects() {
    let addr = spawn_server(simple_responder()).await;
    let engine = RconEngine::new(rcon_config(addr, PASSWORD), EventBus::new());
    engine.connect().await.unwrap();
    assert_eq!(engine.state(), ConnectionState::Connected);
    engine.destroy().await;
}

#[tokio::test]
async fn wrong_password_fails_without_reconnect() {
    let addr = spawn_server(simple_responder()).await;
    let engine = RconEngine::new(rcon_config(addr, "wrong"), EventBus::new());
    match engine.connect().await {
        Err(ConnectionError::AuthFailed) => {}
        other => panic!("expected AuthFailed, got {other:?}"),
    }
    // The auth loop never reconnects on its own.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.state(), ConnectionState::Disconnected);
    engine.destroy().await;
}

#[tokio::test]
async fn split_responses_arrive_whole_and_parse() {
    let responder: Responder = Arc::new(|command, seq| {
        if command == "ListPlayers" {
            let one = "ID: 0 | Online IDs: EOS: 0002a10186d9414496bf20d22d3860ba steam: 76561198012345678 | Name: Yuri | Team ID: 1 | Squad ID: 2 | Is Leader: True | Role: USA_Rifleman_01\n";
            let two = "ID: 1 | Online IDs: EOS: 0002a10186d9414496bf20d22d3860bb | Name: Ana | Team ID: 2 | Squad ID: N/A | Is Leader: False | Role: RGF_Medic_01\n";
            vec![
                rcon_protocol::encode(RESPONSE_VALUE, MID, seq, one.as_bytes()).unwrap().to_vec(),
                rcon_protocol::encode(RESPONSE_VALUE, MID, seq, two.as_bytes()).unwrap().to_vec(),
                rcon_protocol::encode(RESPONSE_VALUE, END, seq, b"").unwrap().to_vec(),
            ]
        } else {
            vec![rcon_protocol::encode(RESPONSE_VALUE, END, seq, b"").unwrap().to_vec()]
        }
    });
    let addr = spawn_server(responder).await;
    let engine = RconEngine::new(rcon_config(addr, PASSWORD), EventBus::new());
    engine.connect().await.unwrap();

    let players = engine.list_players().await.unwrap();
    assert_eq!(players.len(), 2);
    assert_eq!(players[0].name, "Yuri");
    assert!(players[0].is_leader);
    assert_eq!(players[1].team_id.unwrap().value(), 2);
    engine.destroy().await;
}

#[tokio::test]
async fn broken_stub_before_the_response_is_skipped() {
    let responder: Responder = Arc::new(|_, seq| {
        let mut stub = vec![0u8; rcon_protocol::BROKEN_STUB_LEN];
        stub[..4].copy_from_slice(&10u32.to_le_bytes());
        stub[15] = 1;
        vec![
            stub,
            rcon_protocol::encode(RESPONSE_VALUE, MID, seq, b"after the stub")
                .unwrap()
                .to_vec(),
            rcon_protocol::encode(RESPONSE_VALUE, END, seq, b"").unwrap().to_vec(),
        ]
    });
    let addr = spawn_server(responder).await;
    let engine = RconEngine::new(rcon_config(addr, PASSWORD), EventBus::new());
    engine.connect().await.unwrap();
    assert_eq!(engine.execute("anything").await.unwrap(), "after the stub");
    engine.destroy().await;
}

#[tokio::test]
async fn unanswered_commands_time_out() {
    let responder: Responder = Arc::new(|command, seq| {
        if command == "Slow" {
            Vec::new()
        } else {
            text_response(seq, "ok")
        }
    });
    let addr = spawn_server(responder).await;
    let engine = RconEngine::new(rcon_config(addr, PASSWORD), EventBus::new());
    engine.connect().await.unwrap();
    match engine.execute("Slow").await {
        Err(CommandError::Timeout) => {}
        other => panic!("expected Timeout, got {other:?}"),
    }
    // The engine still works afterwards.
    assert_eq!(engine.execute("Fine").await.unwrap(), "ok");
    engine.destroy().await;
}

#[tokio::test]
async fn reconnects_after_the_server_drops_the_connection() {
    // First connection is dropped right after auth; later ones stay up.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut first = true;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if first {
                first = false;
                // Complete the handshake, then hang up.
                let mut buf = BytesMut::new();
                loop {
                    if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                        break;
                    }
                    if let Decoded::Frame { frame, .. } = rcon_protocol::decode(&buf)
                        && frame.kind == AUTH
                    {
                        let _ = stream
                            .write_all(
                                &rcon_protocol::encode(AUTH_RESPONSE, END, frame.count, b"")
                                    .unwrap(),
                            )
                            .await;
                        break;
                    }
                }
                drop(stream);
            } else {
                tokio::spawn(common::serve_connection(stream, simple_responder()));
            }
        }
    });

    let mut retrying = rcon_config(addr, PASSWORD);
    retrying.command.retries = 2;
    let engine = RconEngine::new(retrying, EventBus::new());
    engine.connect().await.unwrap();
    // Give the drop time to be noticed and the backoff to run.
    tokio::time::sleep(Duration::from_millis(200)).await;
    wait_for_state(&engine, ConnectionState::Connected).await;
    assert_eq!(engine.execute("ping").await.unwrap(), "echo: ping");
    engine.destroy().await;
}

#[tokio::test]
async fn destroy_aborts_pending_commands_and_is_idempotent() {
    let responder: Responder = Arc::new(|_, _| Vec::new());
    let addr = spawn_server(responder).await;
    let engine = RconEngine::new(rcon_config(addr, PASSWORD), EventBus::new());
    engine.connect().await.unwrap();

    let pending = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute("Hang").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.destroy().await;
    match pending.await.unwrap() {
        Err(CommandError::Aborted(_)) => {}
        other => panic!("expected Aborted, got {other:?}"),
    }
    engine.destroy().await;
    assert_eq!(engine.state(), ConnectionState::Destroyed);
}
