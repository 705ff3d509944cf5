//! A fake RCON server speaking the real wire format, shared by the
//! integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use rcon_protocol::{AUTH, AUTH_FAILED, AUTH_RESPONSE, Decoded, END, EXEC_COMMAND, MID, RESPONSE_VALUE};
use server_core::config::{CommandConfig, HeartbeatConfig, RconConfig, ReconnectConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const PASSWORD: &str = "hunter2";

/// Chunks of raw bytes to write in answer to one command body.
pub type Responder = Arc<dyn Fn(&str, u16) -> Vec<Vec<u8>> + Send + Sync>;

pub async fn spawn_server(responder: Responder) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(stream, responder.clone()));
        }
    });
    addr
}

pub async fn serve_connection(mut stream: TcpStream, responder: Responder) {
    let mut buf = BytesMut::new();
    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        loop {
            let Decoded::Frame { frame, consumed } = rcon_protocol::decode(&buf) else {
                break;
            };
            buf.advance(consumed);
            match frame.kind {
                AUTH => {
                    let chunks: Vec<Vec<u8>> = if frame.body_text() == PASSWORD {
                        vec![
                            rcon_protocol::encode(RESPONSE_VALUE, MID, frame.count, b"")
                                .unwrap()
                                .to_vec(),
                            rcon_protocol::encode(AUTH_RESPONSE, END, frame.count, b"")
                                .unwrap()
                                .to_vec(),
                        ]
                    } else {
                        vec![
                            rcon_protocol::encode(AUTH_RESPONSE, AUTH_FAILED, frame.count, b"")
                                .unwrap()
                                .to_vec(),
                        ]
                    };
                    for chunk in chunks {
                        if stream.write_all(&chunk).await.is_err() {
                            return;
                        }
                    }
                }
                EXEC_COMMAND if frame.id == MID => {
                    for chunk in responder(&frame.body_text(), frame.count) {
                        if stream.write_all(&chunk).await.is_err() {
                            return;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// A responder that echoes every command in a single END frame.
pub fn simple_responder() -> Responder {
    Arc::new(|command, seq| {
        let body = format!("echo: {command}");
        vec![
            rcon_protocol::encode(RESPONSE_VALUE, MID, seq, body.as_bytes())
                .unwrap()
                .to_vec(),
            rcon_protocol::encode(RESPONSE_VALUE, END, seq, b"")
                .unwrap()
                .to_vec(),
        ]
    })
}

/// Wraps a plain text answer into the usual MID + END pair.
pub fn text_response(seq: u16, body: &str) -> Vec<Vec<u8>> {
    vec![
        rcon_protocol::encode(RESPONSE_VALUE, MID, seq, body.as_bytes())
            .unwrap()
            .to_vec(),
        rcon_protocol::encode(RESPONSE_VALUE, END, seq, b"")
            .unwrap()
            .to_vec(),
    ]
}

/// Fast timings for tests; heartbeat off, no retries.
pub fn rcon_config(addr: SocketAddr, password: &str) -> RconConfig {
    RconConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        password: password.to_owned(),
        connect_timeout_ms: 2_000,
        reconnect: ReconnectConfig {
            enabled: true,
            initial_delay_ms: 50,
            max_delay_ms: 200,
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 0,
        },
        command: CommandConfig {
            timeout_ms: 300,
            retries: 0,
        },
        heartbeat: HeartbeatConfig {
            enabled: false,
            interval_ms: 15_000,
            command: String::new(),
        },
    }
}
