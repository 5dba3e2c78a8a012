//! Shared utilities for the proxy integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bson::{doc, Document};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use mongo_audit_proxy::audit::{AuditError, AuditRecord, AuditSink};
use mongo_audit_proxy::config::ProxyConfig;
use mongo_audit_proxy::lifecycle::Shutdown;
use mongo_audit_proxy::net::listener::{Listener, ListenerError};
use mongo_audit_proxy::wire::{OpCode, StreamReassembler};
use mongo_audit_proxy::ProxyServer;

pub const OP_MSG: i32 = 2013;

/// Build a raw wire message with the given header fields and body.
pub fn raw_message(request_id: i32, response_to: i32, op_code: i32, body: &[u8]) -> Vec<u8> {
    let length = (16 + body.len()) as i32;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&request_id.to_le_bytes());
    out.extend_from_slice(&response_to.to_le_bytes());
    out.extend_from_slice(&op_code.to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Build an OP_MSG with a single kind-0 body section.
pub fn op_msg(request_id: i32, response_to: i32, doc: &Document) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(0);
    doc.to_writer(&mut body).expect("serialize document");
    raw_message(request_id, response_to, OP_MSG, &body)
}

/// Decode the body document of an OP_MSG built by [`op_msg`].
pub fn body_of(message: &[u8]) -> Document {
    Document::from_reader(&message[21..]).expect("decode body")
}

/// Sink that keeps every record it is given.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Poll until at least `count` records arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<AuditRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = self.records();
            if records.len() >= count || tokio::time::Instant::now() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl AuditSink for RecordingSink {
    fn emit(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Upstream that writes back every byte it receives.
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Upstream that answers OP_MSG requests.
///
/// `reply` gets the request id and body and returns the `responseTo` and
/// body of the reply, or `None` to stay silent. Non-OP_MSG messages are
/// ignored.
pub async fn start_mongo_upstream<F>(reply: F) -> SocketAddr
where
    F: Fn(i32, &Document) -> Option<(i32, Document)> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let reply = Arc::new(reply);

    tokio::spawn(async move {
        let mut next_id = 1000;
        while let Ok((mut socket, _)) = listener.accept().await {
            let reply = Arc::clone(&reply);
            next_id += 1000;
            let mut reply_id = next_id;
            tokio::spawn(async move {
                let mut reassembler = StreamReassembler::new(1 << 20);
                let mut buf = vec![0u8; 4096];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let mut out = Vec::new();
                    for frame in reassembler.feed(&buf[..n]) {
                        let Ok(frame) = frame else { return };
                        if frame.header.op_code() != OpCode::Msg {
                            continue;
                        }
                        let request = body_of(&frame.bytes);
                        if let Some((response_to, body)) = reply(frame.header.request_id, &request) {
                            reply_id += 1;
                            out.extend(op_msg(reply_id, response_to, &body));
                        }
                    }
                    if !out.is_empty() && socket.write_all(&out).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

/// Upstream that acknowledges every command with `{ n: 1, ok: 1 }`.
pub async fn start_acking_upstream() -> SocketAddr {
    start_mongo_upstream(|request_id, _| Some((request_id, doc! { "n": 1, "ok": 1.0 }))).await
}

/// A proxy running in the background.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub sink: Arc<RecordingSink>,
    pub handle: JoinHandle<Result<(), ListenerError>>,
}

impl RunningProxy {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }
}

/// Start a proxy on an ephemeral port in front of `upstream`.
pub async fn start_proxy(upstream: SocketAddr, tweak: impl FnOnce(&mut ProxyConfig)) -> RunningProxy {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.uri = format!("mongodb://{}", upstream);
    config.upstream.connect_timeout_secs = 2;
    config.shutdown.drain_timeout_secs = 2;
    tweak(&mut config);

    let sink = Arc::new(RecordingSink::default());
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(&config, sink.clone()).unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    RunningProxy {
        addr,
        shutdown,
        sink,
        handle,
    }
}

/// Read exactly `len` bytes, failing the test after a few seconds.
pub async fn read_n(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

/// Whether the peer closes the connection within a few seconds.
pub async fn closes_soon(stream: &mut TcpStream) -> bool {
    let mut sink = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut sink))
        .await
        .is_ok()
}
