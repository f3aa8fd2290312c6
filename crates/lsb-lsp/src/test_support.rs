//! In-process fake language server used by the crate's async tests. The
//! client talks to it over a `tokio::io::duplex` pair, so no real server
//! process is ever spawned.

use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::client::LspClient;
use crate::transport::{FrameCodec, encode_frame};

pub(crate) enum Reply {
    /// Respond with this result.
    Result(Value),
    /// Respond with this result, then push extra raw messages (e.g.
    /// notifications or server-initiated requests).
    ResultWith(Value, Vec<Value>),
    /// Respond after a delay; lets tests interleave responses out of order.
    DelayedResult(Duration, Value),
    /// Respond with a JSON-RPC error.
    Error(i64, String),
    /// Never respond (drives the timeout path).
    Silence,
    /// Close the connection without responding.
    HangUp,
}

pub(crate) struct TestServer {
    pub(crate) client: Arc<LspClient>,
    received: Arc<StdMutex<Vec<Value>>>,
}

impl TestServer {
    pub(crate) fn start<F>(mut handler: F) -> Self
    where
        F: FnMut(&str, &Value) -> Reply + Send + 'static,
    {
        let request_timeout = Duration::from_secs(5);
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (mut server_read, server_write) = tokio::io::split(server_io);

        let root = std::env::temp_dir();
        let client = LspClient::connect(client_write, client_read, None, &root, request_timeout);

        let received: Arc<StdMutex<Vec<Value>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen = received.clone();

        tokio::spawn(async move {
            let writer = Arc::new(Mutex::new(server_write));
            let mut codec = FrameCodec::new();
            let mut buf = [0u8; 8192];

            'outer: loop {
                let n = match server_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                codec.push_bytes(&buf[..n]);

                while let Ok(Some(message)) = codec.next_frame() {
                    seen.lock().unwrap().push(message.clone());

                    let (Some(method), Some(id)) = (
                        message.get("method").and_then(|m| m.as_str()),
                        message.get("id").cloned(),
                    ) else {
                        continue;
                    };

                    let params = message.get("params").cloned().unwrap_or(Value::Null);
                    match handler(method, &params) {
                        Reply::Result(result) => {
                            write_frame(&writer, &rpc_result(&id, result)).await;
                        }
                        Reply::ResultWith(result, extra) => {
                            write_frame(&writer, &rpc_result(&id, result)).await;
                            for message in extra {
                                write_frame(&writer, &message).await;
                            }
                        }
                        Reply::DelayedResult(delay, result) => {
                            let writer = writer.clone();
                            let response = rpc_result(&id, result);
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                write_frame(&writer, &response).await;
                            });
                        }
                        Reply::Error(code, text) => {
                            let response = json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "error": { "code": code, "message": text }
                            });
                            write_frame(&writer, &response).await;
                        }
                        Reply::Silence => {}
                        Reply::HangUp => break 'outer,
                    }
                }
            }
        });

        Self { client, received }
    }

    pub(crate) fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub(crate) fn saw_method(&self, method: &str) -> bool {
        self.received()
            .iter()
            .any(|m| m.get("method").and_then(|v| v.as_str()) == Some(method))
    }

    pub(crate) fn methods_seen(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m.get("method").and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

async fn write_frame<W>(writer: &Arc<Mutex<WriteHalf<W>>>, message: &Value)
where
    W: tokio::io::AsyncWrite,
{
    let Ok(frame) = encode_frame(message) else {
        return;
    };
    let mut guard = writer.lock().await;
    let _ = guard.write_all(&frame).await;
    let _ = guard.flush().await;
}

/// Baseline LSP behavior shared by most tests: a successful handshake and a
/// clean shutdown. Compose with a test-specific match on top.
pub(crate) fn lsp_basics(method: &str) -> Option<Reply> {
    match method {
        "initialize" => Some(Reply::Result(json!({
            "capabilities": {
                "textDocumentSync": 1,
                "hoverProvider": true,
                "definitionProvider": true,
                "referencesProvider": true,
                "documentSymbolProvider": true,
                "renameProvider": true,
                "workspaceSymbolProvider": true
            }
        }))),
        "shutdown" => Some(Reply::Result(Value::Null)),
        _ => None,
    }
}
