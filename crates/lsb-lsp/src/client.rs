use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use lsb_core::error::{BrokerError, Result};

use crate::diagnostics::DiagnosticsStore;
use crate::proto::{
    self, Diagnostic, Position, PublishDiagnosticsParams, TextDocumentIdentifier,
};
use crate::transport::{FrameCodec, encode_frame};

#[derive(Debug, Clone)]
pub struct LspClientOptions {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub request_timeout: Duration,
}

struct PendingRequest {
    method: String,
    reply: oneshot::Sender<Result<Value>>,
}

struct ClientState {
    next_id: i64,
    pending: HashMap<i64, PendingRequest>,
}

/// JSON-RPC client for one language server process.
///
/// One writer task owns the server's input stream so message order is
/// preserved; one reader task drains framed messages and routes them by
/// shape: responses to pending callers, server requests to the static
/// answer table, notifications to the dispatcher.
pub struct LspClient {
    outgoing: mpsc::UnboundedSender<Value>,
    state: Arc<Mutex<ClientState>>,
    diagnostics: Arc<DiagnosticsStore>,
    capabilities: OnceLock<Value>,
    alive: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
    root_uri: String,
    default_request_timeout: Duration,
}

impl LspClient {
    /// Spawn the server process and wire up the reader/writer tasks. The
    /// handshake is not performed here; see [`crate::capabilities`].
    pub async fn spawn(options: &LspClientOptions, root: &Path) -> Result<Arc<Self>> {
        let mut command = Command::new(&options.command);
        command
            .args(&options.args)
            .current_dir(&options.cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            BrokerError::Transport(format!(
                "failed to spawn language server {}: {e}",
                options.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrokerError::Transport("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrokerError::Transport("failed to capture server stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(stderr);
        }

        Ok(Self::connect(
            stdin,
            stdout,
            Some(child),
            root,
            options.request_timeout,
        ))
    }

    /// Attach to an already-connected duplex transport. Production callers
    /// go through [`LspClient::spawn`]; tests drive this with in-process
    /// streams.
    pub fn connect<W, R>(
        writer: W,
        reader: R,
        child: Option<Child>,
        root: &Path,
        request_timeout: Duration,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let root_uri = url::Url::from_directory_path(root)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", root.display()));

        let client = Arc::new(Self {
            outgoing,
            state: Arc::new(Mutex::new(ClientState {
                next_id: 1,
                pending: HashMap::new(),
            })),
            diagnostics: Arc::new(DiagnosticsStore::new()),
            capabilities: OnceLock::new(),
            alive: Arc::new(AtomicBool::new(true)),
            child: Mutex::new(child),
            root_uri,
            default_request_timeout: request_timeout,
        });

        client.spawn_writer(writer, outgoing_rx);
        client.spawn_reader(reader);
        client
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticsStore> {
        self.diagnostics.clone()
    }

    pub fn root_uri(&self) -> &str {
        &self.root_uri
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Negotiated server capabilities, available after the handshake.
    pub fn server_capabilities(&self) -> Option<&Value> {
        self.capabilities.get()
    }

    pub(crate) fn record_capabilities(&self, capabilities: Value) {
        let _ = self.capabilities.set(capabilities);
    }

    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout_override: Option<Duration>,
    ) -> Result<Value> {
        if !self.is_alive() {
            return Err(BrokerError::Transport(
                "language server process has exited".into(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;
            state.pending.insert(id, PendingRequest {
                method: method.to_string(),
                reply: tx,
            });
            id
        };

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if self.outgoing.send(message).is_err() {
            self.remove_pending(id).await;
            return Err(BrokerError::Transport("server writer is closed".into()));
        }

        let wait = timeout_override.unwrap_or(self.default_request_timeout);
        match timeout(wait, rx).await {
            Err(_) => {
                self.remove_pending(id).await;
                // Cooperative servers stop working on the request.
                let _ = self.notify("$/cancelRequest", json!({ "id": id }));
                Err(BrokerError::Timeout {
                    method: method.to_string(),
                })
            }
            Ok(Err(_)) => Err(BrokerError::Transport(
                "language server closed the connection".into(),
            )),
            Ok(Ok(result)) => result,
        }
    }

    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.outgoing
            .send(message)
            .map_err(|_| BrokerError::Transport("server writer is closed".into()))
    }

    /// Graceful teardown: `shutdown`, `exit`, a short grace interval, then
    /// kill whatever is left.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self
            .request("shutdown", Value::Null, Some(Duration::from_secs(2)))
            .await;
        let _ = self.notify("exit", Value::Null);

        let child = {
            let mut guard = self.child.lock().await;
            guard.take()
        };
        if let Some(mut child) = child {
            if timeout(grace, child.wait()).await.is_err() {
                warn!("language server did not exit within grace interval; killing");
                let _ = child.kill().await;
            }
            let _ = child.wait().await;
        }
        self.alive.store(false, Ordering::Release);
    }

    async fn remove_pending(&self, id: i64) {
        let mut state = self.state.lock().await;
        state.pending.remove(&id);
    }

    fn spawn_writer<W>(self: &Arc<Self>, mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let alive = self.alive.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let frame = match encode_frame(&message) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("failed to encode outgoing message: {err:#}");
                        continue;
                    }
                };
                if let Err(err) = writer.write_all(&frame).await {
                    debug!("server stdin closed: {err}");
                    break;
                }
                if let Err(err) = writer.flush().await {
                    debug!("server stdin flush failed: {err}");
                    break;
                }
            }
            alive.store(false, Ordering::Release);
        });
    }

    fn spawn_reader<R>(self: &Arc<Self>, mut reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let client = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut codec = FrameCodec::new();
            let mut buf = [0u8; 8192];
            'outer: loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        debug!("server stdout read failed: {err}");
                        break;
                    }
                };
                codec.push_bytes(&buf[..n]);

                loop {
                    match codec.next_frame() {
                        Ok(Some(message)) => {
                            let Some(client) = client.upgrade() else {
                                break 'outer;
                            };
                            client.dispatch(message).await;
                        }
                        Ok(None) => break,
                        Err(err) => warn!("malformed server message: {err:#}"),
                    }
                }
            }

            if let Some(client) = client.upgrade() {
                client.on_transport_closed().await;
            }
        });
    }

    async fn on_transport_closed(&self) {
        self.alive.store(false, Ordering::Release);
        let pending = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.pending)
        };
        for (_, entry) in pending {
            let _ = entry.reply.send(Err(BrokerError::Transport(format!(
                "server exited with request in flight: {}",
                entry.method
            ))));
        }
    }

    async fn dispatch(&self, message: Value) {
        let method = message
            .get("method")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string());
        let id = message.get("id").cloned();

        match (method.as_deref(), id) {
            // Server-initiated request.
            (Some(method), Some(id)) => {
                let response = answer_server_request(method, message.get("params"), &self.root_uri);
                let reply = match response {
                    Some(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                    None => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32601, "message": format!("method not found: {method}") }
                    }),
                };
                if self.outgoing.send(reply).is_err() {
                    debug!("dropping reply to server request {method}: writer closed");
                }
            }
            // Notification.
            (Some(method), None) => self.dispatch_notification(method, message).await,
            // Response.
            (None, Some(_)) => self.dispatch_response(message).await,
            (None, None) => debug!("ignoring message with neither id nor method"),
        }
    }

    async fn dispatch_notification(&self, method: &str, message: Value) {
        match method {
            "textDocument/publishDiagnostics" => {
                let Some(params) = message.get("params") else {
                    return;
                };
                match serde_json::from_value::<PublishDiagnosticsParams>(params.clone()) {
                    Ok(p) => self.diagnostics.record(p.uri, p.diagnostics).await,
                    Err(err) => warn!("failed to parse publishDiagnostics params: {err}"),
                }
            }
            "window/logMessage" | "window/showMessage" => {
                let text = message
                    .get("params")
                    .and_then(|p| p.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("");
                debug!(target: "lsp.server", "{text}");
            }
            "$/progress" | "telemetry/event" => {}
            other => debug!("unhandled server notification: {other}"),
        }
    }

    async fn dispatch_response(&self, message: Value) {
        let id = match message.get("id") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse::<i64>().ok(),
            _ => None,
        };
        let Some(id) = id else {
            debug!("response with unusable id");
            return;
        };

        let entry = {
            let mut state = self.state.lock().await;
            state.pending.remove(&id)
        };
        let Some(entry) = entry else {
            debug!("response for unknown or timed-out request id: {id}");
            return;
        };

        let outcome = if let Some(error) = message.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let text = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string();
            if BrokerError::is_method_not_found(code) {
                Err(BrokerError::unsupported_method(&entry.method))
            } else {
                Err(BrokerError::ServerError {
                    code,
                    message: text,
                })
            }
        } else {
            Ok(message.get("result").cloned().unwrap_or(Value::Null))
        };

        let _ = entry.reply.send(outcome);
    }
}

// --- typed wrappers over the common LSP methods ---

impl LspClient {
    fn position_params(&self, path: &Path, position: Position) -> Result<Value> {
        let uri = proto::path_to_uri(path)?;
        Ok(serde_json::to_value(proto::TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri },
            position,
        })
        .unwrap_or(Value::Null))
    }

    pub async fn hover(&self, path: &Path, position: Position) -> Result<Value> {
        let params = self.position_params(path, position)?;
        self.request("textDocument/hover", params, None).await
    }

    pub async fn definition(&self, path: &Path, position: Position) -> Result<Value> {
        let params = self.position_params(path, position)?;
        self.request("textDocument/definition", params, None).await
    }

    pub async fn references(
        &self,
        path: &Path,
        position: Position,
        include_declaration: bool,
    ) -> Result<Value> {
        let uri = proto::path_to_uri(path)?;
        let params = json!({
            "textDocument": { "uri": uri },
            "position": position,
            "context": { "includeDeclaration": include_declaration }
        });
        self.request("textDocument/references", params, None).await
    }

    pub async fn document_symbols(&self, path: &Path) -> Result<Value> {
        let uri = proto::path_to_uri(path)?;
        let params = json!({ "textDocument": { "uri": uri } });
        self.request("textDocument/documentSymbol", params, None)
            .await
    }

    pub async fn workspace_symbols(&self, query: &str) -> Result<Value> {
        self.request("workspace/symbol", json!({ "query": query }), None)
            .await
    }

    pub async fn rename(&self, path: &Path, position: Position, new_name: &str) -> Result<Value> {
        let uri = proto::path_to_uri(path)?;
        let params = json!({
            "textDocument": { "uri": uri },
            "position": position,
            "newName": new_name
        });
        self.request("textDocument/rename", params, None).await
    }

    pub async fn completion(&self, path: &Path, position: Position) -> Result<Value> {
        let params = self.position_params(path, position)?;
        self.request("textDocument/completion", params, None).await
    }

    pub async fn signature_help(&self, path: &Path, position: Position) -> Result<Value> {
        let params = self.position_params(path, position)?;
        self.request("textDocument/signatureHelp", params, None)
            .await
    }

    pub async fn code_actions(
        &self,
        path: &Path,
        range: proto::Range,
        diagnostics: Value,
    ) -> Result<Value> {
        let uri = proto::path_to_uri(path)?;
        let params = json!({
            "textDocument": { "uri": uri },
            "range": range,
            "context": { "diagnostics": diagnostics }
        });
        self.request("textDocument/codeAction", params, None).await
    }

    pub async fn format_document(&self, path: &Path, options: Value) -> Result<Value> {
        let uri = proto::path_to_uri(path)?;
        let params = json!({ "textDocument": { "uri": uri }, "options": options });
        self.request("textDocument/formatting", params, None).await
    }

    pub async fn format_range(
        &self,
        path: &Path,
        range: proto::Range,
        options: Value,
    ) -> Result<Value> {
        let uri = proto::path_to_uri(path)?;
        let params = json!({
            "textDocument": { "uri": uri },
            "range": range,
            "options": options
        });
        self.request("textDocument/rangeFormatting", params, None)
            .await
    }

    /// Pull diagnostics with a push-snapshot fallback: servers without pull
    /// support answer `-32601`, which collapses into the stored snapshot.
    pub async fn pull_diagnostics(&self, path: &Path) -> Result<Vec<Diagnostic>> {
        let uri = proto::path_to_uri(path)?;

        let advertises_pull = self
            .server_capabilities()
            .map(|caps| caps.get("diagnosticProvider").is_some())
            .unwrap_or(false);
        if !advertises_pull {
            return Ok(self.diagnostics.get(&uri).await);
        }

        let params = json!({ "textDocument": { "uri": uri } });
        match self.request("textDocument/diagnostic", params, None).await {
            Ok(report) => {
                // DocumentDiagnosticReport: { kind: "full", items: [...] } or
                // { kind: "unchanged" }.
                let Some(items) = report.get("items").and_then(|v| v.as_array()) else {
                    return Ok(self.diagnostics.get(&uri).await);
                };
                let parsed: Vec<Diagnostic> =
                    serde_json::from_value(Value::Array(items.clone())).map_err(|e| {
                        BrokerError::Transport(format!("malformed diagnostic report: {e}"))
                    })?;
                Ok(parsed
                    .into_iter()
                    .filter(|d| d.range.start != d.range.end)
                    .collect())
            }
            Err(BrokerError::Unsupported(_)) => Ok(self.diagnostics.get(&uri).await),
            Err(err) => Err(err),
        }
    }
}

/// Static answer table for server-initiated requests. `None` means the
/// method is not supported and the caller responds `-32601`.
fn answer_server_request(method: &str, params: Option<&Value>, root_uri: &str) -> Option<Value> {
    match method {
        // Servers pull settings through workspace/configuration; answering
        // nulls means "use your defaults".
        "workspace/configuration" => {
            let count = params
                .and_then(|p| p.get("items"))
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            Some(Value::Array(vec![Value::Null; count]))
        }
        "workspace/workspaceFolders" => Some(json!([{
            "uri": root_uri,
            "name": "workspace"
        }])),
        "client/registerCapability" | "client/unregisterCapability" => Some(Value::Null),
        "window/workDoneProgress/create" => Some(Value::Null),
        "window/showMessageRequest" => Some(Value::Null),
        "workspace/applyEdit" => Some(json!({
            "applied": false,
            "failureReason": "client applies workspace edits locally",
        })),
        _ => None,
    }
}

fn spawn_stderr_logger(stderr: ChildStderr) {
    use tokio::io::AsyncBufReadExt;
    tokio::spawn(async move {
        let mut reader = tokio::io::BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => debug!(target: "lsp.stderr", "{}", line.trim_end()),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, TestServer};

    #[tokio::test]
    async fn correlates_out_of_order_responses() {
        let server = TestServer::start(|method, _params| match method {
            "test/a" => Reply::DelayedResult(Duration::from_millis(50), json!("a")),
            "test/b" => Reply::Result(json!("b")),
            _ => Reply::Result(Value::Null),
        });
        let client = server.client.clone();

        let a = {
            let client = client.clone();
            tokio::spawn(async move { client.request("test/a", json!({}), None).await })
        };
        let b = client.request("test/b", json!({}), None).await.unwrap();
        assert_eq!(b, json!("b"));
        assert_eq!(a.await.unwrap().unwrap(), json!("a"));
    }

    #[tokio::test]
    async fn timeout_removes_pending_and_sends_cancel() {
        let server = TestServer::start(|method, _params| match method {
            "test/slow" => Reply::Silence,
            _ => Reply::Result(Value::Null),
        });

        let err = server
            .client
            .request("test/slow", json!({}), Some(Duration::from_millis(40)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Timeout { ref method } if method == "test/slow"));

        // The cancel notification reaches the server.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(server.saw_method("$/cancelRequest"));
    }

    #[tokio::test]
    async fn method_not_found_maps_to_unsupported() {
        let server = TestServer::start(|method, _params| match method {
            "textDocument/rename" => Reply::Error(-32601, "method not found".into()),
            _ => Reply::Result(Value::Null),
        });

        let err = server
            .client
            .request("textDocument/rename", json!({}), None)
            .await
            .unwrap_err();
        match err {
            BrokerError::Unsupported(msg) => {
                assert!(msg.contains("doesn't support textDocument/rename"));
            }
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_server_errors_keep_their_code() {
        let server = TestServer::start(|method, _params| match method {
            "test/fail" => Reply::Error(-32603, "boom".into()),
            _ => Reply::Result(Value::Null),
        });

        let err = server
            .client
            .request("test/fail", json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::ServerError {
            code: -32603,
            message: "boom".into()
        });
    }

    #[tokio::test]
    async fn transport_close_fails_pending_requests() {
        let server = TestServer::start(|method, _params| match method {
            "test/hang" => Reply::HangUp,
            _ => Reply::Result(Value::Null),
        });

        let err = server
            .client
            .request("test/hang", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
        assert!(!server.client.is_alive());

        // Subsequent requests fail fast.
        let err = server
            .client
            .request("test/after", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
    }

    #[tokio::test]
    async fn publish_diagnostics_reach_the_store() {
        let server = TestServer::start(|method, _params| match method {
            "test/trigger" => Reply::ResultWith(Value::Null, vec![json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {
                    "uri": "file:///a.ts",
                    "diagnostics": [{
                        "range": { "start": { "line": 0, "character": 0 },
                                   "end": { "line": 0, "character": 5 } },
                        "severity": 1,
                        "message": "type error"
                    }]
                }
            })]),
            _ => Reply::Result(Value::Null),
        });
        let client = server.client.clone();

        let diagnostics = client.diagnostics();
        let waiter = tokio::spawn(async move {
            diagnostics
                .wait_for("file:///a.ts", Duration::from_secs(2))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        client
            .request("test/trigger", json!({}), None)
            .await
            .unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message, "type error");
    }

    #[tokio::test]
    async fn unknown_server_request_gets_method_not_found() {
        let server = TestServer::start(|method, _params| match method {
            "test/poke" => Reply::ResultWith(Value::Null, vec![json!({
                "jsonrpc": "2.0",
                "id": 999,
                "method": "custom/unknownThing",
                "params": {}
            })]),
            _ => Reply::Result(Value::Null),
        });

        server
            .client
            .request("test/poke", json!({}), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reply = server
            .received()
            .into_iter()
            .find(|m| m.get("id") == Some(&json!(999)))
            .expect("client should answer the server request");
        assert_eq!(reply["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn workspace_configuration_answers_nulls_per_item() {
        let out = answer_server_request(
            "workspace/configuration",
            Some(&json!({ "items": [{ "section": "a" }, { "section": "b" }] })),
            "file:///root/",
        )
        .unwrap();
        assert_eq!(out, json!([null, null]));
    }
}
