//! Low-level DevTools WebSocket client.
//!
//! One connection per attached page target. Calls are JSON-RPC shaped with
//! auto-incrementing ids; a background read task routes id-correlated replies
//! back to their callers and pushes id-less frames onto an event queue.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tokio::{
        net::TcpStream,
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
        time::{Instant, timeout, timeout_at},
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, trace, warn},
};

use tiller_protocol::{Error, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Per-call deadline when the caller does not supply one.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A server-push notification, e.g. `Page.loadEventFired`.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

// ── Connection ───────────────────────────────────────────────────────────────

/// A live DevTools socket attached to one target.
///
/// `call` is safe to invoke from `&self`; the command queue upstream already
/// serializes callers, the internal locks only guard against the read task.
pub struct CdpConnection {
    next_id: AtomicU64,
    pending: PendingCalls,
    writer: Mutex<WsSink>,
    events: Mutex<mpsc::UnboundedReceiver<CdpEvent>>,
    reader: JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to a target's `webSocketDebuggerUrl`.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        debug!(url = ws_url, "connecting to DevTools socket");
        let (stream, _) = connect_async(ws_url).await.map_err(|e| Error::Connect {
            url: ws_url.to_string(),
            reason: e.to_string(),
        })?;
        let (writer, reader) = stream.split();

        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let routed = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            read_loop(reader, routed, event_tx).await;
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            events: Mutex::new(event_rx),
            reader,
        })
    }

    /// Invoke a protocol method with the default deadline.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_deadline(method, params, CALL_TIMEOUT).await
    }

    /// Invoke a protocol method, failing if no reply arrives in time.
    pub async fn call_with_deadline(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = encode_call(id, method, &params);
        trace!(id, method, "devtools call");

        // Register before sending so a fast reply cannot race the waiter.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::Text(frame.into())).await {
                self.pending.lock().await.remove(&id);
                return Err(Error::ConnectionClosed(e.to_string()));
            }
        }

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed("reply channel dropped".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout { what: method.to_string(), ms: deadline.as_millis() as u64 })
            },
        }
    }

    /// Enable a protocol domain so it emits events.
    pub async fn enable(&self, domain: &str) -> Result<()> {
        self.call(&format!("{domain}.enable"), json!({})).await?;
        Ok(())
    }

    /// Discard queued events. Called before operations that block on an
    /// event, so a stale frame from an earlier navigation cannot satisfy
    /// the wait.
    pub async fn clear_events(&self) {
        let mut events = self.events.lock().await;
        while events.try_recv().is_ok() {}
    }

    /// Block until an event with the given method arrives.
    pub async fn wait_for_event(&self, method: &str, deadline: Duration) -> Result<CdpEvent> {
        let mut events = self.events.lock().await;
        let until = Instant::now() + deadline;
        loop {
            match timeout_at(until, events.recv()).await {
                Ok(Some(event)) if event.method == method => return Ok(event),
                Ok(Some(_)) => continue,
                Ok(None) => return Err(Error::ConnectionClosed("event channel closed".into())),
                Err(_) => {
                    return Err(Error::Timeout {
                        what: format!("event {method}"),
                        ms: deadline.as_millis() as u64,
                    });
                },
            }
        }
    }

    /// Close the socket and stop the read task.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
        self.reader.abort();
    }
}

async fn read_loop(mut reader: WsSource, pending: PendingCalls, event_tx: mpsc::UnboundedSender<CdpEvent>) {
    while let Some(next) = reader.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "devtools socket read failed");
                break;
            },
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                debug!("devtools socket closed by browser");
                break;
            },
            _ => continue,
        };
        match decode_frame(text.as_str()) {
            Some(Frame::Reply { id, result }) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(result);
                } else {
                    trace!(id, "reply for unknown call id");
                }
            },
            Some(Frame::Event(event)) => {
                // Nobody listening is fine; the queue is drained lazily.
                let _ = event_tx.send(event);
            },
            None => warn!("unparseable devtools frame"),
        }
    }

    // The connection is gone; fail every in-flight call.
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(Error::ConnectionClosed("devtools socket closed".into())));
    }
}

// ── Frame codec ──────────────────────────────────────────────────────────────

/// One decoded frame off the socket: a reply to a call, or a pushed event.
#[derive(Debug)]
enum Frame {
    Reply { id: u64, result: Result<Value> },
    Event(CdpEvent),
}

/// Wire shape of a protocol-level error object.
#[derive(Debug, Deserialize)]
struct WireError {
    code: i64,
    message: String,
}

fn encode_call(id: u64, method: &str, params: &Value) -> String {
    json!({"id": id, "method": method, "params": params}).to_string()
}

fn decode_frame(text: &str) -> Option<Frame> {
    let value: Value = serde_json::from_str(text).ok()?;
    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let result = match value.get("error") {
            Some(err) => Err(decode_error(err)),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Some(Frame::Reply { id, result });
    }
    let method = value.get("method")?.as_str()?.to_string();
    let params = value.get("params").cloned().unwrap_or(Value::Null);
    Some(Frame::Event(CdpEvent { method, params }))
}

fn decode_error(err: &Value) -> Error {
    match serde_json::from_value::<WireError>(err.clone()) {
        Ok(wire) => Error::Cdp(format!("{} (code {})", wire.message, wire.code)),
        Err(_) => Error::Cdp(err.to_string()),
    }
}
