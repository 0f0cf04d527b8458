//! Request/response correlation and notification routing.
//!
//! One identifier-keyed map of pending requests makes concurrent
//! operations over the single transport safe: each caller suspends on its
//! own oneshot until the matching response frame arrives, the transport
//! closes, or its own deadline passes. Notifications take a separate,
//! never-blocking path through the [`NotificationRouter`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::error::LspError;
use crate::protocol::{Notification, Request};

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

/// Commands consumed by the single writer task.
pub(crate) enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// Protocol-level error payload of a response frame.
#[derive(Debug)]
pub(crate) struct ServerRejection {
    pub code: i64,
    pub message: String,
}

type ReplySender = oneshot::Sender<Result<serde_json::Value, ServerRejection>>;

pub(crate) type PendingMap = Arc<Mutex<HashMap<u64, ReplySender>>>;

type Handler = Box<dyn Fn(serde_json::Value) + Send + Sync>;

/// Routes server-initiated notifications to at most one handler per
/// method name. Registering a method again replaces the old handler.
#[derive(Clone, Default)]
pub(crate) struct NotificationRouter {
    handlers: Arc<StdMutex<HashMap<String, Handler>>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        method: impl Into<String>,
        handler: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), Box::new(handler));
    }

    /// Invoke the handler for `method`, if any. Handlers run on the frame
    /// dispatch task and must not block.
    pub(crate) fn dispatch(&self, method: &str, params: serde_json::Value) -> bool {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match handlers.get(method) {
            Some(handler) => {
                handler(params);
                true
            }
            None => false,
        }
    }
}

/// The outbound half of the correlation layer, shared by every caller.
#[derive(Clone)]
pub(crate) struct Rpc {
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: Arc<AtomicU64>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
}

impl Rpc {
    pub fn new(
        writer_tx: mpsc::Sender<WriterCommand>,
        pending: PendingMap,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            writer_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
            closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send `method` and suspend until the matching response, transport
    /// closure, or `timeout`.
    ///
    /// A timeout fails only this request; the frame already sent is not
    /// recalled, and the server's eventual response is dropped as a stray.
    pub async fn request(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, LspError> {
        if self.is_closed() {
            return Err(LspError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);

        let frame = match serde_json::to_value(Request::new(id, method, params)) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(LspError::Protocol {
                    method,
                    message: e.to_string(),
                });
            }
        };

        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(LspError::TransportClosed);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(rejection))) => Err(LspError::Rejected {
                method,
                code: rejection.code,
                message: rejection.message,
            }),
            // Sender dropped: the transport closed and the pending map
            // was drained.
            Ok(Err(_)) => Err(LspError::TransportClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(LspError::Timeout { after: timeout })
            }
        }
    }

    /// Fire-and-forget notification. Ordering with other sends is
    /// preserved by the single writer task.
    pub async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), LspError> {
        if self.is_closed() {
            return Err(LspError::TransportClosed);
        }
        let frame = serde_json::to_value(Notification::new(method, params)).map_err(|e| {
            LspError::Protocol {
                method,
                message: e.to_string(),
            }
        })?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| LspError::TransportClosed)
    }

    /// Ask the writer task to exit after draining queued frames.
    pub async fn shutdown_writer(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
    }
}

/// A classified inbound frame.
pub(crate) enum Incoming {
    Response {
        id: u64,
        result: Result<serde_json::Value, ServerRejection>,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: serde_json::Value,
    },
}

/// Classify a frame by its `id`/`method`/`result`/`error` fields.
/// Returns `None` for frames that fit no protocol shape.
pub(crate) fn classify(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_reply) {
        (Some(id), None, true) => {
            let result = match frame.get("error") {
                Some(error) => Err(ServerRejection {
                    code: error.get("code").and_then(serde_json::Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error")
                        .to_string(),
                }),
                None => Ok(frame.get("result").cloned().unwrap_or(serde_json::Value::Null)),
            };
            Some(Incoming::Response {
                id: id.as_u64()?,
                result,
            })
        }
        (Some(id), Some(method), _) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method), _) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned().unwrap_or(serde_json::Value::Null),
        }),
        _ => None,
    }
}

/// Route one inbound frame: complete the matching pending request, answer
/// a server-to-client request with "method not found" so the server never
/// blocks on us, or hand a notification to the router.
pub(crate) async fn dispatch_frame(
    frame: &serde_json::Value,
    pending: &PendingMap,
    router: &NotificationRouter,
    writer_tx: &mpsc::Sender<WriterCommand>,
) {
    let Some(incoming) = classify(frame) else {
        tracing::trace!("ignoring malformed frame");
        return;
    };

    match incoming {
        Incoming::Response { id, result } => {
            let sender = pending.lock().await.remove(&id);
            match sender {
                Some(reply_tx) => {
                    let _ = reply_tx.send(result);
                }
                // Normal after a per-request timeout fired.
                None => tracing::debug!(id, "dropping response with no pending request"),
            }
        }
        Incoming::ServerRequest { id, method } => {
            tracing::debug!(%method, "rejecting server-to-client request");
            let response = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": METHOD_NOT_FOUND,
                    "message": format!("Method not found: {method}")
                }
            });
            let _ = writer_tx.send(WriterCommand::Send(response)).await;
        }
        Incoming::Notification { method, params } => {
            if !router.dispatch(&method, params) {
                tracing::trace!(%method, "unhandled notification");
            }
        }
    }
}

/// Mark the transport closed and fail every pending request. Dropping
/// the reply senders wakes each waiter with `TransportClosed`; requests
/// issued afterwards fail before sending.
pub(crate) async fn close_transport(pending: &PendingMap, closed: &AtomicBool) {
    closed.store(true, Ordering::Release);
    pending.lock().await.clear();
}
