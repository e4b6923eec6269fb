use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;

use crate::config::ConfigService;
use crate::context::connection::{ConnectionKind, ConnectionScope, Transport, TransportMessage};
use crate::di::{DiResult, RequestBoundary};
use crate::error::ContextError;

/// Per-connection context handed to route-handling code.
///
/// Bundles the connection descriptor, the transport channels and the
/// connection's resolution boundary. Cloning is cheap; all parts are shared.
#[derive(Clone)]
pub struct HostContext {
    scope: ConnectionScope,
    transport: Arc<Transport>,
    boundary: Arc<RequestBoundary>,
}

impl HostContext {
    pub fn new(
        scope: ConnectionScope,
        transport: Arc<Transport>,
        boundary: Arc<RequestBoundary>,
    ) -> Self {
        Self {
            scope,
            transport,
            boundary,
        }
    }

    pub fn connection(&self) -> &ConnectionScope {
        &self.scope
    }

    pub fn kind(&self) -> ConnectionKind {
        self.scope.kind()
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn boundary(&self) -> &Arc<RequestBoundary> {
        &self.boundary
    }

    /// Resolve a dependency within this connection's boundary.
    pub fn resolve<B: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<B>> {
        self.boundary.resolve::<B>()
    }

    /// Process-wide configuration, resolved through the container.
    pub fn config(&self) -> DiResult<Arc<ConfigService>> {
        self.resolve::<ConfigService>()
    }

    /// Narrow to an HTTP connection view.
    ///
    /// Lenient on purpose: a websocket connection begins life as an HTTP
    /// handshake, so the HTTP view is valid for both kinds.
    pub fn switch_to_http(&self) -> HttpConnectionContext {
        HttpConnectionContext {
            context: self.clone(),
        }
    }

    /// Narrow to a websocket view.
    ///
    /// # Errors
    /// [`ContextError::HostContextType`] if the connection is not a
    /// websocket.
    pub fn switch_to_websocket(&self) -> Result<WebSocketContext, ContextError> {
        if self.kind() != ConnectionKind::Websocket {
            return Err(ContextError::HostContextType {
                expected: "Websocket",
                actual: self.kind().to_string(),
            });
        }
        Ok(WebSocketContext {
            context: self.clone(),
        })
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("kind", &self.kind())
            .field("path", &self.scope.path())
            .field("boundary", &self.boundary.id())
            .finish()
    }
}

/// HTTP view over a host context.
pub struct HttpConnectionContext {
    context: HostContext,
}

impl HttpConnectionContext {
    pub fn method(&self) -> &Method {
        self.context.scope.method()
    }

    pub fn path(&self) -> &str {
        self.context.scope.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.context.scope.headers()
    }

    pub fn host(&self) -> &HostContext {
        &self.context
    }

    /// Drain the inbound body chunks into one buffer.
    ///
    /// Stops at the final chunk, a disconnect, or channel exhaustion.
    pub async fn read_body(&self) -> Bytes {
        let mut body = Vec::new();
        loop {
            match self.context.transport.receive().await {
                Some(TransportMessage::BodyChunk { data, more_body }) => {
                    body.extend_from_slice(&data);
                    if !more_body {
                        break;
                    }
                }
                Some(TransportMessage::Disconnect) | None => break,
                Some(_) => continue,
            }
        }
        Bytes::from(body)
    }

    /// Send a complete response: a start message followed by one final body
    /// chunk. Returns false if the peer is gone.
    pub async fn respond(&self, status: StatusCode, headers: HeaderMap, body: Bytes) -> bool {
        if !self
            .context
            .transport
            .send(TransportMessage::ResponseStart { status, headers })
            .await
        {
            return false;
        }
        self.context
            .transport
            .send(TransportMessage::BodyChunk {
                data: body,
                more_body: false,
            })
            .await
    }
}

/// Websocket view over a host context.
pub struct WebSocketContext {
    context: HostContext,
}

impl std::fmt::Debug for WebSocketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketContext").finish_non_exhaustive()
    }
}

impl WebSocketContext {
    pub fn path(&self) -> &str {
        self.context.scope.path()
    }

    pub fn host(&self) -> &HostContext {
        &self.context
    }

    /// Receive the next frame, or `None` once the peer is gone.
    pub async fn receive(&self) -> Option<TransportMessage> {
        self.context.transport.receive().await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.context
            .transport
            .send(TransportMessage::Text(text.into()))
            .await
    }

    pub async fn send_binary(&self, data: Bytes) -> bool {
        self.context
            .transport
            .send(TransportMessage::Binary(data))
            .await
    }

    pub async fn close(&self, code: u16) -> bool {
        self.context
            .transport
            .send(TransportMessage::Close { code })
            .await
    }
}
