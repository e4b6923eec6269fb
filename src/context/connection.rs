use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use strum_macros::{Display, EnumString};
use tokio::sync::{Mutex, mpsc};

/// Kind of an inbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionKind {
    Http,
    Websocket,
}

/// Descriptor of one inbound connection, supplied by the transport.
///
/// Carries the connection kind plus the request line data; the message
/// channels travel separately as a [`Transport`].
#[derive(Debug, Clone)]
pub struct ConnectionScope {
    kind: ConnectionKind,
    method: Method,
    path: String,
    query_string: String,
    headers: HeaderMap,
}

impl ConnectionScope {
    pub fn http(method: Method, path: impl Into<String>) -> ConnectionScopeBuilder {
        ConnectionScopeBuilder::new(ConnectionKind::Http, method, path)
    }

    /// A websocket handshake arrives as a GET request.
    pub fn websocket(path: impl Into<String>) -> ConnectionScopeBuilder {
        ConnectionScopeBuilder::new(ConnectionKind::Websocket, Method::GET, path)
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Builder for [`ConnectionScope`].
pub struct ConnectionScopeBuilder {
    kind: ConnectionKind,
    method: Method,
    path: String,
    query_string: String,
    headers: HeaderMap,
}

impl ConnectionScopeBuilder {
    fn new(kind: ConnectionKind, method: Method, path: impl Into<String>) -> Self {
        Self {
            kind,
            method,
            path: path.into(),
            query_string: String::new(),
            headers: HeaderMap::new(),
        }
    }

    pub fn query(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self
    }

    /// Append a header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn build(self) -> ConnectionScope {
        ConnectionScope {
            kind: self.kind,
            method: self.method,
            path: self.path,
            query_string: self.query_string,
            headers: self.headers,
        }
    }
}

/// Messages exchanged with the transport over the connection's channels.
#[derive(Debug, Clone)]
pub enum TransportMessage {
    /// Start of an outbound HTTP response.
    ResponseStart {
        status: StatusCode,
        headers: HeaderMap,
    },
    /// A chunk of HTTP body, inbound or outbound. `more_body` is false on
    /// the final chunk.
    BodyChunk { data: Bytes, more_body: bool },
    /// A websocket text frame.
    Text(String),
    /// A websocket binary frame.
    Binary(Bytes),
    /// Websocket close frame.
    Close { code: u16 },
    /// The peer went away.
    Disconnect,
}

/// The connection's message channels: an inbound receiver and an outbound
/// sender.
///
/// Contexts created without a live connection use [`Transport::detached`],
/// whose inbound side is exhausted and whose outbound side drops messages.
pub struct Transport {
    receive: Mutex<mpsc::Receiver<TransportMessage>>,
    send: mpsc::Sender<TransportMessage>,
}

impl Transport {
    pub fn new(
        receive: mpsc::Receiver<TransportMessage>,
        send: mpsc::Sender<TransportMessage>,
    ) -> Self {
        Self {
            receive: Mutex::new(receive),
            send,
        }
    }

    /// A transport with no peer: receiving yields `None` immediately and
    /// sent messages are discarded.
    pub fn detached() -> Self {
        let (dead_tx, rx) = mpsc::channel(1);
        let (tx, _dead_rx) = mpsc::channel(1);
        drop(dead_tx);
        Self::new(rx, tx)
    }

    /// Receive the next inbound message, or `None` once the peer is gone.
    pub async fn receive(&self) -> Option<TransportMessage> {
        self.receive.lock().await.recv().await
    }

    /// Send an outbound message. Returns false if the peer is gone.
    pub async fn send(&self, message: TransportMessage) -> bool {
        self.send.send(message).await.is_ok()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_builder() {
        let scope = ConnectionScope::http(Method::POST, "/users")
            .query("page=2")
            .header("content-type", "application/json")
            .build();

        assert_eq!(scope.kind(), ConnectionKind::Http);
        assert_eq!(scope.method(), &Method::POST);
        assert_eq!(scope.path(), "/users");
        assert_eq!(scope.query_string(), "page=2");
        assert_eq!(scope.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_websocket_scope_is_get() {
        let scope = ConnectionScope::websocket("/ws").build();
        assert_eq!(scope.kind(), ConnectionKind::Websocket);
        assert_eq!(scope.method(), &Method::GET);
    }

    #[test]
    fn test_kind_parse_and_display() {
        assert_eq!(ConnectionKind::Http.to_string(), "http");
        assert_eq!(
            "websocket".parse::<ConnectionKind>().unwrap(),
            ConnectionKind::Websocket
        );
    }

    #[tokio::test]
    async fn test_detached_transport() {
        let transport = Transport::detached();
        assert!(transport.receive().await.is_none());
        assert!(!transport.send(TransportMessage::Disconnect).await);
    }

    #[tokio::test]
    async fn test_transport_roundtrip() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let transport = Transport::new(in_rx, out_tx);

        in_tx
            .send(TransportMessage::Text("hello".into()))
            .await
            .unwrap();
        match transport.receive().await {
            Some(TransportMessage::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("unexpected message: {other:?}"),
        }

        assert!(transport.send(TransportMessage::Close { code: 1000 }).await);
        assert!(matches!(
            out_rx.recv().await,
            Some(TransportMessage::Close { code: 1000 })
        ));
    }
}
