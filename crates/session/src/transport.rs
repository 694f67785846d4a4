//! Message transport seam
//!
//! Sessions talk to a `MessageSink` and a `MessageSource` instead of a
//! concrete socket. `connect` yields the WebSocket pair; `memory::pair`
//! yields an in-process pair with a scripted peer.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Close code for a normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("invalid connection request: {0}")]
    Request(String),

    #[error("websocket error: {0}")]
    WebSocket(tungstenite::Error),

    #[error("transport failure: {0}")]
    Broken(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            other => Self::WebSocket(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    #[must_use]
    pub fn normal() -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: String::new(),
        }
    }

    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// Data and close messages; pings never reach a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Binary(Vec<u8>),
    Text(String),
    Close(Option<CloseInfo>),
}

impl WireMessage {
    /// Message body for data messages
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(data) => Some(data),
            Self::Text(text) => Some(text.as_bytes()),
            Self::Close(_) => None,
        }
    }
}

/// Write half of a transport
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Release the underlying connection
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a transport; `None` once the stream has ended
#[async_trait]
pub trait MessageSource: Send {
    async fn next(&mut self) -> Option<Result<WireMessage, TransportError>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsSink(SplitSink<WsStream, Message>);

pub struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let message = match message {
            WireMessage::Binary(data) => Message::Binary(data),
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Close(info) => Message::Close(info.map(|info| CloseFrame {
                code: CloseCode::from(info.code),
                reason: info.reason.into(),
            })),
        };
        self.0.send(message).await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0.close().await.map_err(Into::into)
    }
}

#[async_trait]
impl MessageSource for WsSource {
    async fn next(&mut self) -> Option<Result<WireMessage, TransportError>> {
        loop {
            let message = match self.0.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            let wire = match message {
                Message::Binary(data) => WireMessage::Binary(data),
                Message::Text(text) => WireMessage::Text(text),
                Message::Close(frame) => WireMessage::Close(frame.map(|frame| CloseInfo {
                    code: u16::from(frame.code),
                    reason: frame.reason.into_owned(),
                })),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(Ok(wire));
        }
    }
}

/// An open WebSocket split into its halves
pub struct Connection {
    pub sink: WsSink,
    pub source: WsSource,
    /// Sub-protocol the server agreed to, if any
    pub protocol: Option<String>,
}

/// Open a WebSocket, offering `protocols` in order of preference
pub async fn connect(
    url: &str,
    protocols: &[&str],
    authorization: Option<&str>,
) -> Result<Connection, TransportError> {
    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    if !protocols.is_empty() {
        let offered = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| TransportError::Request(e.to_string()))?;
        headers.insert(SEC_WEBSOCKET_PROTOCOL, offered);
    }
    if let Some(value) = authorization {
        let value =
            HeaderValue::from_str(value).map_err(|e| TransportError::Request(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }

    let (stream, response) = tokio_tungstenite::connect_async(request).await?;
    let protocol = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    debug!(url, ?protocol, "WebSocket connected");

    let (sink, source) = stream.split();
    Ok(Connection {
        sink: WsSink(sink),
        source: WsSource(source),
        protocol,
    })
}

/// In-process transport with a scripted peer
pub mod memory {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{MessageSink, MessageSource, TransportError, WireMessage};

    pub struct MemorySink {
        tx: mpsc::UnboundedSender<WireMessage>,
        closed: mpsc::UnboundedSender<()>,
        is_closed: bool,
    }

    pub struct MemorySource {
        rx: mpsc::UnboundedReceiver<Result<WireMessage, TransportError>>,
    }

    /// The far end: sees what the session sent and feeds what it reads
    pub struct Peer {
        sent: mpsc::UnboundedReceiver<WireMessage>,
        closes: mpsc::UnboundedReceiver<()>,
        feed: Option<mpsc::UnboundedSender<Result<WireMessage, TransportError>>>,
    }

    #[must_use]
    pub fn pair() -> (MemorySink, MemorySource, Peer) {
        let (tx, sent) = mpsc::unbounded_channel();
        let (closed, closes) = mpsc::unbounded_channel();
        let (feed, rx) = mpsc::unbounded_channel();
        (
            MemorySink {
                tx,
                closed,
                is_closed: false,
            },
            MemorySource { rx },
            Peer {
                sent,
                closes,
                feed: Some(feed),
            },
        )
    }

    impl Peer {
        /// Deliver a message to the session; false once the session is gone
        pub fn send(&self, message: WireMessage) -> bool {
            self.feed
                .as_ref()
                .is_some_and(|feed| feed.send(Ok(message)).is_ok())
        }

        /// Deliver a read error to the session
        pub fn fail(&self, err: TransportError) -> bool {
            self.feed
                .as_ref()
                .is_some_and(|feed| feed.send(Err(err)).is_ok())
        }

        /// End the stream, as a dropped connection would
        pub fn hang_up(&mut self) {
            self.feed = None;
        }

        /// Next message the session sent
        pub async fn recv(&mut self) -> Option<WireMessage> {
            self.sent.recv().await
        }

        /// Everything the session has sent so far
        pub fn drain(&mut self) -> Vec<WireMessage> {
            let mut out = Vec::new();
            while let Ok(message) = self.sent.try_recv() {
                out.push(message);
            }
            out
        }

        /// How many times the session released the connection
        pub fn physical_closes(&mut self) -> usize {
            let mut count = 0;
            while self.closes.try_recv().is_ok() {
                count += 1;
            }
            count
        }
    }

    #[async_trait]
    impl MessageSink for MemorySink {
        async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
            if self.is_closed {
                return Err(TransportError::Closed);
            }
            self.tx.send(message).map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            if self.is_closed {
                return Err(TransportError::Closed);
            }
            self.is_closed = true;
            // A peer that stopped listening does not change the outcome
            let _ = self.closed.send(());
            Ok(())
        }
    }

    #[async_trait]
    impl MessageSource for MemorySource {
        async fn next(&mut self) -> Option<Result<WireMessage, TransportError>> {
            self.rx.recv().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory;
    use super::*;

    #[tokio::test]
    async fn memory_pair_carries_messages_both_ways() {
        let (mut sink, mut source, mut peer) = memory::pair();

        sink.send(WireMessage::Text("0aA==".to_string())).await.unwrap();
        assert_eq!(peer.recv().await, Some(WireMessage::Text("0aA==".to_string())));

        assert!(peer.send(WireMessage::Binary(vec![1, b'x'])));
        assert_eq!(
            source.next().await.unwrap().unwrap(),
            WireMessage::Binary(vec![1, b'x'])
        );

        peer.hang_up();
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn closed_sink_refuses_writes() {
        let (mut sink, _source, mut peer) = memory::pair();
        sink.close().await.unwrap();

        assert!(matches!(
            sink.send(WireMessage::Binary(vec![0])).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(sink.close().await, Err(TransportError::Closed)));
        assert_eq!(peer.physical_closes(), 1);
    }

    #[test]
    fn close_info_normal_code() {
        assert!(CloseInfo::normal().is_normal());
        assert!(!CloseInfo {
            code: 1011,
            reason: "internal".to_string()
        }
        .is_normal());
    }

    #[test]
    fn closed_websocket_errors_collapse() {
        assert!(matches!(
            TransportError::from(tungstenite::Error::ConnectionClosed),
            TransportError::Closed
        ));
    }
}
