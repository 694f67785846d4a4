//! Single-writer transport teardown
//!
//! Both session loops hold the same `SessionCloser`. The first caller of
//! `close` wins the compare-and-swap, sends the normal close and releases
//! the connection; every later call is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{CloseInfo, MessageSink, TransportError, WireMessage};

pub struct SessionCloser {
    sink: Mutex<Box<dyn MessageSink>>,
    closed_by_us: AtomicBool,
    closed: CancellationToken,
}

impl SessionCloser {
    pub fn new(sink: Box<dyn MessageSink>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed_by_us: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Write one message unless the session is already closing.
    ///
    /// A write still pending when `close` is called is abandoned, so the
    /// close never waits behind a stalled peer.
    pub async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            () = self.closed.cancelled() => Err(TransportError::Closed),
            result = async { self.sink.lock().await.send(message).await } => result,
        }
    }

    /// Close the transport; true for the one call that actually did it.
    ///
    /// Errors from the close handshake are logged, not returned: at this
    /// point the connection is going away regardless.
    pub async fn close(&self) -> bool {
        if self
            .closed_by_us
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.closed.cancel();

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(WireMessage::Close(Some(CloseInfo::normal()))).await {
            debug!(error = %e, "Close message not delivered");
        }
        if let Err(e) = sink.close().await {
            debug!(error = %e, "Transport close failed");
        }
        true
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_by_us.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}
