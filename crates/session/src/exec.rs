//! Interactive exec sessions
//!
//! Two loops share one transport. Outbound frames local input on the stdin
//! channel one byte at a time; inbound forwards stdout and stderr frames to
//! the local output. The first loop to stop closes the transport through the
//! shared `SessionCloser`, which in turn stops the other one.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::closer::SessionCloser;
use crate::error::{Result, SessionError};
use crate::frame::{self, Channel, Frame, FrameError, Subprotocol};
use crate::transport::{CloseInfo, MessageSink, MessageSource, WireMessage};

/// How long inbound keeps reading after we closed, waiting for the peer
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct SessionMultiplexer {
    protocol: Subprotocol,
    drain_grace: Duration,
}

impl SessionMultiplexer {
    #[must_use]
    pub fn new(protocol: Subprotocol) -> Self {
        Self {
            protocol,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    #[must_use]
    pub fn protocol(&self) -> Subprotocol {
        self.protocol
    }

    /// Run the session until cancellation, peer close or a transport fault.
    ///
    /// Returns after both loops have finished. Cancellation and a normal
    /// close by the peer are `Ok`.
    #[instrument(skip_all, fields(protocol = self.protocol.name()))]
    pub async fn run<S, R, W>(
        &self,
        sink: Box<dyn MessageSink>,
        mut source: S,
        input: R,
        output: W,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        S: MessageSource,
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let closer = SessionCloser::new(sink);
        let (outbound, inbound) = tokio::join!(
            self.outbound(&closer, input, &cancel),
            self.inbound(&closer, &mut source, output),
        );
        debug!(
            outbound_ok = outbound.is_ok(),
            inbound_ok = inbound.is_ok(),
            "Exec session finished"
        );
        inbound.and(outbound)
    }

    async fn outbound<R>(
        &self,
        closer: &SessionCloser,
        mut input: R,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut byte = [0u8; 1];
        let result = loop {
            let read = tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                () = closer.closed() => break Ok(()),
                read = input.read(&mut byte) => read,
            };
            match read {
                Ok(0) => break Ok(()),
                Ok(_) => {
                    let message =
                        frame::encode(self.protocol, &Frame::new(Channel::Stdin, byte.to_vec()));
                    if let Err(e) = closer.send(message).await {
                        break Err(e.into());
                    }
                }
                Err(e) => break Err(SessionError::Input(e)),
            }
        };
        finish(closer, result).await
    }

    async fn inbound<S, W>(&self, closer: &SessionCloser, source: &mut S, mut output: W) -> Result<()>
    where
        S: MessageSource,
        W: AsyncWrite + Unpin + Send,
    {
        let drain = async {
            closer.closed().await;
            tokio::time::sleep(self.drain_grace).await;
        };
        tokio::pin!(drain);

        let result = loop {
            let next = tokio::select! {
                () = &mut drain => break Ok(()),
                next = source.next() => next,
            };
            let message = match next {
                None => break Ok(()),
                Some(Err(e)) => break Err(e.into()),
                Some(Ok(WireMessage::Close(info))) => break close_outcome(info),
                Some(Ok(message)) => message,
            };

            let data = message.data().unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let frame = match frame::decode(self.protocol, data) {
                Ok(frame) => frame,
                Err(FrameError::UnknownChannel(channel)) => {
                    trace!(channel, "Discarding frame on unknown channel");
                    continue;
                }
                Err(e) => break Err(e.into()),
            };
            if !frame.channel.is_output() {
                trace!(channel = ?frame.channel, bytes = frame.payload.len(), "Discarding frame");
                continue;
            }
            if let Err(e) = write_through(&mut output, &frame.payload).await {
                break Err(SessionError::Output(e));
            }
        };
        finish(closer, result).await
    }
}

async fn write_through<W: AsyncWrite + Unpin>(output: &mut W, data: &[u8]) -> std::io::Result<()> {
    output.write_all(data).await?;
    output.flush().await
}

/// A normal close, or a close without a code, ends the session cleanly
pub(crate) fn close_outcome(info: Option<CloseInfo>) -> Result<()> {
    match info {
        None => Ok(()),
        Some(info) if info.is_normal() => Ok(()),
        Some(info) => Err(SessionError::AbnormalClose {
            code: info.code,
            reason: info.reason,
        }),
    }
}

/// Close the transport and drop errors that our own close caused
pub(crate) async fn finish(closer: &SessionCloser, result: Result<()>) -> Result<()> {
    let result = match result {
        Err(e) if closer.is_closed() => {
            debug!(error = %e, "Ignoring error after close");
            Ok(())
        }
        other => other,
    };
    closer.close().await;
    result
}
