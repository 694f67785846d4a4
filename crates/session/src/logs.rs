//! Log tailing sessions
//!
//! The server pushes one JSON `LogRecord` per transport message. The relay
//! hands each record to a `LogSink` until the stream ends or the caller
//! cancels.

use std::io::Write;
use std::time::Duration;

use colored::{Color, Colorize};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::closer::SessionCloser;
use crate::error::{Result, SessionError};
use crate::exec::{close_outcome, finish, DEFAULT_DRAIN_GRACE};
use crate::transport::{MessageSink, MessageSource, WireMessage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Namespace", default)]
    pub namespace: String,
    #[serde(rename = "PodName", default)]
    pub pod_name: String,
    #[serde(rename = "ContainerName", default)]
    pub container_name: String,
}

/// Destination for decoded records
pub trait LogSink: Send {
    fn record(&mut self, record: &LogRecord) -> std::io::Result<()>;
}

impl LogSink for Vec<LogRecord> {
    fn record(&mut self, record: &LogRecord) -> std::io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Green,
    Color::Magenta,
    Color::Yellow,
    Color::Blue,
    Color::Red,
];

/// Same name, same color, across runs
fn color_for(name: &str) -> Color {
    // FNV-1a
    let hash = name.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    });
    #[allow(clippy::cast_possible_truncation)]
    PALETTE[(hash % PALETTE.len() as u64) as usize]
}

/// Prints `<pod> <container> <message>`, one line per record
pub struct LogPrinter<W> {
    out: W,
}

impl<W: Write + Send> LogPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl LogPrinter<std::io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LogSink for LogPrinter<W> {
    fn record(&mut self, record: &LogRecord) -> std::io::Result<()> {
        writeln!(
            self.out,
            "{} {} {}",
            record.pod_name.color(color_for(&record.pod_name)),
            record.container_name.color(color_for(&record.container_name)),
            record.message.trim_end_matches(['\r', '\n'])
        )?;
        self.out.flush()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogStreamRelay {
    drain_grace: Duration,
}

impl Default for LogStreamRelay {
    fn default() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl LogStreamRelay {
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Relay records until the peer closes, the stream fails or `cancel` fires
    #[instrument(skip_all)]
    pub async fn run<S, L>(
        &self,
        sink: Box<dyn MessageSink>,
        mut source: S,
        records: &mut L,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        S: MessageSource,
        L: LogSink,
    {
        let closer = SessionCloser::new(sink);

        let close_on_cancel = async {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Log stream cancelled");
                    closer.close().await;
                }
                () = closer.closed() => {}
            }
        };
        let read = async {
            let result = self.read_loop(&closer, &mut source, records).await;
            finish(&closer, result).await
        };

        let ((), result) = tokio::join!(close_on_cancel, read);
        result
    }

    async fn read_loop<S, L>(
        &self,
        closer: &SessionCloser,
        source: &mut S,
        records: &mut L,
    ) -> Result<()>
    where
        S: MessageSource,
        L: LogSink,
    {
        let drain = async {
            closer.closed().await;
            tokio::time::sleep(self.drain_grace).await;
        };
        tokio::pin!(drain);

        loop {
            let next = tokio::select! {
                () = &mut drain => return Ok(()),
                next = source.next() => next,
            };
            let message = match next {
                None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(WireMessage::Close(info))) => return close_outcome(info),
                Some(Ok(message)) => message,
            };
            let Some(data) = message.data() else {
                continue;
            };
            let record: LogRecord = serde_json::from_slice(data)?;
            records.record(&record).map_err(SessionError::Output)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_wire_format() {
        let raw = r#"{"Message":"listening on :8080","Namespace":"ws1","PodName":"hello-7d9f","ContainerName":"hello"}"#;
        let record: LogRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.message, "listening on :8080");
        assert_eq!(record.pod_name, "hello-7d9f");
        assert_eq!(serde_json::to_string(&record).unwrap(), raw);
    }

    #[test]
    fn printer_writes_pod_container_message() {
        colored::control::set_override(false);
        let mut printer = LogPrinter::new(Vec::new());
        printer
            .record(&LogRecord {
                message: "ready\n".to_string(),
                namespace: "ws1".to_string(),
                pod_name: "hello-7d9f".to_string(),
                container_name: "hello".to_string(),
            })
            .unwrap();

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(out, "hello-7d9f hello ready\n");
    }

    #[test]
    fn colors_are_stable() {
        assert_eq!(color_for("hello-7d9f"), color_for("hello-7d9f"));
    }
}
