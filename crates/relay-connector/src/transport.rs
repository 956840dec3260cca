//! Physical WebSocket link.
//!
//! [`open`] dials the endpoint and splits the socket into a writer task fed
//! by an unbounded queue and a reader task that reports text frames and the
//! eventual closure as [`LinkEvent`]s. Every event carries the link ID so the
//! coordinator can discard reports from a link it has already replaced.

use std::fmt::Display;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use relay_core::{ConnectorError, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::guard::ConnectionPermit;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for the close handshake before the socket is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Frames queued for the writer task.
#[derive(Debug)]
pub(crate) enum OutboundFrame {
    Text(String),
    Close,
}

/// Why a link stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote sent a close frame.
    Remote {
        /// WebSocket close code.
        code: u16,
        /// Close reason text.
        reason: String,
    },
    /// The socket ended without a close frame or failed mid-stream.
    Abnormal(String),
    /// This side closed the link.
    Local,
}

impl CloseReason {
    /// Close code as reported on the wire; 1006 when none was received.
    pub fn code(&self) -> u16 {
        match self {
            Self::Remote { code, .. } => *code,
            Self::Abnormal(_) => 1006,
            Self::Local => 1000,
        }
    }

    /// Human-readable detail.
    pub fn detail(&self) -> &str {
        match self {
            Self::Remote { reason, .. } => reason,
            Self::Abnormal(detail) => detail,
            Self::Local => "closed locally",
        }
    }
}

/// Reports from a link's reader task.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    Frame { link: u64, text: String },
    Closed { link: u64, reason: CloseReason },
}

/// An open connection. Dropping it closes the socket gracefully.
#[derive(Debug)]
pub(crate) struct Link {
    id: u64,
    url: String,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    opened_at: Instant,
    _permit: ConnectionPermit,
}

impl Link {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Whether the writer task is still accepting frames.
    pub(crate) fn is_ready(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a text frame. Never waits on network I/O.
    pub(crate) fn send(&self, text: String) -> Result<()> {
        self.outbound
            .send(OutboundFrame::Text(text))
            .map_err(|_| ConnectorError::not_connected("send"))
    }

    /// Close with 1000 Normal.
    pub(crate) fn close(self) {
        let _ = self.outbound.send(OutboundFrame::Close);
    }
}

/// Dial `url` and start the reader and writer tasks.
///
/// Fails with [`ConnectorError::Connection`] if the endpoint is unreachable or
/// the handshake does not complete within `timeout`.
pub(crate) async fn open(
    url: &str,
    timeout: Duration,
    link_id: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    permit: ConnectionPermit,
) -> Result<Link> {
    let (ws, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| {
            ConnectorError::connection(url, format!("timed out after {}ms", timeout.as_millis()))
        })?
        .map_err(|e| ConnectorError::connection(url, e.to_string()))?;

    let (sink, stream) = ws.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let closing = CancellationToken::new();
    let write_error = Arc::new(OnceLock::new());

    drop(tokio::spawn(write_loop(
        sink,
        outbound_rx,
        closing.clone(),
        Arc::clone(&write_error),
        link_id,
    )));
    drop(tokio::spawn(read_loop(stream, events, closing, write_error, link_id)));

    debug!(url, link_id, "link open");
    Ok(Link {
        id: link_id,
        url: url.to_owned(),
        outbound,
        opened_at: Instant::now(),
        _permit: permit,
    })
}

/// Drain queued frames into the socket. A failed write records the error and
/// cancels `closing` so the reader reports the link as dead.
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    closing: CancellationToken,
    write_error: Arc<OnceLock<String>>,
    link_id: u64,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(link_id, error = %e, "write failed");
                        let _ = write_error.set(e.to_string());
                        closing.cancel();
                        break;
                    }
                }
                // Explicit close or the link handle was dropped
                Some(OutboundFrame::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = tokio::time::timeout(CLOSE_GRACE, async {
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        let _ = sink.close().await;
                    })
                    .await;
                    closing.cancel();
                    break;
                }
            },
            () = closing.cancelled() => break,
        }
    }
    debug!(link_id, "writer stopped");
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<WsStream>,
    events: mpsc::UnboundedSender<LinkEvent>,
    closing: CancellationToken,
    write_error: Arc<OnceLock<String>>,
    link: u64,
) {
    let reason = loop {
        let next = tokio::select! {
            next = stream.next() => next,
            () = closing.cancelled() => break cancelled_reason(&write_error),
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                if events
                    .send(LinkEvent::Frame {
                        link,
                        text: text.as_str().to_owned(),
                    })
                    .is_err()
                {
                    break CloseReason::Local;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break frame.map_or_else(
                    || CloseReason::Abnormal("close frame without status".into()),
                    |f| CloseReason::Remote {
                        code: u16::from(f.code),
                        reason: f.reason.as_str().to_owned(),
                    },
                );
            }
            Some(Ok(Message::Binary(bytes))) => {
                debug!(link, len = bytes.len(), "ignoring binary frame");
            }
            // Ping/pong are answered by tungstenite
            Some(Ok(_)) => {}
            Some(Err(e)) => break CloseReason::Abnormal(e.to_string()),
            None => break CloseReason::Abnormal("stream ended without close frame".into()),
        }
    };
    // Wake the writer so a dead socket releases promptly
    closing.cancel();
    debug!(link, ?reason, "link closed");
    let _ = events.send(LinkEvent::Closed { link, reason });
}

fn cancelled_reason(write_error: &OnceLock<String>) -> CloseReason {
    write_error.get().map_or(CloseReason::Local, |e| {
        CloseReason::Abnormal(format!("write failed: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_codes() {
        assert_eq!(
            CloseReason::Remote {
                code: 1001,
                reason: "going away".into()
            }
            .code(),
            1001
        );
        assert_eq!(CloseReason::Abnormal("eof".into()).code(), 1006);
        assert_eq!(CloseReason::Local.code(), 1000);
        assert_eq!(CloseReason::Local.detail(), "closed locally");
    }

    #[tokio::test]
    async fn write_failure_wakes_the_reader() {
        let sink = Box::pin(futures::sink::unfold((), |(), _: Message| async {
            Err::<(), _>(std::io::Error::other("broken pipe"))
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        let closing = CancellationToken::new();
        let write_error = Arc::new(OnceLock::new());
        tx.send(OutboundFrame::Text("hello".into())).unwrap();

        tokio::time::timeout(
            Duration::from_secs(1),
            write_loop(sink, rx, closing.clone(), Arc::clone(&write_error), 7),
        )
        .await
        .unwrap();

        assert!(closing.is_cancelled());
        assert_eq!(
            cancelled_reason(&write_error),
            CloseReason::Abnormal("write failed: broken pipe".into())
        );
        drop(tx);
    }

    #[test]
    fn local_cancel_without_write_error_is_local() {
        assert_eq!(cancelled_reason(&OnceLock::new()), CloseReason::Local);
    }

    #[tokio::test]
    async fn open_unreachable_is_connection_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let permit = crate::guard::ConnectionBudget::new(1)
            .try_acquire("ws://127.0.0.1:1")
            .unwrap();
        let err = open("ws://127.0.0.1:1", Duration::from_secs(2), 1, tx, permit)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Connection { .. }));
    }

    #[tokio::test]
    async fn open_invalid_url_is_connection_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let permit = crate::guard::ConnectionBudget::new(1)
            .try_acquire("nope")
            .unwrap();
        let err = open("not a url", Duration::from_secs(2), 1, tx, permit)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Connection { ref url, .. } if url == "not a url"));
    }
}
