//! In-process WebSocket echo server for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Echoes every text frame back to its sender and records it.
pub struct EchoServer {
    pub url: String,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    accept_times: Arc<Mutex<Vec<Instant>>>,
    refuse: Arc<AtomicBool>,
    push: broadcast::Sender<String>,
    kick: Arc<Mutex<CancellationToken>>,
    stop: CancellationToken,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Self {
            url: format!("ws://{addr}"),
            received: Arc::new(Mutex::new(Vec::new())),
            accepted: Arc::new(AtomicUsize::new(0)),
            accept_times: Arc::new(Mutex::new(Vec::new())),
            refuse: Arc::new(AtomicBool::new(false)),
            push: broadcast::channel(64).0,
            kick: Arc::new(Mutex::new(CancellationToken::new())),
            stop: CancellationToken::new(),
        };

        let received = Arc::clone(&server.received);
        let accepted = Arc::clone(&server.accepted);
        let accept_times = Arc::clone(&server.accept_times);
        let refuse = Arc::clone(&server.refuse);
        let push = server.push.clone();
        let kick = Arc::clone(&server.kick);
        let stop = server.stop.clone();
        drop(tokio::spawn(async move {
            loop {
                let (stream, _) = tokio::select! {
                    () = stop.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(_) => continue,
                    },
                };
                let _ = accepted.fetch_add(1, Ordering::SeqCst);
                accept_times.lock().push(Instant::now());
                if refuse.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                let token = kick.lock().clone();
                drop(tokio::spawn(serve(
                    stream,
                    Arc::clone(&received),
                    push.subscribe(),
                    token,
                )));
            }
        }));
        server
    }

    /// Text frames received so far.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// When each TCP connection was accepted.
    pub fn accept_times(&self) -> Vec<Instant> {
        self.accept_times.lock().clone()
    }

    /// Keep listening but drop new connections before the handshake.
    pub fn refuse_handshakes(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Send a text frame to every open connection.
    pub fn push(&self, text: &str) {
        let _ = self.push.send(text.to_owned());
    }

    /// Drop every open connection without a close handshake.
    pub fn kick_all(&self) {
        let mut kick = self.kick.lock();
        kick.cancel();
        *kick = CancellationToken::new();
    }

    /// Stop accepting and drop every open connection.
    pub fn shutdown(&self) {
        self.stop.cancel();
        self.kick_all();
    }

    /// Wait until `count` frames have been received.
    pub async fn wait_for_frames(&self, count: usize) -> Vec<String> {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                let frames = self.received();
                if frames.len() >= count {
                    return frames;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("frames not received in time")
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(
    stream: TcpStream,
    received: Arc<Mutex<Vec<String>>>,
    mut push: broadcast::Receiver<String>,
    kick: CancellationToken,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    loop {
        tokio::select! {
            () = kick.cancelled() => return,
            pushed = push.recv() => match pushed {
                Ok(text) => {
                    if ws.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    received.lock().push(text.as_str().to_owned());
                    if ws.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Receive the next event or fail after [`TIMEOUT`].
pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Receive events until one satisfies `pred`.
pub async fn next_matching<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    mut pred: impl FnMut(&T) -> bool,
) -> T {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}
