//! Websocket connection to the signaling relay
//!
//! One background task owns the websocket. Outbound events are queued on an
//! unbounded channel so callers never wait on the network; inbound events
//! are decoded and forwarded as [`SignalingEvent`]s. The connection itself
//! does not retry. A thin supervisor re-dials after a drop and reports the
//! gap as connectivity changes, leaving peer links untouched.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::SignalingError;
use crate::signaling::codec::{Frame, DEFAULT_PING_INTERVAL};
use crate::signaling::protocol::{parse_event, Outbound, SignalingEvent};

/// Delay before re-dialing a dropped relay connection
const REDIAL_DELAY: Duration = Duration::from_secs(2);

/// Anything that can carry outbound relay events
pub trait SignalingSink: Send + Sync {
    fn send(&self, event: Outbound) -> Result<(), SignalingError>;
}

/// Cloneable sender half of a running [`SignalingClient`]
#[derive(Debug, Clone)]
pub struct SignalingHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SignalingSink for SignalingHandle {
    fn send(&self, event: Outbound) -> Result<(), SignalingError> {
        self.tx.send(event).map_err(|_| SignalingError::Closed)
    }
}

/// Build the websocket endpoint for a relay base URL
pub fn relay_url(server_url: &str) -> Result<Url, SignalingError> {
    let mut url = Url::parse(server_url).map_err(|e| SignalingError::InvalidUrl(format!("{}: {}", server_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(SignalingError::InvalidUrl(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| SignalingError::InvalidUrl(server_url.to_string()))?;

    let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(Some("EIO=3&transport=websocket"));
    Ok(url)
}

/// Running relay connection
pub struct SignalingClient {
    handle: SignalingHandle,
    task: JoinHandle<()>,
}

impl SignalingClient {
    /// Start the connection task; inbound events are delivered on `events`
    pub fn spawn(server_url: &str, events: mpsc::UnboundedSender<SignalingEvent>) -> Result<Self, SignalingError> {
        let url = relay_url(server_url)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(supervise(url, rx, events));
        Ok(Self {
            handle: SignalingHandle { tx },
            task,
        })
    }

    pub fn handle(&self) -> SignalingHandle {
        self.handle.clone()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn supervise(
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<SignalingEvent>,
) {
    loop {
        tracing::info!("Connecting to signaling relay {}", url);
        let result = run_connection(&url, &mut outbound, &events).await;

        if events.send(SignalingEvent::ConnectivityChanged(false)).is_err() {
            return;
        }
        match result {
            Ok(()) => {
                tracing::info!("Signaling client stopped");
                return;
            }
            Err(e) => {
                tracing::warn!("Signaling connection lost: {}", e);
                let _ = events.send(SignalingEvent::TransportError(e.to_string()));
            }
        }

        // Events queued while offline target sockets that no longer exist
        while outbound.try_recv().is_ok() {}
        tokio::time::sleep(REDIAL_DELAY).await;
    }
}

/// Drive one websocket until it drops. `Ok` means the outbound side closed.
async fn run_connection(
    url: &Url,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<SignalingEvent>,
) -> Result<(), SignalingError> {
    let (ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;
    let (mut write, mut read) = ws.split();

    let mut ping = interval_at(Instant::now() + DEFAULT_PING_INTERVAL, DEFAULT_PING_INTERVAL);

    loop {
        tokio::select! {
            message = read.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Err(SignalingError::Closed),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(SignalingError::ConnectionFailed(e.to_string())),
                };

                let frame = match Frame::decode(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Ignoring relay frame: {}", e);
                        continue;
                    }
                };

                match frame {
                    Frame::Open { sid, ping_interval, .. } => {
                        tracing::debug!("Relay session {} (ping every {:?})", sid, ping_interval);
                        ping = interval_at(Instant::now() + ping_interval, ping_interval);
                    }
                    Frame::Ping => {
                        write
                            .send(Message::Text(Frame::Pong.encode()))
                            .await
                            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
                    }
                    Frame::Connect => {
                        tracing::info!("Connected to signaling relay");
                        let _ = events.send(SignalingEvent::ConnectivityChanged(true));
                    }
                    Frame::Disconnect | Frame::Close => return Err(SignalingError::Closed),
                    Frame::Event { name, args } => match parse_event(&name, &args) {
                        Ok(Some(event)) => {
                            let _ = events.send(event);
                        }
                        Ok(None) => tracing::debug!("Unhandled relay event {}", name),
                        Err(e) => tracing::warn!("Ignoring relay event: {}", e),
                    },
                    Frame::Error(body) => {
                        let _ = events.send(SignalingEvent::TransportError(SignalingError::Relay(body.to_string()).to_string()));
                    }
                    Frame::Pong | Frame::Noop => {}
                }
            }
            event = outbound.recv() => {
                let Some(event) = event else {
                    let _ = write.close().await;
                    return Ok(());
                };
                tracing::debug!("Relay <- {:?}", event);
                write
                    .send(Message::Text(event.to_frame().encode()))
                    .await
                    .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
            }
            _ = ping.tick() => {
                write
                    .send(Message::Text(Frame::Ping.encode()))
                    .await
                    .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
            }
        }
    }
}
