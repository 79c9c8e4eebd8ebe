//! Persistent EDR event stream connection.
//!
//! Manages one websocket connection to the EDR's `/stream/events` route:
//! connect, read loop, reconnect-with-wait on failure. The connection moves
//! through three states (Disconnected → Connecting → Connected) and falls
//! back to Disconnected on any read fault. Transient network failure is
//! never fatal to the process; the loop logs and reconnects.
//!
//! After a drop, the EDR service is often still restarting, so the loop
//! polls a cheap HTTP liveness probe (200 ms between attempts) before
//! dialing the websocket again. A ping frame goes out every second to keep
//! intermediaries from idling the channel out; there is no enforced pong
//! timeout — the channel counts as alive as long as data keeps flowing.

use crate::client::EdrClient;
use crate::error::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use sightline_core::Event;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;

/// Websocket auth header. The REST API uses `X-Api-Key`; the stream
/// upgrade uses `Api-Key`. Asymmetric, but that is the upstream contract.
const WS_API_KEY_HEADER: &str = "Api-Key";

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => StreamState::Connecting,
            2 => StreamState::Connected,
            _ => StreamState::Disconnected,
        }
    }
}

/// Configuration for the stream connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream route on the EDR API, e.g. `/stream/events`.
    pub route: String,

    /// Poll the HTTP liveness probe before (re)connecting. Disable when
    /// the endpoint has no probeable API root (tests).
    pub wait_for_service: bool,

    /// Sleep between liveness probe attempts.
    pub probe_interval: Duration,

    /// Interval between keepalive pings.
    pub ping_interval: Duration,

    /// Verify TLS certificates. Disable for self-signed EDR deployments.
    pub verify_tls: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            route: crate::client::ROUTE_STREAM_EVENTS.to_string(),
            wait_for_service: true,
            probe_interval: Duration::from_millis(200),
            ping_interval: Duration::from_secs(1),
            verify_tls: true,
        }
    }
}

/// Statistics from a stream run.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Messages received and forwarded to the pipeline.
    pub events: usize,
    /// Messages dropped because they were not valid JSON.
    pub parse_errors: usize,
    /// Times the connection was re-established after a prior Connected.
    pub reconnects: usize,
}

/// Auto-reconnecting event stream feeding the ingestion pipeline.
pub struct EventStream {
    client: EdrClient,
    config: StreamConfig,
    state: Arc<AtomicU8>,
    events: AtomicUsize,
    parse_errors: AtomicUsize,
    reconnects: AtomicUsize,
}

impl EventStream {
    pub fn new(client: EdrClient, config: StreamConfig) -> Self {
        Self {
            client,
            config,
            state: Arc::new(AtomicU8::new(StreamState::Disconnected as u8)),
            events: AtomicUsize::new(0),
            parse_errors: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::SeqCst);
        gauge!("stream_connected").set(if state == StreamState::Connected {
            1.0
        } else {
            0.0
        });
    }

    /// Run the connect/read/reconnect loop until `running` clears or the
    /// pipeline queue closes.
    ///
    /// Received messages are parsed and pushed into `queue`; the push
    /// awaits free capacity, so a slow consumer backpressures the read
    /// loop instead of losing events.
    pub async fn run(
        &self,
        queue: mpsc::Sender<Event>,
        running: Arc<AtomicBool>,
    ) -> Result<StreamStats> {
        let mut had_session = false;

        while running.load(Ordering::SeqCst) {
            if self.config.wait_for_service {
                self.wait_for_service(&running).await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }

            self.set_state(StreamState::Connecting);
            match self.connect_and_read(&queue, &running, had_session).await {
                // Ok means the dial succeeded and a session ran.
                Ok(end) => {
                    had_session = true;
                    match end {
                        SessionEnd::QueueClosed => {
                            tracing::info!("Pipeline queue closed, stopping stream");
                            break;
                        }
                        SessionEnd::Stopped => break,
                        SessionEnd::ConnectionLost(reason) => {
                            tracing::warn!("Stream connection lost: {}", reason);
                        }
                    }
                }
                Err(e) => {
                    // Dial failures land here; keep retrying.
                    tracing::warn!("Stream connect failed: {}", e);
                    tokio::time::sleep(self.config.probe_interval).await;
                }
            }
            self.set_state(StreamState::Disconnected);
        }

        self.set_state(StreamState::Disconnected);
        Ok(StreamStats {
            events: self.events.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        })
    }

    /// Poll the API root until it answers. Bounded short sleeps keep this
    /// from hammering a service that is still restarting.
    async fn wait_for_service(&self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            match self.client.probe().await {
                Ok(()) => return,
                Err(_) => tokio::time::sleep(self.config.probe_interval).await,
            }
        }
    }

    /// One websocket session: dial, then read until fault or shutdown.
    ///
    /// `reconnecting` marks a dial that follows an earlier session; a
    /// successful one counts as a reconnect.
    async fn connect_and_read(
        &self,
        queue: &mpsc::Sender<Event>,
        running: &AtomicBool,
        reconnecting: bool,
    ) -> Result<SessionEnd> {
        let url = self.client.ws_route(&self.config.route);
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            WS_API_KEY_HEADER,
            self.client
                .key()
                .parse()
                .map_err(|_| Error::Config("API key is not a valid header value".into()))?,
        );

        let connector = if self.config.verify_tls {
            None
        } else {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| Error::Config(format!("TLS connector: {e}")))?;
            Some(Connector::NativeTls(tls))
        };

        let (mut ws, _resp) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
                .await?;

        self.set_state(StreamState::Connected);
        if reconnecting {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            counter!("stream_reconnects_total").increment(1);
        }
        tracing::info!("Connected to event stream at {}", url);

        let mut ping = tokio::time::interval(self.config.ping_interval);
        // The first tick fires immediately; skip it so pings are spaced.
        ping.tick().await;

        loop {
            if !running.load(Ordering::SeqCst) {
                let _ = ws.close(None).await;
                return Ok(SessionEnd::Stopped);
            }

            tokio::select! {
                _ = ping.tick() => {
                    if let Err(e) = ws.send(Message::Ping(Vec::new().into())).await {
                        return Ok(SessionEnd::ConnectionLost(format!("ping failed: {e}")));
                    }
                }
                msg = tokio::time::timeout(Duration::from_secs(1), ws.next()) => {
                    let msg = match msg {
                        // Timeout: loop around to observe the running flag.
                        Err(_) => continue,
                        Ok(None) => return Ok(SessionEnd::ConnectionLost("stream ended".into())),
                        Ok(Some(Err(e))) => {
                            return Ok(SessionEnd::ConnectionLost(e.to_string()));
                        }
                        Ok(Some(Ok(m))) => m,
                    };

                    match msg {
                        Message::Text(raw) => {
                            counter!("stream_events_total").increment(1);
                            match Event::from_json(raw.as_str()) {
                                Ok(event) => {
                                    self.events.fetch_add(1, Ordering::Relaxed);
                                    if queue.send(event).await.is_err() {
                                        return Ok(SessionEnd::QueueClosed);
                                    }
                                }
                                Err(e) => {
                                    // Malformed message: drop and continue.
                                    self.parse_errors.fetch_add(1, Ordering::Relaxed);
                                    counter!("stream_parse_errors_total").increment(1);
                                    tracing::warn!("Dropping unparseable stream message: {}", e);
                                }
                            }
                        }
                        Message::Close(frame) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "no reason".into());
                            return Ok(SessionEnd::ConnectionLost(reason));
                        }
                        // Pongs and binary frames carry nothing for us.
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Why a websocket session ended.
enum SessionEnd {
    /// Read/write fault or peer close; reconnect.
    ConnectionLost(String),
    /// Shutdown flag cleared; exit cleanly.
    Stopped,
    /// Pipeline consumer went away; exit cleanly.
    QueueClosed,
}
