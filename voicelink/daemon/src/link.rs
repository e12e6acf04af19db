//! WebSocket Link
//!
//! Owns the connection to the voice service and feeds the engine:
//!
//! ```text
//!    voice service
//!         │  ▲
//!  frames │  │ OutboundMessage (JSON text)
//!         ▼  │
//!   ┌─────────────┐   poll_deferred at next_deadline
//!   │    Link     │────────────────────────────┐
//!   └──────┬──────┘                            │
//!          │ TransportEvent                    │
//!          ▼                                   ▼
//!   ┌─────────────────────────────────────────────┐
//!   │                  Engine                     │
//!   └─────────────────────────────────────────────┘
//! ```
//!
//! One connection attempt per reconnect tick. A reboot request from the
//! service drops the engine and starts over with a fresh one, which is the
//! host-side equivalent of restarting the device.

use std::time::Instant as StdInstant;

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use voicelink_core::{
    Engine, FallbackClips, Flow, OutboundMessage, SimulatedDevice, TransportEvent,
    VoicelinkConfig,
};

/// How a connection ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The socket closed or failed
    Closed,
    /// The engine asked for a reboot
    Reboot,
    /// The daemon is shutting down
    Shutdown,
}

/// What a raw WebSocket read means to the engine
#[derive(Debug, PartialEq)]
enum Inbound {
    /// Hand this to the engine
    Event(TransportEvent),
    /// The connection is gone
    Closed(Option<String>),
    /// Control traffic the engine does not see
    Ignored,
}

fn classify(frame: Option<Result<Message, tungstenite::Error>>) -> Inbound {
    match frame {
        Some(Ok(Message::Text(text))) => Inbound::Event(TransportEvent::Text(text)),
        Some(Ok(Message::Binary(data))) => Inbound::Event(TransportEvent::Binary(data)),
        Some(Ok(Message::Close(frame))) => {
            Inbound::Closed(frame.map(|f| format!("closed by server: {}", f.reason)))
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Inbound::Ignored,
        Some(Err(e)) => Inbound::Closed(Some(e.to_string())),
        None => Inbound::Closed(None),
    }
}

/// Resolve when the engine's next deferred action is due
async fn deferred_due(deadline: Option<StdInstant>) {
    match deadline {
        Some(deadline) => time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}

/// The daemon's connection manager
pub struct Link {
    config: VoicelinkConfig,
    fallback: FallbackClips,
    device: SimulatedDevice,
}

impl Link {
    /// Create a link for the given configuration and device
    pub fn new(config: VoicelinkConfig, fallback: FallbackClips, device: SimulatedDevice) -> Self {
        Self {
            config,
            fallback,
            device,
        }
    }

    fn fresh_engine(&self) -> (Engine, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine::new(
            self.config.engine.clone(),
            self.device.device(),
            self.fallback.clone(),
            tx,
        );
        (engine, rx)
    }

    /// Connect, reconnect and reboot until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (mut engine, mut outbound) = self.fresh_engine();

        let mut reconnect = time::interval(self.config.link.reconnect_interval);
        reconnect.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = reconnect.tick() => {}
                _ = shutdown.changed() => break,
            }

            match self.connect_once(&mut engine, &mut outbound, &mut shutdown).await {
                Ok(LinkOutcome::Shutdown) => break,
                Ok(LinkOutcome::Reboot) => {
                    info!("Device reboot requested, starting a fresh engine");
                    (engine, outbound) = self.fresh_engine();
                    reconnect.reset_immediately();
                }
                Ok(LinkOutcome::Closed) => {
                    info!(
                        retry_in_ms = self.config.link.reconnect_interval.as_millis(),
                        "Connection closed, will reconnect"
                    );
                }
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Connection attempt failed");
                }
            }
        }

        info!("Link stopped");
        Ok(())
    }

    async fn connect_once(
        &self,
        engine: &mut Engine,
        outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<LinkOutcome> {
        let url = self.config.link.url.as_str();
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;
        info!(%url, "WebSocket connected");

        let (sink, stream) = ws.split();
        drive(engine, outbound, sink, stream, shutdown).await
    }
}

/// Run one connection from `Connected` to its end
///
/// Unless the engine rebooted, it always sees `Disconnected` afterwards,
/// whichever way the connection ended.
async fn drive<S, R>(
    engine: &mut Engine,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    mut sink: S,
    mut stream: R,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<LinkOutcome>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let result = match engine.handle_event(TransportEvent::Connected, StdInstant::now()) {
        Ok(Flow::Reboot) => Ok(LinkOutcome::Reboot),
        Ok(Flow::Continue) => pump(engine, outbound, &mut sink, &mut stream, shutdown).await,
        Err(e) => Err(e.into()),
    };

    // Flush replies queued by the last event before the socket goes away
    while let Ok(message) = outbound.try_recv() {
        let Ok(text) = message.to_text() else {
            continue;
        };
        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(error = %e, "Dropping reply, socket already closed");
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "WebSocket close failed");
    }

    if !matches!(result, Ok(LinkOutcome::Reboot)) {
        engine.handle_event(TransportEvent::Disconnected, StdInstant::now())?;
    }
    result
}

/// Shuttle frames between socket and engine until the connection ends
async fn pump<S, R>(
    engine: &mut Engine,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    sink: &mut S,
    stream: &mut R,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<LinkOutcome>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let deadline = engine.next_deadline();

        tokio::select! {
            frame = stream.next() => {
                let event = match classify(frame) {
                    Inbound::Event(event) => event,
                    Inbound::Ignored => continue,
                    Inbound::Closed(reason) => {
                        if let Some(reason) = reason {
                            engine.handle_event(TransportEvent::Error(reason), StdInstant::now())?;
                        }
                        return Ok(LinkOutcome::Closed);
                    }
                };
                let flow = engine.handle_event(event, StdInstant::now())?;
                report_pin_reads(engine);
                if flow == Flow::Reboot {
                    return Ok(LinkOutcome::Reboot);
                }
            }
            Some(message) = outbound.recv() => {
                let text = message.to_text().context("Failed to encode outbound frame")?;
                debug!(%text, "Sending control frame");
                sink.send(Message::Text(text)).await.context("Failed to send frame")?;
            }
            () = deferred_due(deadline) => {
                if engine.poll_deferred(StdInstant::now())? == Flow::Reboot {
                    return Ok(LinkOutcome::Reboot);
                }
            }
            _ = shutdown.changed() => return Ok(LinkOutcome::Shutdown),
        }
    }
}

/// The simulated device has no pins to sample; log what the service asked for
fn report_pin_reads(engine: &mut Engine) {
    let reads = engine.pending_reads_mut();
    if reads.is_empty() {
        return;
    }
    let digital = reads.take_digital();
    let analog = reads.take_analog();
    info!(?digital, ?analog, "Pin reads requested");
}
