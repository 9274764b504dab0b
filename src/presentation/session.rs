//! Session multiplexer
//!
//! Bridges one client connection to the links it is entitled to. Links are
//! acquired in the background while the session already accepts commands;
//! every link whose acquisition succeeded is released exactly once when the
//! session ends, whichever way it ends.

use crate::domain::models::{ActuatorKind, ClientAnswer, Entitlement};
use crate::infrastructure::bluetooth::{BleAdapter, DeviceRegistry};
use crate::presentation::messages::{ClientCommand, ServerMessage};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn, Instrument};

/// Outbound half, shared by the heartbeat, the acquisitions and the command loop
type Writer<Tx> = Arc<Mutex<Tx>>;

async fn send<Tx>(writer: &Writer<Tx>, message: ServerMessage) -> Result<(), Tx::Error>
where
    Tx: Sink<Message> + Unpin,
{
    writer
        .lock()
        .await
        .send(Message::text(message.to_text()))
        .await
}

pub struct Session<A: BleAdapter> {
    id: u64,
    registry: Arc<DeviceRegistry<A>>,
    entitlement: Entitlement,
    heartbeat_interval: Duration,
}

impl<A: BleAdapter> Session<A> {
    pub fn new(
        id: u64,
        registry: Arc<DeviceRegistry<A>>,
        entitlement: Entitlement,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            id,
            registry,
            entitlement,
            heartbeat_interval,
        }
    }

    /// Serve the client until it goes away
    pub async fn run<Tx, Rx>(self, tx: Tx, mut rx: Rx)
    where
        Tx: Sink<Message> + Unpin + Send + 'static,
        Tx::Error: Display + Send,
        Rx: Stream<Item = Result<Message, WsError>> + Unpin + Send,
    {
        info!("Session {} started ({:?})", self.id, self.entitlement);
        let writer: Writer<Tx> = Arc::new(Mutex::new(tx));
        let closed = Arc::new(Notify::new());

        let acquisitions: Vec<(ActuatorKind, JoinHandle<bool>)> = self
            .entitlement
            .actuators()
            .iter()
            .map(|&kind| (kind, self.spawn_acquisition(kind, Arc::clone(&writer))))
            .collect();
        let heartbeat = self.spawn_heartbeat(Arc::clone(&writer), Arc::clone(&closed));

        loop {
            let frame = tokio::select! {
                _ = closed.notified() => break,
                frame = rx.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), &writer).await,
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    info!("Read failed: {}", e);
                    break;
                }
            }
        }

        heartbeat.abort();
        for (kind, acquisition) in acquisitions {
            match acquisition.await {
                Ok(true) => self.registry.link(kind).release().await,
                Ok(false) => {}
                Err(e) => warn!("{} acquisition task failed: {}", kind, e),
            }
        }
        info!("Session {} ended", self.id);
    }

    fn spawn_acquisition<Tx>(&self, kind: ActuatorKind, writer: Writer<Tx>) -> JoinHandle<bool>
    where
        Tx: Sink<Message> + Unpin + Send + 'static,
        Tx::Error: Display + Send,
    {
        let link = Arc::clone(self.registry.link(kind));
        tokio::spawn(
            async move {
                let acquired = link.acquire().await;
                let message = match &acquired {
                    Ok(()) => ServerMessage::Connected(kind),
                    Err(e) => {
                        warn!("Opening {} failed: {}", kind, e);
                        ServerMessage::ConnectError(kind)
                    }
                };
                if let Err(e) = send(&writer, message).await {
                    debug!("Could not report {} outcome: {}", kind, e);
                }
                acquired.is_ok()
            }
            .in_current_span(),
        )
    }

    /// The first failed send is taken as the client being gone
    fn spawn_heartbeat<Tx>(&self, writer: Writer<Tx>, closed: Arc<Notify>) -> JoinHandle<()>
    where
        Tx: Sink<Message> + Unpin + Send + 'static,
        Tx::Error: Display + Send,
    {
        let period = self.heartbeat_interval;
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    if let Err(e) = send(&writer, ServerMessage::Ping).await {
                        info!("Ping failed: {}", e);
                        closed.notify_one();
                        return;
                    }
                }
            }
            .in_current_span(),
        )
    }

    async fn handle_text<Tx>(&self, text: &str, writer: &Writer<Tx>)
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        let Some(ClientCommand::Press(kind)) = ClientCommand::parse(text) else {
            warn!("Unrecognized message {:?}", text);
            return;
        };
        if !self.entitlement.allows(kind) {
            warn!("{} is not available on this endpoint", kind);
            return;
        }

        let status = self.registry.link(kind).press().await;
        let answer = ClientAnswer::from(status);
        info!("{} press: {:?}, answering {}", kind, status, answer);
        if let Err(e) = send(writer, ServerMessage::Result(kind, answer)).await {
            debug!("Could not send {} result: {}", kind, e);
        }
    }
}
