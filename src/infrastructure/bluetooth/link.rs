//! Bot link lifecycle
//!
//! One [`Link`] exists per bot for the whole process. It owns the bot's
//! transport resources, shares them between any number of sessions through a
//! reference count, and closes them after a grace period once the last
//! session lets go.
//!
//! ```text
//!  Closed ──acquire──▶ Connecting ──▶ Discovering ──▶ Ready
//!    ▲                     │               │            │ release (count 0)
//!    │◀────── failure ─────┴───────────────┘            ▼
//!    └──────────────── grace timer fired ◀──────── grace period
//!                                    reacquire ──▶ Ready
//! ```
//!
//! Every operation that touches the transport (`acquire`, `press`, the
//! deferred close and the keep-alive check) runs under the link's own lock,
//! so they never interleave on the same bot.

use crate::domain::models::{ActuatorKind, BotStatus, LinkPhase, LinkSnapshot};
use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::adapter::{BleAdapter, NotificationHandler};
use crate::infrastructure::bluetooth::connection::{BleConnection, Connected, ConnectionConfig};
use crate::infrastructure::bluetooth::error::{AdapterError, LinkError};
use crate::infrastructure::bluetooth::protocol::{self, BotCommand};
use crate::infrastructure::bluetooth::response_slot::ResponseSlot;
use btleplug::api::BDAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Timing and retry configuration of a link
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub connection: ConnectionConfig,
    /// Delay between the last release and the actual disconnect
    pub grace_period: Duration,
    /// Upper bound on waiting for a command's notification
    pub press_timeout: Duration,
    /// Info interval while the link has holders; `None` disables it
    pub keep_alive: Option<Duration>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::from(&LinkSettings::default())
    }
}

impl From<&LinkSettings> for LinkOptions {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            connection: ConnectionConfig::from(settings),
            grace_period: Duration::from_secs(settings.grace_period_secs),
            press_timeout: Duration::from_millis(settings.press_timeout_ms),
            keep_alive: (settings.keep_alive_secs > 0)
                .then(|| Duration::from_secs(settings.keep_alive_secs)),
        }
    }
}

enum LinkState<A: BleAdapter> {
    Closed,
    Connecting,
    Discovering,
    Ready(Connected<A>),
}

impl<A: BleAdapter> LinkState<A> {
    fn phase(&self) -> LinkPhase {
        match self {
            Self::Closed => LinkPhase::Closed,
            Self::Connecting => LinkPhase::Connecting,
            Self::Discovering => LinkPhase::Discovering,
            Self::Ready(_) => LinkPhase::Ready,
        }
    }
}

struct PendingClose {
    generation: u64,
    task: JoinHandle<()>,
}

struct LinkInner<A: BleAdapter> {
    state: LinkState<A>,
    ref_count: usize,
    pending_close: Option<PendingClose>,
    close_generation: u64,
    keep_alive: Option<JoinHandle<()>>,
    last_activity: Instant,
}

pub struct Link<A: BleAdapter> {
    kind: ActuatorKind,
    address: BDAddr,
    adapter: Arc<A>,
    options: LinkOptions,
    responses: ResponseSlot,
    inner: Mutex<LinkInner<A>>,
}

impl<A: BleAdapter> Link<A> {
    pub fn new(kind: ActuatorKind, address: BDAddr, adapter: Arc<A>, options: LinkOptions) -> Self {
        Self {
            kind,
            address,
            adapter,
            options,
            responses: ResponseSlot::new(),
            inner: Mutex::new(LinkInner {
                state: LinkState::Closed,
                ref_count: 0,
                pending_close: None,
                close_generation: 0,
                keep_alive: None,
                last_activity: Instant::now(),
            }),
        }
    }

    pub fn kind(&self) -> ActuatorKind {
        self.kind
    }

    pub fn address(&self) -> BDAddr {
        self.address
    }

    /// Take a reference on the link, connecting it if needed.
    ///
    /// Concurrent callers serialize on the link lock; the second one finds the
    /// link `Ready` and returns without touching the transport. A failed
    /// acquisition leaves the count as it was before the call.
    pub async fn acquire(self: &Arc<Self>) -> Result<(), LinkError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        inner.ref_count += 1;
        if let Some(pending) = inner.pending_close.take() {
            pending.task.abort();
            info!("{} reacquired, pending close cancelled", self.kind);
        }

        if let LinkState::Ready(connected) = &inner.state {
            if inner.ref_count > 1 {
                info!("{} already opened. Users: {}", self.kind, inner.ref_count);
                return Ok(());
            }

            debug!("Checking if {} is still connected", self.kind);
            match self.check_alive(connected).await {
                Ok(()) => {
                    inner.last_activity = Instant::now();
                    self.start_keep_alive(inner);
                    info!("{} still connected. Users: {}", self.kind, inner.ref_count);
                    return Ok(());
                }
                Err(e) => {
                    warn!("{} dropped the connection ({}), reconnecting", self.kind, e);
                    self.teardown(inner).await;
                }
            }
        }

        match self.establish(inner).await {
            Ok(()) => {
                self.start_keep_alive(inner);
                info!("{} opened. Users: {}", self.kind, inner.ref_count);
                Ok(())
            }
            Err(e) => {
                inner.ref_count -= 1;
                warn!("{} failed to open: {}. Users: {}", self.kind, e, inner.ref_count);
                Err(e)
            }
        }
    }

    /// Press the bot's button and wait for its status notification
    pub async fn press(&self) -> BotStatus {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        info!("Pressing {}", self.kind);

        let LinkState::Ready(connected) = &inner.state else {
            warn!("{} is not connected, press rejected", self.kind);
            return BotStatus::WriteError;
        };

        if let Err(e) = self.send_command(connected, BotCommand::Press).await {
            warn!("Failed writing characteristic {}: {}", self.kind, e);
            return BotStatus::WriteError;
        }
        inner.last_activity = Instant::now();

        match tokio::time::timeout(self.options.press_timeout, self.responses.recv()).await {
            Ok(byte) => {
                let status = protocol::status_from_byte(byte);
                info!("{} answered {:#04x} ({:?})", self.kind, byte, status);
                status
            }
            Err(_) => {
                warn!(
                    "{} sent no response within {:?}",
                    self.kind, self.options.press_timeout
                );
                BotStatus::Timeout
            }
        }
    }

    /// Drop a reference. The last one starts the grace period.
    pub async fn release(self: &Arc<Self>) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if inner.ref_count == 0 {
            warn!("{} released without holders", self.kind);
            return;
        }
        inner.ref_count -= 1;
        info!("{} abandoned. Users: {}", self.kind, inner.ref_count);
        if inner.ref_count > 0 {
            return;
        }

        if let Some(task) = inner.keep_alive.take() {
            task.abort();
        }
        if !matches!(inner.state, LinkState::Ready(_)) {
            return;
        }

        inner.close_generation += 1;
        let generation = inner.close_generation;
        let grace = self.options.grace_period;
        let link = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            link.deferred_close(generation).await;
        });
        inner.pending_close = Some(PendingClose {
            generation,
            task,
        });
        debug!("{} closes in {:?} unless reacquired", self.kind, grace);
    }

    /// Tear the link down now, regardless of holders
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(pending) = inner.pending_close.take() {
            pending.task.abort();
        }
        if matches!(inner.state, LinkState::Ready(_)) {
            info!("Closing {} for shutdown", self.kind);
        }
        self.teardown(inner).await;
    }

    pub async fn snapshot(&self) -> LinkSnapshot {
        let inner = self.inner.lock().await;
        LinkSnapshot {
            phase: inner.state.phase(),
            ref_count: inner.ref_count,
            close_pending: inner.pending_close.is_some(),
        }
    }

    async fn deferred_close(&self, generation: u64) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        match &inner.pending_close {
            Some(pending) if pending.generation == generation => {}
            _ => {
                debug!("Stale close timer for {} ignored", self.kind);
                return;
            }
        }
        inner.pending_close = None;
        if inner.ref_count > 0 {
            return;
        }

        info!("Grace period over, closing {}", self.kind);
        self.teardown(inner).await;
    }

    async fn establish(&self, inner: &mut LinkInner<A>) -> Result<(), LinkError> {
        let steps = BleConnection::new(self.adapter.as_ref(), self.address, &self.options.connection);

        inner.state = LinkState::Connecting;
        let connection = match steps.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                inner.state = LinkState::Closed;
                return Err(e);
            }
        };

        inner.state = LinkState::Discovering;
        let discovered = async {
            let service = steps.discover_service(&connection).await?;
            let (notify, write) = steps.discover_characteristics(&service, &connection).await?;
            steps
                .arm_notifications(&connection, &notify, self.notification_handler())
                .await?;
            Ok::<_, LinkError>((service, notify, write))
        }
        .await;

        match discovered {
            Ok((service, notify, write)) => {
                inner.state = LinkState::Ready(Connected {
                    connection,
                    service,
                    notify,
                    write,
                });
                inner.last_activity = Instant::now();
                Ok(())
            }
            Err(e) => {
                if let Err(disconnect_err) = self.adapter.disconnect(&connection).await {
                    debug!("Disconnect after failed discovery: {}", disconnect_err);
                }
                inner.state = LinkState::Closed;
                Err(e)
            }
        }
    }

    /// Drain any unread status, then write `command`
    async fn send_command(
        &self,
        connected: &Connected<A>,
        command: BotCommand,
    ) -> Result<(), AdapterError> {
        self.responses.clear();
        self.adapter
            .write(
                &connected.connection,
                &connected.write,
                command.as_bytes(),
                command.write_mode(),
            )
            .await
    }

    /// GetInfo liveness check. Its answer is consumed here, under the lock,
    /// and never reaches a later press.
    async fn check_alive(&self, connected: &Connected<A>) -> Result<(), AdapterError> {
        self.send_command(connected, BotCommand::GetInfo).await?;
        match tokio::time::timeout(self.options.press_timeout, self.responses.recv()).await {
            Ok(byte) => debug!("{} info answer {:#04x}", self.kind, byte),
            Err(_) => warn!("{} did not answer the info request", self.kind),
        }
        Ok(())
    }

    async fn teardown(&self, inner: &mut LinkInner<A>) {
        if let Some(task) = inner.keep_alive.take() {
            task.abort();
        }
        let state = std::mem::replace(&mut inner.state, LinkState::Closed);
        if let LinkState::Ready(connected) = state {
            if let Err(e) = self
                .adapter
                .unsubscribe(&connected.connection, &connected.notify)
                .await
            {
                debug!("Unsubscribe from {} failed: {}", self.kind, e);
            }
            if let Err(e) = self.adapter.disconnect(&connected.connection).await {
                warn!("Disconnect from {} failed: {}", self.kind, e);
            }
            info!("{} closed", self.kind);
        }
        self.responses.clear();
    }

    fn notification_handler(&self) -> NotificationHandler {
        let slot = self.responses.clone();
        let kind = self.kind;
        Arc::new(move |payload: &[u8]| match protocol::status_byte(payload) {
            Some(byte) => {
                debug!("{} notified {:02X?}", kind, payload);
                slot.put(byte);
            }
            None => debug!("{} sent an empty notification", kind),
        })
    }

    fn start_keep_alive(self: &Arc<Self>, inner: &mut LinkInner<A>) {
        let Some(interval) = self.options.keep_alive else {
            return;
        };
        if inner.keep_alive.is_some() {
            return;
        }
        let link = Arc::clone(self);
        inner.keep_alive = Some(tokio::spawn(async move {
            link.keep_alive_loop(interval).await;
        }));
    }

    async fn keep_alive_loop(&self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;

            let LinkState::Ready(connected) = &inner.state else {
                inner.keep_alive = None;
                return;
            };
            if inner.ref_count == 0 {
                inner.keep_alive = None;
                return;
            }
            if inner.last_activity.elapsed() < interval {
                continue;
            }

            debug!("Getting info {}", self.kind);
            match self.check_alive(connected).await {
                Ok(()) => inner.last_activity = Instant::now(),
                Err(e) => warn!("Keep-alive info to {} failed: {}", self.kind, e),
            }
        }
    }
}
