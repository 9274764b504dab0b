//! Scripted in-memory adapter for tests

use super::adapter::{AdapterEvent, BleAdapter, NotificationHandler, WriteMode};
use super::error::AdapterError;
use super::protocol::BotCommand;
use async_trait::async_trait;
use btleplug::api::BDAddr;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Simulated time every transport operation takes
const OP_DELAY: Duration = Duration::from_millis(20);
/// Delay before a command answer is notified
const ANSWER_DELAY: Duration = Duration::from_millis(5);
/// What a bot notifies after GetInfo: ok status followed by the battery level
const INFO_ANSWER: [u8; 2] = [0x01, 0x64];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockConnection {
    id: u64,
    address: BDAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockCharacteristic {
    pub index: usize,
}

pub struct MockAdapter {
    connect_failures: AtomicU32,
    characteristic_count: AtomicUsize,
    write_fails: AtomicBool,
    answer: Mutex<Option<u8>>,
    info_answers: AtomicBool,
    next_id: AtomicU64,
    handlers: Mutex<HashMap<u64, NotificationHandler>>,
    subscribed: Mutex<Option<usize>>,
    writes: Mutex<Vec<(usize, Vec<u8>, WriteMode)>>,
    in_flight: Mutex<HashMap<BDAddr, usize>>,
    events: Mutex<Option<mpsc::UnboundedSender<AdapterEvent>>>,
    pub scanning: AtomicBool,
    pub connect_attempts: AtomicU32,
    pub connects: AtomicU32,
    pub characteristic_discoveries: AtomicU32,
    pub subscribes: AtomicU32,
    pub unsubscribes: AtomicU32,
    pub disconnects: AtomicU32,
    pub scan_stops: AtomicU32,
    pub overlaps: AtomicU32,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            connect_failures: AtomicU32::new(0),
            characteristic_count: AtomicUsize::new(2),
            write_fails: AtomicBool::new(false),
            answer: Mutex::new(Some(0x01)),
            info_answers: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            events: Mutex::new(None),
            scanning: AtomicBool::new(false),
            connect_attempts: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            characteristic_discoveries: AtomicU32::new(0),
            subscribes: AtomicU32::new(0),
            unsubscribes: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            scan_stops: AtomicU32::new(0),
            overlaps: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` connection attempts
    pub fn fail_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_characteristic_count(&self, count: usize) {
        self.characteristic_count.store(count, Ordering::SeqCst);
    }

    pub fn set_write_fails(&self, fails: bool) {
        self.write_fails.store(fails, Ordering::SeqCst);
    }

    /// Status byte notified after each press; `None` never answers
    pub fn respond_with(&self, answer: Option<u8>) {
        *self.answer.lock().unwrap() = answer;
    }

    /// Whether GetInfo gets a notification back
    pub fn set_info_answers(&self, answers: bool) {
        self.info_answers.store(answers, Ordering::SeqCst);
    }

    /// Deliver a notification on every live subscription
    pub fn notify(&self, payload: &[u8]) {
        let handlers: Vec<_> = self.handlers.lock().unwrap().values().cloned().collect();
        for handler in handlers {
            handler(payload);
        }
    }

    /// Push an adapter event to whoever called `events`
    pub fn emit(&self, event: AdapterEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn subscribed_characteristic(&self) -> Option<usize> {
        *self.subscribed.lock().unwrap()
    }

    pub fn written_characteristics(&self) -> Vec<usize> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(index, _, _)| *index)
            .collect()
    }

    /// Write modes used for every write of `command`, in order
    pub fn write_modes(&self, command: BotCommand) -> Vec<WriteMode> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, data, _)| data.as_slice() == command.as_bytes())
            .map(|(_, _, mode)| *mode)
            .collect()
    }

    pub fn info_writes(&self) -> usize {
        self.write_modes(BotCommand::GetInfo).len()
    }

    pub fn press_writes(&self) -> usize {
        self.write_modes(BotCommand::Press).len()
    }

    /// Simulate a transport operation on `address`. Every operation that
    /// starts while another one on the same address is running counts as an
    /// overlap.
    async fn transport_op(&self, address: BDAddr) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let running = in_flight.entry(address).or_insert(0);
            if *running > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            *running += 1;
        }
        tokio::time::sleep(OP_DELAY).await;
        if let Some(running) = self.in_flight.lock().unwrap().get_mut(&address) {
            *running -= 1;
        }
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    type Connection = MockConnection;
    type Service = Uuid;
    type Characteristic = MockCharacteristic;

    async fn enable(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<AdapterEvent>, AdapterError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn start_scan(&self) -> Result<(), AdapterError> {
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.scanning.store(false, Ordering::SeqCst);
        self.scan_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, address: BDAddr) -> Result<MockConnection, AdapterError> {
        self.transport_op(address).await;
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AdapterError::ConnectionFailed("simulated".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            address,
        })
    }

    async fn discover_services(
        &self,
        connection: &MockConnection,
        filter: &[Uuid],
    ) -> Result<Vec<Uuid>, AdapterError> {
        self.transport_op(connection.address).await;
        Ok(filter.to_vec())
    }

    async fn discover_characteristics(
        &self,
        connection: &MockConnection,
        _service: &Uuid,
    ) -> Result<Vec<MockCharacteristic>, AdapterError> {
        self.transport_op(connection.address).await;
        self.characteristic_discoveries.fetch_add(1, Ordering::SeqCst);
        let count = self.characteristic_count.load(Ordering::SeqCst);
        Ok((0..count).map(|index| MockCharacteristic { index }).collect())
    }

    async fn write(
        &self,
        connection: &MockConnection,
        characteristic: &MockCharacteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), AdapterError> {
        self.transport_op(connection.address).await;
        if self.write_fails.load(Ordering::SeqCst) {
            return Err(AdapterError::WriteFailed("simulated".to_string()));
        }
        self.writes
            .lock()
            .unwrap()
            .push((characteristic.index, data.to_vec(), mode));

        let answer = if data == BotCommand::Press.as_bytes() {
            self.answer.lock().unwrap().map(|byte| vec![byte])
        } else if data == BotCommand::GetInfo.as_bytes() && self.info_answers.load(Ordering::SeqCst)
        {
            Some(INFO_ANSWER.to_vec())
        } else {
            None
        };
        let handler = self.handlers.lock().unwrap().get(&connection.id).cloned();
        if let (Some(payload), Some(handler)) = (answer, handler) {
            tokio::spawn(async move {
                tokio::time::sleep(ANSWER_DELAY).await;
                handler(&payload);
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        connection: &MockConnection,
        characteristic: &MockCharacteristic,
        handler: NotificationHandler,
    ) -> Result<(), AdapterError> {
        self.transport_op(connection.address).await;
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        *self.subscribed.lock().unwrap() = Some(characteristic.index);
        self.handlers.lock().unwrap().insert(connection.id, handler);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        connection: &MockConnection,
        _characteristic: &MockCharacteristic,
    ) -> Result<(), AdapterError> {
        self.transport_op(connection.address).await;
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().remove(&connection.id);
        Ok(())
    }

    async fn disconnect(&self, connection: &MockConnection) -> Result<(), AdapterError> {
        self.transport_op(connection.address).await;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().remove(&connection.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn address(last: u8) -> BDAddr {
        BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlaps_counted_per_address() {
        let adapter = Arc::new(MockAdapter::new());

        // Different bots never conflict
        tokio::join!(
            adapter.transport_op(address(1)),
            adapter.transport_op(address(2))
        );
        assert_eq!(adapter.overlaps.load(Ordering::SeqCst), 0);

        // A runs 0..20, B 10..30, C 25..45: B overlaps A, and C overlaps B
        // after A has already finished
        let staggered = |delay: u64| {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                adapter.transport_op(address(1)).await;
            })
        };
        let (a, b, c) = (staggered(0), staggered(10), staggered(25));
        let _ = tokio::join!(a, b, c);
        assert_eq!(adapter.overlaps.load(Ordering::SeqCst), 2);

        adapter.transport_op(address(1)).await;
        assert_eq!(adapter.overlaps.load(Ordering::SeqCst), 2);
    }
}
