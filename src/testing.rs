//! Fakes shared by unit tests.

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use lapin::protocol::{AMQPError, AMQPErrorKind, AMQPSoftError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::broker::channel::{MessageChannel, TopologyChannel};
use crate::broker::circuit::CircuitMonitor;
use crate::broker::connector::{Link, LinkSession};
use crate::broker::topology::Role;
use crate::client::consumer::{Consumer, DeliverySource, Disposition, Inbound, Settle, StreamEnd};
use crate::persistence::{Sink, StoredMessage};
use crate::utils::error::{BrokerError, SinkError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOp {
    DeclareExchange { name: String, durable: bool },
    EnableConfirms,
    SetPrefetch(u16),
    DeclareQueue(String),
    Bind { queue: String, exchange: String, routing_key: String },
    Publish { exchange: String, routing_key: String, payload: Vec<u8>, confirmed: bool },
}

/// In-memory stand-in for a broker channel.
#[derive(Debug)]
pub struct FakeChannel {
    pub ops: Mutex<Vec<ChannelOp>>,
    pub open: AtomicBool,
    pub conflict_on_exchange: AtomicBool,
    pub nack_publishes: AtomicBool,
    queues: AtomicUsize,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            conflict_on_exchange: AtomicBool::new(false),
            nack_publishes: AtomicBool::new(false),
            queues: AtomicUsize::new(0),
        }
    }

    pub fn ops(&self) -> Vec<ChannelOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<ChannelOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, ChannelOp::Publish { .. }))
            .collect()
    }

    fn record(&self, op: ChannelOp) {
        self.ops.lock().unwrap().push(op);
    }
}

pub fn precondition_failed() -> lapin::Error {
    lapin::Error::ProtocolError(AMQPError::new(
        AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED),
        "PRECONDITION_FAILED - inequivalent arg 'durable' for exchange".into(),
    ))
}

#[async_trait]
impl MessageChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn publish_persistent(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        await_confirm: bool,
    ) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::Closed);
        }
        self.record(ChannelOp::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
            confirmed: await_confirm,
        });
        if await_confirm && self.nack_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Rejected);
        }
        Ok(())
    }
}

#[async_trait]
impl TopologyChannel for FakeChannel {
    async fn declare_fanout_exchange(&self, name: &str, durable: bool) -> Result<(), lapin::Error> {
        if self.conflict_on_exchange.load(Ordering::SeqCst) {
            return Err(precondition_failed());
        }
        self.record(ChannelOp::DeclareExchange {
            name: name.to_string(),
            durable,
        });
        Ok(())
    }

    async fn enable_confirms(&self) -> Result<(), lapin::Error> {
        self.record(ChannelOp::EnableConfirms);
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), lapin::Error> {
        self.record(ChannelOp::SetPrefetch(count));
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<String, lapin::Error> {
        let n = self.queues.fetch_add(1, Ordering::SeqCst);
        let name = format!("amq.gen-fake-{n}");
        self.record(ChannelOp::DeclareQueue(name.clone()));
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), lapin::Error> {
        self.record(ChannelOp::Bind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack(u64),
    Nack { tag: u64, requeue: bool },
}

/// Settle handle that writes into a shared log instead of the broker.
#[derive(Debug, Clone)]
pub struct RecordingAcker {
    pub tag: u64,
    pub log: Arc<Mutex<Vec<Settlement>>>,
}

impl RecordingAcker {
    pub fn new(tag: u64, log: &Arc<Mutex<Vec<Settlement>>>) -> Self {
        Self {
            tag,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Settle for RecordingAcker {
    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    async fn ack(self) -> Result<(), BrokerError> {
        self.log.lock().unwrap().push(Settlement::Ack(self.tag));
        Ok(())
    }

    async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.log.lock().unwrap().push(Settlement::Nack {
            tag: self.tag,
            requeue,
        });
        Ok(())
    }
}

/// Sink that keeps records in memory and can be told to fail or stall.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<StoredMessage>>,
    pub failures_left: AtomicUsize,
    pub delay: Option<Duration>,
    pub closed: AtomicBool,
}

impl MemorySink {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn stalling(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<StoredMessage> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn store(&self, record: &StoredMessage) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SinkError::Storage("store unreachable".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted session: a channel, an optional queue, a loss trigger and the
/// deliveries it hands to a consumer.
#[derive(Debug)]
pub struct FakeSession {
    pub channel: Arc<FakeChannel>,
    pub queue: Option<String>,
    lost: Option<oneshot::Receiver<String>>,
    deliveries: Vec<Inbound<RecordingAcker>>,
    stream_ends: bool,
}

impl FakeSession {
    /// Returns the session and the sender that reports it lost.
    pub fn new(queue: Option<&str>) -> (Self, oneshot::Sender<String>) {
        let (tx, rx) = oneshot::channel();
        let session = Self {
            channel: Arc::new(FakeChannel::new()),
            queue: queue.map(str::to_string),
            lost: Some(rx),
            deliveries: Vec::new(),
            stream_ends: false,
        };
        (session, tx)
    }

    /// Deliveries handed out on consume. With `then_end` the stream closes
    /// after them, otherwise it stays open until shutdown.
    pub fn with_deliveries(mut self, deliveries: Vec<Inbound<RecordingAcker>>, then_end: bool) -> Self {
        self.deliveries = deliveries;
        self.stream_ends = then_end;
        self
    }
}

#[async_trait]
impl LinkSession for FakeSession {
    type Channel = FakeChannel;

    fn channel(&self) -> Arc<FakeChannel> {
        self.channel.clone()
    }

    fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    async fn lost(&mut self) -> String {
        match self.lost.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| "loss trigger dropped".to_string()),
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl DeliverySource for FakeSession {
    async fn deliver_to(
        &mut self,
        consumer: &Consumer,
        shutdown: &CancellationToken,
        in_flight: &mut JoinSet<Disposition>,
    ) -> Result<StreamEnd, BrokerError> {
        let items = stream::iter(std::mem::take(&mut self.deliveries).into_iter().map(Ok));
        if self.stream_ends {
            Ok(consumer.drive(items, shutdown, in_flight).await)
        } else {
            Ok(consumer
                .drive(items.chain(stream::pending()), shutdown, in_flight)
                .await)
        }
    }
}

/// Link that hands out scripted sessions in order, then never connects again.
#[derive(Debug, Default)]
pub struct FakeLink {
    sessions: Mutex<VecDeque<Result<FakeSession, BrokerError>>>,
    roles: Mutex<Vec<Role>>,
    circuit: CircuitMonitor,
}

impl FakeLink {
    pub fn new(sessions: Vec<Result<FakeSession, BrokerError>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            ..Self::default()
        }
    }

    /// Roles of every `establish` call so far, including one still pending.
    pub fn roles(&self) -> Vec<Role> {
        self.roles.lock().unwrap().clone()
    }
}

#[async_trait]
impl Link for FakeLink {
    type Session = FakeSession;

    fn circuit(&self) -> &CircuitMonitor {
        &self.circuit
    }

    async fn establish(&self, role: Role) -> Result<FakeSession, BrokerError> {
        self.roles.lock().unwrap().push(role);
        let next = self.sessions.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}
