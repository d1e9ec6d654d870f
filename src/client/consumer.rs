//! Delivery handling for the consumer process.
//!
//! Per delivery: `Received → Deserializing → Sinking → {Acked | Nacked}`.
//! The settle handle is moved into [`handle_delivery`], which spends it on
//! exactly one `ack` or `nack`; the type system rules out a second settle and
//! every path through the function settles once.
//!
//! Deliveries are processed concurrently, one task each, so a slow store
//! only holds up its own delivery. Ordering across deliveries is whatever
//! the broker and the task scheduler produce.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::channel::channel_error;
use crate::broker::connector::Session;
use crate::broker::message::Envelope;
use crate::config::ConsumerSettings;
use crate::persistence::{Sink, StoredMessage};
use crate::utils::error::{BrokerError, ProcessingError};

/// Single-use handle that resolves one delivery tag.
#[async_trait]
pub trait Settle: Send + Sized + 'static {
    fn delivery_tag(&self) -> u64;

    async fn ack(self) -> Result<(), BrokerError>;

    /// Negative-acknowledges this delivery only (never `multiple`).
    async fn nack(self, requeue: bool) -> Result<(), BrokerError>;
}

/// Settles through lapin's acker.
#[derive(Debug)]
pub struct BrokerAcker {
    tag: u64,
    acker: Acker,
}

#[async_trait]
impl Settle for BrokerAcker {
    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    async fn ack(self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
            .map_err(channel_error)
    }

    async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map(|_| ())
            .map_err(channel_error)
    }
}

/// A delivery reduced to what processing needs.
#[derive(Debug)]
pub struct Inbound<A> {
    pub payload: Vec<u8>,
    pub redelivered: bool,
    pub acker: A,
}

impl From<Delivery> for Inbound<BrokerAcker> {
    fn from(delivery: Delivery) -> Self {
        Self {
            payload: delivery.data,
            redelivered: delivery.redelivered,
            acker: BrokerAcker {
                tag: delivery.delivery_tag,
                acker: delivery.acker,
            },
        }
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Requeued,
    /// Nacked without requeue; the broker drops or dead-letters it.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub sink_timeout: Duration,
    /// Stop requeueing a malformed payload once the broker marks it redelivered.
    pub discard_redelivered_malformed: bool,
}

impl From<&ConsumerSettings> for DeliveryPolicy {
    fn from(settings: &ConsumerSettings) -> Self {
        Self {
            sink_timeout: settings.sink_timeout(),
            discard_redelivered_malformed: settings.discard_redelivered_malformed,
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            sink_timeout: Duration::from_secs(10),
            discard_redelivered_malformed: false,
        }
    }
}

/// Parses the payload and stores it, bounded by `sink_timeout`.
pub async fn process_delivery<S: Sink + ?Sized>(
    payload: &[u8],
    sink: &S,
    sink_timeout: Duration,
) -> Result<Envelope, ProcessingError> {
    let envelope = Envelope::from_payload(payload)?;
    let record = StoredMessage::from(envelope.clone());

    match tokio::time::timeout(sink_timeout, sink.store(&record)).await {
        Ok(Ok(())) => Ok(envelope),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ProcessingError::SinkTimeout(sink_timeout)),
    }
}

/// Processes one delivery and settles its tag exactly once: ack when the
/// sink stored it, nack otherwise.
pub async fn handle_delivery<A: Settle, S: Sink + ?Sized>(
    inbound: Inbound<A>,
    sink: &S,
    policy: &DeliveryPolicy,
) -> Disposition {
    let Inbound {
        payload,
        redelivered,
        acker,
    } = inbound;
    let tag = acker.delivery_tag();

    match process_delivery(&payload, sink, policy.sink_timeout).await {
        Ok(envelope) => {
            if let Err(err) = acker.ack().await {
                // stays unacked; the broker redelivers once the channel goes
                warn!(tag, error = %err, "ack failed");
            }
            info!(tag, timestamp = %envelope.timestamp, "message stored and acknowledged");
            Disposition::Acked
        }
        Err(err) => {
            let requeue =
                !(policy.discard_redelivered_malformed && redelivered && err.is_permanent());
            warn!(
                tag,
                redelivered,
                requeue,
                label = err.as_label(),
                error = %err,
                "processing failed, negatively acknowledging"
            );
            if let Err(nack_err) = acker.nack(requeue).await {
                warn!(tag, error = %nack_err, "nack failed");
            }
            if requeue {
                Disposition::Requeued
            } else {
                Disposition::Discarded
            }
        }
    }
}

/// Why the delivery loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Shutdown,
    Lost(String),
}

/// Feeds a [`Consumer`] for the lifetime of one session.
#[async_trait]
pub trait DeliverySource: Send {
    async fn deliver_to(
        &mut self,
        consumer: &Consumer,
        shutdown: &CancellationToken,
        in_flight: &mut JoinSet<Disposition>,
    ) -> Result<StreamEnd, BrokerError>;
}

#[async_trait]
impl DeliverySource for Session {
    async fn deliver_to(
        &mut self,
        consumer: &Consumer,
        shutdown: &CancellationToken,
        in_flight: &mut JoinSet<Disposition>,
    ) -> Result<StreamEnd, BrokerError> {
        let queue = self.declared.queue.clone().ok_or_else(|| {
            BrokerError::Channel("consumer topology declared no queue".to_string())
        })?;
        consumer.consume(&self.channel, &queue, shutdown, in_flight).await
    }
}

/// Subscribes to the bound queue and hands every delivery to the sink.
pub struct Consumer {
    sink: Arc<dyn Sink>,
    policy: DeliveryPolicy,
    consumer_tag: String,
}

impl Consumer {
    pub fn new(sink: Arc<dyn Sink>, policy: DeliveryPolicy) -> Self {
        Self {
            sink,
            policy,
            consumer_tag: format!("messager-consumer-{}", Uuid::new_v4()),
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Consumes `queue` until shutdown or until the channel goes away.
    /// Spawned delivery tasks are left in `in_flight` for the caller to drain.
    pub async fn consume(
        &self,
        channel: &Channel,
        queue: &str,
        shutdown: &CancellationToken,
        in_flight: &mut JoinSet<Disposition>,
    ) -> Result<StreamEnd, BrokerError> {
        let deliveries = channel
            .basic_consume(
                queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)?;
        info!(queue, consumer_tag = %self.consumer_tag, "waiting for messages");

        let deliveries = deliveries.map(|next| next.map(Inbound::from).map_err(channel_error));
        let end = self.drive(deliveries, shutdown, in_flight).await;

        if end == StreamEnd::Shutdown {
            // stop the broker pushing more while in-flight work drains
            if let Err(err) = channel
                .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
                .await
            {
                warn!(error = %err, "basic.cancel failed");
            }
        }
        Ok(end)
    }

    /// Dispatches each delivery from `deliveries` onto its own task.
    pub async fn drive<St, A>(
        &self,
        deliveries: St,
        shutdown: &CancellationToken,
        in_flight: &mut JoinSet<Disposition>,
    ) -> StreamEnd
    where
        St: Stream<Item = Result<Inbound<A>, BrokerError>>,
        A: Settle,
    {
        let mut deliveries = std::pin::pin!(deliveries);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return StreamEnd::Shutdown,

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "delivery task failed");
                    }
                }

                next = deliveries.next() => match next {
                    Some(Ok(inbound)) => {
                        debug!(tag = inbound.acker.delivery_tag(), "delivery received");
                        let sink = self.sink.clone();
                        let policy = self.policy.clone();
                        in_flight.spawn(async move {
                            handle_delivery(inbound, sink.as_ref(), &policy).await
                        });
                    }
                    Some(Err(err)) => return StreamEnd::Lost(err.to_string()),
                    None => return StreamEnd::Lost("delivery stream ended".to_string()),
                },
            }
        }
    }
}
