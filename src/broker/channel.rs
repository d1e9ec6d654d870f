//! The broker channel as seen by the roles above the connector.
//!
//! Roles never hold a `lapin::Channel` directly. The publishing side reads
//! the current channel out of a [`ChannelSlot`], which only the connector
//! writes. Both seams are traits so the roles can run against a fake.

use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use std::sync::{Arc, PoisonError, RwLock};

use crate::utils::error::BrokerError;

/// AMQP delivery mode asking the broker to write the message to disk.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Publishing operations used by the producer.
#[async_trait]
pub trait MessageChannel: Send + Sync + 'static {
    fn is_open(&self) -> bool;

    /// Publishes `payload` as a persistent JSON message. With
    /// `await_confirm`, waits for the broker's publisher confirm.
    async fn publish_persistent(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        await_confirm: bool,
    ) -> Result<(), BrokerError>;
}

/// Declaration operations used by the topology manager.
#[async_trait]
pub trait TopologyChannel: Send + Sync {
    async fn declare_fanout_exchange(&self, name: &str, durable: bool) -> Result<(), lapin::Error>;

    async fn enable_confirms(&self) -> Result<(), lapin::Error>;

    async fn set_prefetch(&self, count: u16) -> Result<(), lapin::Error>;

    /// Declares a broker-named, exclusive, non-durable queue and returns its name.
    async fn declare_exclusive_queue(&self) -> Result<String, lapin::Error>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), lapin::Error>;
}

pub(crate) fn channel_error(err: lapin::Error) -> BrokerError {
    match err {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::Closed
        }
        other => BrokerError::Channel(other.to_string()),
    }
}

#[async_trait]
impl MessageChannel for Channel {
    fn is_open(&self) -> bool {
        self.status().connected()
    }

    async fn publish_persistent(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        await_confirm: bool,
    ) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_content_type(JSON_CONTENT_TYPE.into())
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE);

        let confirm = self
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(channel_error)?;

        if !await_confirm {
            return Ok(());
        }

        match confirm.await.map_err(channel_error)? {
            Confirmation::Nack(_) => Err(BrokerError::Rejected),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl TopologyChannel for Channel {
    async fn declare_fanout_exchange(&self, name: &str, durable: bool) -> Result<(), lapin::Error> {
        self.exchange_declare(
            name,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
    }

    async fn enable_confirms(&self) -> Result<(), lapin::Error> {
        self.confirm_select(ConfirmSelectOptions::default()).await
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), lapin::Error> {
        self.basic_qos(count, BasicQosOptions::default()).await
    }

    async fn declare_exclusive_queue(&self) -> Result<String, lapin::Error> {
        let queue = self
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), lapin::Error> {
        self.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
    }
}

/// Process-wide handle to the current channel.
///
/// Written by the connector on connect and cleared on disconnect; read by
/// every publish. Clones share the same slot.
#[derive(Debug)]
pub struct ChannelSlot<C> {
    inner: Arc<RwLock<Option<Arc<C>>>>,
}

impl<C> Clone for ChannelSlot<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> Default for ChannelSlot<C> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }
}

impl<C: MessageChannel> ChannelSlot<C> {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replaces whatever channel was installed before.
    pub fn install(&self, channel: Arc<C>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    pub fn clear(&self) -> Option<Arc<C>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The installed channel, if there is one and it is still open.
    pub fn current(&self) -> Option<Arc<C>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|channel| channel.is_open())
            .cloned()
    }

    pub fn is_available(&self) -> bool {
        self.current().is_some()
    }
}
