use lapin::Channel;
use tracing::{info, warn};

use crate::broker::channel::{ChannelSlot, MessageChannel};
use crate::broker::message::Envelope;
use crate::broker::topology::FANOUT_ROUTING_KEY;
use crate::utils::error::{PublishError, ValidationError};

/// Publishes envelopes to the fanout exchange over whatever channel the
/// connector has installed in the slot.
///
/// No buffering: with no open channel the request is refused with
/// [`PublishError::Unavailable`] and the caller decides what to do.
#[derive(Debug)]
pub struct Publisher<C = Channel> {
    slot: ChannelSlot<C>,
    exchange: String,
    confirms: bool,
}

impl<C> Clone for Publisher<C> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            exchange: self.exchange.clone(),
            confirms: self.confirms,
        }
    }
}

impl<C: MessageChannel> Publisher<C> {
    pub fn new(slot: ChannelSlot<C>, exchange: impl Into<String>, confirms: bool) -> Self {
        Self {
            slot,
            exchange: exchange.into(),
            confirms,
        }
    }

    pub fn is_available(&self) -> bool {
        self.slot.is_available()
    }

    /// Wraps `raw` in an [`Envelope`] stamped now and publishes it as a
    /// persistent message with an empty routing key.
    pub async fn publish(&self, raw: &str) -> Result<Envelope, PublishError> {
        if raw.is_empty() {
            return Err(ValidationError::MissingMessage.into());
        }

        let Some(channel) = self.slot.current() else {
            warn!("publish refused, no open broker channel");
            return Err(PublishError::Unavailable);
        };

        let envelope = Envelope::new(raw)?;
        let payload = envelope
            .to_payload()
            .map_err(|e| PublishError::Internal(e.to_string()))?;

        channel
            .publish_persistent(&self.exchange, FANOUT_ROUTING_KEY, &payload, self.confirms)
            .await
            .map_err(|err| {
                warn!(error = %err, label = err.as_label(), "publish failed");
                PublishError::from(err)
            })?;

        info!(
            exchange = %self.exchange,
            timestamp = %envelope.timestamp,
            bytes = payload.len(),
            "message published"
        );
        Ok(envelope)
    }
}
