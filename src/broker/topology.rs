//! Exchange, queue and binding declaration.
//!
//! Both roles declare the durable fanout exchange. The consumer additionally
//! gets a fresh exclusive queue bound to it on every (re)connect; the broker
//! deletes that queue when the owning connection goes away.

use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use tracing::{debug, info};

use crate::broker::channel::TopologyChannel;
use crate::config::RabbitMqSettings;
use crate::utils::error::BrokerError;

/// Fanout exchanges ignore the routing key; everything is published with this.
pub const FANOUT_ROUTING_KEY: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Consumer,
}

impl Role {
    pub fn as_label(&self) -> &'static str {
        match self {
            Role::Publisher => "publisher",
            Role::Consumer => "consumer",
        }
    }
}

/// What to declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySpec {
    pub exchange: String,
    pub confirms: bool,
    pub prefetch: u16,
}

impl From<&RabbitMqSettings> for TopologySpec {
    fn from(settings: &RabbitMqSettings) -> Self {
        Self {
            exchange: settings.exchange.clone(),
            confirms: settings.confirms,
            prefetch: settings.prefetch,
        }
    }
}

/// What was declared. `queue` is the broker-assigned name on the consumer side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declared {
    pub queue: Option<String>,
}

/// Declares the topology for `role`. Must complete before any publish or
/// subscribe on `channel`.
pub async fn declare_topology<C: TopologyChannel + ?Sized>(
    channel: &C,
    role: Role,
    spec: &TopologySpec,
) -> Result<Declared, BrokerError> {
    let exchange_entity = format!("exchange '{}'", spec.exchange);
    channel
        .declare_fanout_exchange(&spec.exchange, true)
        .await
        .map_err(|e| declare_error(&exchange_entity, e))?;
    debug!(exchange = %spec.exchange, "fanout exchange declared");

    match role {
        Role::Publisher => {
            if spec.confirms {
                channel
                    .enable_confirms()
                    .await
                    .map_err(|e| declare_error("confirm mode", e))?;
            }
            info!(exchange = %spec.exchange, confirms = spec.confirms, "publisher topology ready");
            Ok(Declared { queue: None })
        }
        Role::Consumer => {
            if spec.prefetch > 0 {
                channel
                    .set_prefetch(spec.prefetch)
                    .await
                    .map_err(|e| declare_error("prefetch", e))?;
            }

            let queue = channel
                .declare_exclusive_queue()
                .await
                .map_err(|e| declare_error("exclusive queue", e))?;

            channel
                .bind_queue(&queue, &spec.exchange, FANOUT_ROUTING_KEY)
                .await
                .map_err(|e| declare_error(&format!("binding '{queue}'"), e))?;

            info!(exchange = %spec.exchange, queue = %queue, "consumer topology ready");
            Ok(Declared { queue: Some(queue) })
        }
    }
}

/// PRECONDITION_FAILED means an entity with the same name exists with other
/// parameters. Anything else is a transport problem and can be retried.
fn declare_error(entity: &str, err: lapin::Error) -> BrokerError {
    if is_precondition_failed(&err) {
        BrokerError::TopologyConflict {
            entity: entity.to_string(),
            reason: err.to_string(),
        }
    } else {
        BrokerError::Connect(format!("declaring {entity}: {err}"))
    }
}

pub(crate) fn is_precondition_failed(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::ProtocolError(amqp) => matches!(
            amqp.kind(),
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
        ),
        _ => false,
    }
}
