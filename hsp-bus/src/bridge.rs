//! Bidirectional adapter between a [`Transport`] and the [`InternalBus`].
//!
//! Inbound bytes are aligned and published on a per-type channel
//! (`hsp.external.<type>`). Messages published on [`OUTBOUND_CHANNEL`] are
//! encoded and handed to the transport.

use std::fmt;
use std::sync::{Arc, Weak};

use hsp_primitives::{MessageEnvelope, MessageType};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::{
    AlignmentStats, BusResult, DataAligner, InternalBus, MessageHandler, SubscriptionId,
    Transport,
};

/// Channel carrying envelopes that should leave the process.
pub const OUTBOUND_CHANNEL: &str = "hsp.internal.message";

/// Returns the bus channel inbound envelopes of `message_type` are published on.
#[must_use]
pub fn inbound_channel(message_type: MessageType) -> String {
    format!("hsp.external.{}", message_type.label())
}

/// Envelope queued for external delivery.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Envelope to encode.
    pub envelope: Arc<MessageEnvelope>,
    /// Transport QoS level.
    pub qos: u8,
}

/// Message travelling over the internal bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// Envelope received from outside the process.
    Inbound {
        /// Topic it arrived on.
        topic: String,
        /// Decoded envelope.
        envelope: Arc<MessageEnvelope>,
    },
    /// Envelope that should be delivered externally.
    Outbound(OutboundMessage),
}

/// Wires a transport to an internal bus in both directions.
pub struct MessageBridge {
    transport: Arc<dyn Transport>,
    bus: Arc<InternalBus<BusMessage>>,
    aligner: DataAligner,
    outbound: SubscriptionId,
}

impl fmt::Debug for MessageBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBridge")
            .field("transport", &"dyn Transport")
            .field("bus", &self.bus)
            .field("aligner", &self.aligner.stats())
            .finish_non_exhaustive()
    }
}

impl MessageBridge {
    /// Creates a bridge and subscribes it to [`OUTBOUND_CHANNEL`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, bus: Arc<InternalBus<BusMessage>>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let bridge = weak.clone();
            let outbound = bus.subscribe(OUTBOUND_CHANNEL, move |message: &BusMessage| {
                let BusMessage::Outbound(outbound) = message else {
                    return;
                };
                let Some(bridge) = bridge.upgrade() else {
                    return;
                };
                bridge.forward_outbound(outbound.clone());
            });
            Self {
                transport,
                bus,
                aligner: DataAligner::new(),
                outbound,
            }
        })
    }

    /// Returns the internal bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<InternalBus<BusMessage>> {
        &self.bus
    }

    /// Returns the aligner's counters.
    #[must_use]
    pub fn aligner_stats(&self) -> AlignmentStats {
        self.aligner.stats()
    }

    /// Aligns raw bytes received on `topic` and publishes the envelope.
    ///
    /// Malformed input is logged and dropped. Returns the number of bus
    /// subscribers that saw the envelope.
    pub fn handle_inbound(&self, topic: &str, bytes: &[u8]) -> usize {
        match self.aligner.align(bytes) {
            Ok(envelope) => self.dispatch_envelope(topic, Arc::new(envelope)),
            Err(err) => {
                warn!(topic, %err, "dropping malformed inbound message");
                0
            }
        }
    }

    /// Publishes an already decoded envelope on its inbound channel.
    pub fn dispatch_envelope(&self, topic: &str, envelope: Arc<MessageEnvelope>) -> usize {
        let channel = inbound_channel(envelope.message_type());
        let message = BusMessage::Inbound {
            topic: topic.to_owned(),
            envelope,
        };
        let delivered = self.bus.publish(&channel, &message);
        if delivered == 0 {
            debug!(topic, channel, "inbound envelope had no subscribers");
        }
        delivered
    }

    /// Returns a transport subscription handler feeding this bridge.
    #[must_use]
    pub fn inbound_handler(self: &Arc<Self>) -> MessageHandler {
        let bridge = Arc::downgrade(self);
        Arc::new(move |topic: String, payload| {
            if let Some(bridge) = bridge.upgrade() {
                bridge.handle_inbound(&topic, &payload);
            }
        })
    }

    /// Encodes `envelope` and publishes it through the transport.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Codec`](crate::BusError::Codec) if encoding fails and
    /// [`BusError::Transport`](crate::BusError::Transport) if the transport rejects
    /// the message.
    pub async fn publish_external(
        &self,
        topic: &str,
        envelope: &MessageEnvelope,
        qos: u8,
    ) -> BusResult<()> {
        let bytes = envelope.encode()?;
        self.transport.publish(topic, bytes, qos).await?;
        debug!(
            topic,
            message_id = %envelope.message_id,
            message_type = %envelope.message_type(),
            "envelope published"
        );
        Ok(())
    }

    fn forward_outbound(self: Arc<Self>, outbound: OutboundMessage) {
        let Ok(runtime) = Handle::try_current() else {
            error!(topic = %outbound.topic, "outbound message dropped: no async runtime");
            return;
        };
        runtime.spawn(async move {
            if let Err(err) = self
                .publish_external(&outbound.topic, &outbound.envelope, outbound.qos)
                .await
            {
                warn!(topic = %outbound.topic, %err, "outbound bus message not delivered");
            }
        });
    }
}

impl Drop for MessageBridge {
    fn drop(&mut self) {
        self.bus.unsubscribe(OUTBOUND_CHANNEL, self.outbound);
    }
}
