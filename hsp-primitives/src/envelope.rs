//! The versioned HSP envelope and its JSON codec.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::{
    AcknowledgementPayload, CapabilityAdvertisement, FactPayload, PeerId, TaskRequestPayload,
    TaskResultPayload, new_message_id, timestamp,
};

/// Envelope format version written by this crate.
pub const ENVELOPE_VERSION: &str = "0.1";
/// Protocol version written by this crate.
pub const PROTOCOL_VERSION: &str = "0.1";
/// Recipient used for broadcast envelopes.
pub const BROADCAST_RECIPIENT: &str = "all";

const VERSION_SUFFIX: &str = "_v0.1";

/// Discriminant of the payload carried by an envelope.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageType {
    /// `HSP::Fact_v0.1`
    Fact,
    /// `HSP::CapabilityAdvertisement_v0.1`
    CapabilityAdvertisement,
    /// `HSP::TaskRequest_v0.1`
    TaskRequest,
    /// `HSP::TaskResult_v0.1`
    TaskResult,
    /// `HSP::Acknowledgement_v0.1`
    Acknowledgement,
}

impl MessageType {
    /// All message types in a stable order.
    pub const ALL: [Self; 5] = [
        Self::Fact,
        Self::CapabilityAdvertisement,
        Self::TaskRequest,
        Self::TaskResult,
        Self::Acknowledgement,
    ];

    /// Returns the wire representation, e.g. `HSP::Fact_v0.1`.
    #[must_use]
    pub const fn as_wire_str(self) -> &'static str {
        match self {
            Self::Fact => "HSP::Fact_v0.1",
            Self::CapabilityAdvertisement => "HSP::CapabilityAdvertisement_v0.1",
            Self::TaskRequest => "HSP::TaskRequest_v0.1",
            Self::TaskResult => "HSP::TaskResult_v0.1",
            Self::Acknowledgement => "HSP::Acknowledgement_v0.1",
        }
    }

    /// Returns the unversioned wire form, e.g. `HSP::Fact`.
    #[must_use]
    pub const fn as_bare_str(self) -> &'static str {
        match self {
            Self::Fact => "HSP::Fact",
            Self::CapabilityAdvertisement => "HSP::CapabilityAdvertisement",
            Self::TaskRequest => "HSP::TaskRequest",
            Self::TaskResult => "HSP::TaskResult",
            Self::Acknowledgement => "HSP::Acknowledgement",
        }
    }

    /// Returns `true` when `wire` carries a version suffix.
    #[must_use]
    pub fn is_versioned(wire: &str) -> bool {
        wire.ends_with(VERSION_SUFFIX)
    }

    /// Returns a short snake_case label, used for bus channels and log fields.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::CapabilityAdvertisement => "capability_advertisement",
            Self::TaskRequest => "task_request",
            Self::TaskResult => "task_result",
            Self::Acknowledgement => "acknowledgement",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    /// Accepts the versioned wire form and the bare `HSP::Fact` form.
    fn from_str(s: &str) -> Result<Self> {
        let base = s.strip_suffix(VERSION_SUFFIX).unwrap_or(s);
        match base {
            "HSP::Fact" => Ok(Self::Fact),
            "HSP::CapabilityAdvertisement" => Ok(Self::CapabilityAdvertisement),
            "HSP::TaskRequest" => Ok(Self::TaskRequest),
            "HSP::TaskResult" => Ok(Self::TaskResult),
            "HSP::Acknowledgement" => Ok(Self::Acknowledgement),
            _ => Err(Error::UnknownMessageType(s.to_owned())),
        }
    }
}

/// How the envelope participates in a conversation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum CommunicationPattern {
    #[default]
    Publish,
    Request,
    Response,
    StreamData,
    StreamAck,
    Acknowledgement,
    NegativeAcknowledgement,
    Broadcast,
    Multicast,
    Unicast,
    Notification,
    Event,
    Command,
    Query,
    Reply,
}

/// Delivery priority requested by the sender.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background traffic.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Latency sensitive traffic.
    High,
    /// Must be delivered ahead of everything else.
    Critical,
}

/// Quality of service requested for an envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QosParameters {
    /// Whether the receiver must answer with an acknowledgement.
    #[serde(default)]
    pub requires_ack: bool,
    /// Delivery priority.
    #[serde(default)]
    pub priority: Priority,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QosParameters {
    /// Creates QoS parameters.
    #[must_use]
    pub fn new(requires_ack: bool, priority: Priority) -> Self {
        Self {
            requires_ack,
            priority,
            extra: Map::new(),
        }
    }
}

/// Payload carried by an envelope, tagged by its message type.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// A knowledge fact.
    Fact(FactPayload),
    /// A capability advertisement.
    CapabilityAdvertisement(CapabilityAdvertisement),
    /// A task request.
    TaskRequest(TaskRequestPayload),
    /// A task result.
    TaskResult(TaskResultPayload),
    /// An acknowledgement.
    Acknowledgement(AcknowledgementPayload),
}

impl Payload {
    /// Returns the message type matching this payload.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Fact(_) => MessageType::Fact,
            Self::CapabilityAdvertisement(_) => MessageType::CapabilityAdvertisement,
            Self::TaskRequest(_) => MessageType::TaskRequest,
            Self::TaskResult(_) => MessageType::TaskResult,
            Self::Acknowledgement(_) => MessageType::Acknowledgement,
        }
    }

    /// Decodes a JSON payload of the given type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] when the document does not have the shape
    /// required by `message_type`.
    pub fn from_value(message_type: MessageType, value: Value) -> Result<Self> {
        let shape_error =
            |err: serde_json::Error| Error::codec(format!("{message_type} payload: {err}"));
        Ok(match message_type {
            MessageType::Fact => Self::Fact(serde_json::from_value(value).map_err(shape_error)?),
            MessageType::CapabilityAdvertisement => {
                Self::CapabilityAdvertisement(serde_json::from_value(value).map_err(shape_error)?)
            }
            MessageType::TaskRequest => {
                Self::TaskRequest(serde_json::from_value(value).map_err(shape_error)?)
            }
            MessageType::TaskResult => {
                Self::TaskResult(serde_json::from_value(value).map_err(shape_error)?)
            }
            MessageType::Acknowledgement => {
                Self::Acknowledgement(serde_json::from_value(value).map_err(shape_error)?)
            }
        })
    }

    /// Encodes the payload as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Fact(p) => serde_json::to_value(p),
            Self::CapabilityAdvertisement(p) => serde_json::to_value(p),
            Self::TaskRequest(p) => serde_json::to_value(p),
            Self::TaskResult(p) => serde_json::to_value(p),
            Self::Acknowledgement(p) => serde_json::to_value(p),
        };
        Ok(value?)
    }

    fn default_qos(&self) -> QosParameters {
        match self.message_type() {
            MessageType::Fact | MessageType::CapabilityAdvertisement => {
                QosParameters::new(false, Priority::Medium)
            }
            MessageType::TaskRequest => QosParameters::new(true, Priority::High),
            MessageType::TaskResult => QosParameters::new(false, Priority::High),
            MessageType::Acknowledgement => QosParameters::new(false, Priority::Low),
        }
    }

    fn default_pattern(&self) -> CommunicationPattern {
        match self.message_type() {
            MessageType::Fact | MessageType::CapabilityAdvertisement => {
                CommunicationPattern::Publish
            }
            MessageType::TaskRequest => CommunicationPattern::Request,
            MessageType::TaskResult => CommunicationPattern::Response,
            MessageType::Acknowledgement => CommunicationPattern::Acknowledgement,
        }
    }
}

impl From<FactPayload> for Payload {
    fn from(value: FactPayload) -> Self {
        Self::Fact(value)
    }
}

impl From<CapabilityAdvertisement> for Payload {
    fn from(value: CapabilityAdvertisement) -> Self {
        Self::CapabilityAdvertisement(value)
    }
}

impl From<TaskRequestPayload> for Payload {
    fn from(value: TaskRequestPayload) -> Self {
        Self::TaskRequest(value)
    }
}

impl From<TaskResultPayload> for Payload {
    fn from(value: TaskResultPayload) -> Self {
        Self::TaskResult(value)
    }
}

impl From<AcknowledgementPayload> for Payload {
    fn from(value: AcknowledgementPayload) -> Self {
        Self::Acknowledgement(value)
    }
}

/// Versioned wrapper carrying routing and QoS metadata around a payload.
///
/// The message type is derived from the payload variant, so an envelope can
/// never claim one type while carrying another.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageEnvelope {
    /// Envelope format version.
    pub envelope_version: String,
    /// Unique message identifier.
    pub message_id: String,
    /// Links a request to its acknowledgement or result.
    pub correlation_id: Option<String>,
    /// Sending peer.
    pub sender_ai_id: PeerId,
    /// Receiving peer, topic or [`BROADCAST_RECIPIENT`].
    pub recipient_ai_id: String,
    /// Send time.
    pub timestamp_sent: DateTime<Utc>,
    /// Whether `message_type` is written with its version suffix. Decoding
    /// keeps the form the sender used.
    pub versioned_type: bool,
    /// Protocol version.
    pub protocol_version: String,
    /// Communication pattern.
    pub communication_pattern: CommunicationPattern,
    /// Quality of service.
    pub qos_parameters: QosParameters,
    /// Schema describing the payload.
    pub payload_schema_uri: Option<String>,
    /// Transport specific routing hints.
    pub routing_info: Option<Map<String, Value>>,
    /// Signing or encryption metadata.
    pub security_parameters: Option<Map<String, Value>>,
    /// Typed payload.
    pub payload: Payload,
}

impl MessageEnvelope {
    /// Creates an envelope with the default pattern and QoS for the payload's type.
    #[must_use]
    pub fn new(sender: PeerId, recipient: impl Into<String>, payload: impl Into<Payload>) -> Self {
        let payload = payload.into();
        Self {
            envelope_version: ENVELOPE_VERSION.to_owned(),
            message_id: new_message_id(),
            correlation_id: None,
            sender_ai_id: sender,
            recipient_ai_id: recipient.into(),
            timestamp_sent: timestamp::now(),
            versioned_type: true,
            protocol_version: PROTOCOL_VERSION.to_owned(),
            communication_pattern: payload.default_pattern(),
            qos_parameters: payload.default_qos(),
            payload_schema_uri: None,
            routing_info: None,
            security_parameters: None,
            payload,
        }
    }

    /// Broadcast fact envelope.
    #[must_use]
    pub fn fact(sender: PeerId, payload: FactPayload) -> Self {
        Self::new(sender, BROADCAST_RECIPIENT, payload)
    }

    /// Broadcast capability advertisement envelope.
    #[must_use]
    pub fn capability_advertisement(sender: PeerId, payload: CapabilityAdvertisement) -> Self {
        Self::new(sender, BROADCAST_RECIPIENT, payload)
    }

    /// Task request envelope with a fresh correlation id.
    ///
    /// The recipient is the payload's `target_ai_id` when present, else
    /// `recipient`.
    #[must_use]
    pub fn task_request(
        sender: PeerId,
        recipient: impl Into<String>,
        payload: TaskRequestPayload,
    ) -> Self {
        let recipient = payload
            .target_ai_id
            .as_ref()
            .map_or_else(|| recipient.into(), |target| target.to_string());
        Self::new(sender, recipient, payload).with_correlation_id(new_message_id())
    }

    /// Task result envelope answering `correlation_id`.
    #[must_use]
    pub fn task_result(
        sender: PeerId,
        recipient: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: TaskResultPayload,
    ) -> Self {
        Self::new(sender, recipient, payload).with_correlation_id(correlation_id)
    }

    /// Acknowledgement for `original`, addressed to its sender.
    ///
    /// The acknowledgement carries the original correlation id (or message id)
    /// so the sender can resolve its pending entry.
    #[must_use]
    pub fn acknowledgement(sender: PeerId, original: &MessageEnvelope) -> Self {
        let payload = AcknowledgementPayload::received(original.message_id.clone());
        Self::new(sender, original.sender_ai_id.to_string(), payload)
            .with_correlation_id(original.ack_key())
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Replaces the QoS parameters.
    #[must_use]
    pub fn with_qos(mut self, qos: QosParameters) -> Self {
        self.qos_parameters = qos;
        self
    }

    /// Sets the payload schema URI.
    #[must_use]
    pub fn with_schema_uri(mut self, uri: impl Into<String>) -> Self {
        self.payload_schema_uri = Some(uri.into());
        self
    }

    /// Returns the payload's message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Returns `true` when the receiver must acknowledge this envelope.
    #[must_use]
    pub const fn requires_ack(&self) -> bool {
        self.qos_parameters.requires_ack
    }

    /// Key under which an acknowledgement for this envelope is awaited.
    #[must_use]
    pub fn ack_key(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or(&self.message_id)
    }

    /// Encodes the envelope as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Bytes> {
        let wire = WireEnvelope::try_from(self)?;
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    /// Decodes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] for malformed JSON, missing fields or a payload
    /// that does not match `message_type`, and [`Error::UnknownMessageType`]
    /// for unrecognised types.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;
        Self::try_from(wire)
    }

    /// Decodes an envelope from an already parsed JSON document.
    ///
    /// # Errors
    ///
    /// Same as [`MessageEnvelope::decode`].
    pub fn from_value(value: Value) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_value(value)?;
        Self::try_from(wire)
    }

    /// Encodes the envelope as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(WireEnvelope::try_from(self)?)?)
    }
}

fn default_version() -> String {
    ENVELOPE_VERSION.to_owned()
}

fn default_recipient() -> String {
    BROADCAST_RECIPIENT.to_owned()
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default = "default_version")]
    hsp_envelope_version: String,
    message_id: String,
    #[serde(default)]
    correlation_id: Option<String>,
    sender_ai_id: PeerId,
    #[serde(default = "default_recipient")]
    recipient_ai_id: String,
    #[serde(with = "timestamp::iso")]
    timestamp_sent: DateTime<Utc>,
    message_type: String,
    #[serde(default = "default_version")]
    protocol_version: String,
    #[serde(default)]
    communication_pattern: CommunicationPattern,
    #[serde(default)]
    qos_parameters: QosParameters,
    #[serde(default)]
    payload_schema_uri: Option<String>,
    #[serde(default)]
    routing_info: Option<Map<String, Value>>,
    #[serde(default)]
    security_parameters: Option<Map<String, Value>>,
    payload: Value,
}

impl TryFrom<&MessageEnvelope> for WireEnvelope {
    type Error = Error;

    fn try_from(envelope: &MessageEnvelope) -> Result<Self> {
        Ok(Self {
            hsp_envelope_version: envelope.envelope_version.clone(),
            message_id: envelope.message_id.clone(),
            correlation_id: envelope.correlation_id.clone(),
            sender_ai_id: envelope.sender_ai_id.clone(),
            recipient_ai_id: envelope.recipient_ai_id.clone(),
            timestamp_sent: envelope.timestamp_sent,
            message_type: if envelope.versioned_type {
                envelope.message_type().as_wire_str().to_owned()
            } else {
                envelope.message_type().as_bare_str().to_owned()
            },
            protocol_version: envelope.protocol_version.clone(),
            communication_pattern: envelope.communication_pattern,
            qos_parameters: envelope.qos_parameters.clone(),
            payload_schema_uri: envelope.payload_schema_uri.clone(),
            routing_info: envelope.routing_info.clone(),
            security_parameters: envelope.security_parameters.clone(),
            payload: envelope.payload.to_value()?,
        })
    }
}

impl TryFrom<WireEnvelope> for MessageEnvelope {
    type Error = Error;

    fn try_from(wire: WireEnvelope) -> Result<Self> {
        if wire.message_id.trim().is_empty() {
            return Err(Error::codec("message_id cannot be empty"));
        }
        let message_type: MessageType = wire.message_type.parse()?;
        let versioned_type = MessageType::is_versioned(&wire.message_type);
        let payload = Payload::from_value(message_type, wire.payload)?;

        Ok(Self {
            envelope_version: wire.hsp_envelope_version,
            message_id: wire.message_id,
            correlation_id: wire.correlation_id,
            sender_ai_id: wire.sender_ai_id,
            recipient_ai_id: wire.recipient_ai_id,
            timestamp_sent: wire.timestamp_sent,
            versioned_type,
            protocol_version: wire.protocol_version,
            communication_pattern: wire.communication_pattern,
            qos_parameters: wire.qos_parameters,
            payload_schema_uri: wire.payload_schema_uri,
            routing_info: wire.routing_info,
            security_parameters: wire.security_parameters,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{CapabilityId, ErrorDetails};

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).unwrap()
    }

    fn sample_envelopes() -> Vec<MessageEnvelope> {
        let a = peer("did:hsp:a");
        let b = peer("did:hsp:b");
        let advert = CapabilityAdvertisement::builder(CapabilityId::new("a.translate").unwrap(), a.clone())
            .name("Translate")
            .and_then(|builder| builder.version("1.0"))
            .and_then(|builder| builder.tag("nlp").build())
            .unwrap();
        let request = TaskRequestPayload::new(a.clone(), Map::new());
        let original = MessageEnvelope::task_request(a.clone(), b.as_str(), request.clone());

        vec![
            MessageEnvelope::fact(a.clone(), FactPayload::natural_language(a.clone(), "sky is blue", 0.9)),
            MessageEnvelope::capability_advertisement(a.clone(), advert),
            original.clone(),
            MessageEnvelope::task_result(
                b.clone(),
                a.as_str(),
                original.ack_key(),
                TaskResultPayload::failure(request.request_id, b.clone(), ErrorDetails::new("E", "boom")),
            ),
            MessageEnvelope::acknowledgement(b, &original),
        ]
    }

    #[test]
    fn every_message_type_survives_reencoding() {
        for envelope in sample_envelopes() {
            let bytes = envelope.encode().unwrap();
            let decoded = MessageEnvelope::decode(&bytes).unwrap();
            assert_eq!(decoded, envelope);

            let first: Value = serde_json::from_slice(&bytes).unwrap();
            let second: Value = serde_json::from_slice(&decoded.encode().unwrap()).unwrap();
            assert_eq!(first, second, "{}", envelope.message_type());
        }
    }

    #[test]
    fn builders_apply_qos_defaults() {
        let envelopes = sample_envelopes();
        let qos: Vec<_> = envelopes
            .iter()
            .map(|e| (e.message_type(), e.requires_ack(), e.qos_parameters.priority))
            .collect();

        assert_eq!(
            qos,
            vec![
                (MessageType::Fact, false, Priority::Medium),
                (MessageType::CapabilityAdvertisement, false, Priority::Medium),
                (MessageType::TaskRequest, true, Priority::High),
                (MessageType::TaskResult, false, Priority::High),
                (MessageType::Acknowledgement, false, Priority::Low),
            ]
        );
    }

    #[test]
    fn acknowledgement_targets_original() {
        let envelopes = sample_envelopes();
        let request = &envelopes[2];
        let ack = &envelopes[4];

        assert_eq!(ack.recipient_ai_id, "did:hsp:a");
        assert_eq!(ack.ack_key(), request.ack_key());
        let Payload::Acknowledgement(payload) = &ack.payload else {
            panic!("expected acknowledgement");
        };
        assert_eq!(payload.target_message_id, request.message_id);
    }

    #[test]
    fn optional_fields_are_written_as_null() {
        let a = peer("did:hsp:a");
        let envelope = MessageEnvelope::fact(a.clone(), FactPayload::natural_language(a, "x", 1.0));
        let value = envelope.to_value().unwrap();

        assert!(value.get("correlation_id").is_some_and(Value::is_null));
        assert!(value.get("routing_info").is_some_and(Value::is_null));
        assert_eq!(value["message_type"], "HSP::Fact_v0.1");
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let raw = json!({
            "message_id": "m1",
            "sender_ai_id": "did:hsp:a",
            "timestamp_sent": "2024-01-01T00:00:00Z",
            "message_type": "HSP::Opinion_v0.1",
            "payload": {}
        });
        let err = MessageEnvelope::from_value(raw).unwrap_err();
        assert!(matches!(err, Error::UnknownMessageType(t) if t == "HSP::Opinion_v0.1"));
    }

    #[test]
    fn payload_shape_must_match_type() {
        let raw = json!({
            "message_id": "m1",
            "sender_ai_id": "did:hsp:a",
            "timestamp_sent": "2024-01-01T00:00:00+00:00",
            "message_type": "HSP::TaskResult_v0.1",
            "payload": {"id": "fact_1", "statement_type": "natural_language"}
        });
        let err = MessageEnvelope::from_value(raw).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[test]
    fn foreign_envelope_reencodes_unchanged() {
        let raw = json!({
            "hsp_envelope_version": "0.1",
            "message_id": "0b6f2c3e-5d1a-4a8e-9a63-2f5d8c1e7b40",
            "correlation_id": null,
            "sender_ai_id": "did:hsp:a",
            "recipient_ai_id": "all",
            "timestamp_sent": "2024-01-01T00:00:00.123456+00:00",
            "message_type": "HSP::Fact",
            "protocol_version": "0.1",
            "communication_pattern": "publish",
            "security_parameters": null,
            "qos_parameters": {"requires_ack": false, "priority": "medium"},
            "routing_info": null,
            "payload_schema_uri": "hsp:schema:payload/Fact/0.1",
            "payload": {
                "id": "fact_1",
                "statement_type": "natural_language",
                "statement_nl": "sky is blue",
                "source_ai_id": "did:hsp:a",
                "timestamp_created": "2024-01-01T00:00:00+00:00",
                "confidence_score": 0.9
            }
        });
        let bytes = serde_json::to_vec(&raw).unwrap();

        let decoded = MessageEnvelope::decode(&bytes).unwrap();
        assert!(!decoded.versioned_type);
        let again: Value = serde_json::from_slice(&decoded.encode().unwrap()).unwrap();
        assert_eq!(again, raw);
    }

    #[test]
    fn zulu_timestamps_are_written_with_offset() {
        let raw = json!({
            "message_id": "m1",
            "sender_ai_id": "did:hsp:a",
            "timestamp_sent": "2024-01-01T00:00:00.5Z",
            "message_type": "HSP::Acknowledgement_v0.1",
            "payload": {
                "status": "received",
                "ack_timestamp": "2024-01-01T00:00:01Z",
                "target_message_id": "m0"
            }
        });
        let value = MessageEnvelope::from_value(raw).unwrap().to_value().unwrap();
        assert_eq!(value["timestamp_sent"], "2024-01-01T00:00:00.500000+00:00");
        assert_eq!(value["payload"]["ack_timestamp"], "2024-01-01T00:00:01+00:00");
        assert_eq!(value["message_type"], "HSP::Acknowledgement_v0.1");
    }

    #[test]
    fn unversioned_type_names_are_accepted() {
        assert_eq!("HSP::Fact".parse::<MessageType>().unwrap(), MessageType::Fact);
        for ty in MessageType::ALL {
            assert_eq!(ty.as_wire_str().parse::<MessageType>().unwrap(), ty);
        }
    }
}
