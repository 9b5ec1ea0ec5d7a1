//! Typed payloads carried inside HSP envelopes.
//!
//! Every payload keeps fields it does not model in an `extra` map so that an
//! envelope produced by a newer peer re-encodes without losing data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CapabilityId, PeerId, new_message_id, timestamp};

/// Shape of the statement carried by a fact.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    /// Plain natural language statement in `statement_nl`.
    NaturalLanguage,
    /// Subject/predicate/object triple in `statement_structured`.
    SemanticTriple,
    /// JSON-LD document in `statement_structured`.
    JsonLd,
}

/// Payload of an `HSP::Fact_v0.1` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactPayload {
    /// Fact identifier.
    pub id: String,
    /// Statement representation.
    pub statement_type: StatementType,
    /// Natural language statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_nl: Option<String>,
    /// Structured statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_structured: Option<Value>,
    /// Peer that originated the fact.
    pub source_ai_id: PeerId,
    /// When the fact was created.
    #[serde(with = "timestamp::iso")]
    pub timestamp_created: DateTime<Utc>,
    /// Confidence in `[0, 1]` reported by the source.
    pub confidence_score: f64,
    /// Optional weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Validity window start.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::iso_option")]
    pub valid_from: Option<DateTime<Utc>>,
    /// Validity window end.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::iso_option")]
    pub valid_to: Option<DateTime<Utc>>,
    /// Free-form context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FactPayload {
    /// Creates a natural language fact stamped with the current time.
    #[must_use]
    pub fn natural_language(
        source_ai_id: PeerId,
        statement: impl Into<String>,
        confidence_score: f64,
    ) -> Self {
        Self {
            id: format!("fact_{}", new_message_id()),
            statement_type: StatementType::NaturalLanguage,
            statement_nl: Some(statement.into()),
            statement_structured: None,
            source_ai_id,
            timestamp_created: timestamp::now(),
            confidence_score,
            weight: None,
            valid_from: None,
            valid_to: None,
            context: None,
            tags: None,
            extra: Map::new(),
        }
    }
}

/// Payload of an `HSP::TaskRequest_v0.1` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequestPayload {
    /// Request identifier.
    pub request_id: String,
    /// Peer asking for the work.
    pub requester_ai_id: PeerId,
    /// Peer expected to perform the work, when addressed directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ai_id: Option<PeerId>,
    /// Restricts execution to a specific capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id_filter: Option<CapabilityId>,
    /// Restricts execution to capabilities with this name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_name_filter: Option<String>,
    /// Task parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Desired output format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_output_data_format: Option<String>,
    /// Application-defined priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Deadline after which the result is no longer useful.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::iso_option")]
    pub deadline_timestamp: Option<DateTime<Utc>>,
    /// Topic or peer id where the result should be delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_address: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskRequestPayload {
    /// Creates a request with a fresh `request_id`.
    #[must_use]
    pub fn new(requester_ai_id: PeerId, parameters: Map<String, Value>) -> Self {
        Self {
            request_id: new_message_id(),
            requester_ai_id,
            target_ai_id: None,
            capability_id_filter: None,
            capability_name_filter: None,
            parameters,
            requested_output_data_format: None,
            priority: None,
            deadline_timestamp: None,
            callback_address: None,
            extra: Map::new(),
        }
    }

    /// Restricts the request to a capability.
    #[must_use]
    pub fn with_capability(mut self, capability_id: CapabilityId) -> Self {
        self.capability_id_filter = Some(capability_id);
        self
    }

    /// Sets the address results should be published to.
    #[must_use]
    pub fn with_callback_address(mut self, address: impl Into<String>) -> Self {
        self.callback_address = Some(address.into());
        self
    }
}

/// Outcome reported for a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task completed.
    Success,
    /// Task failed; see `error_details`.
    Failure,
    /// Task is running.
    InProgress,
    /// Task is waiting to run.
    Queued,
    /// Executor refused the task.
    Rejected,
}

/// Machine readable error attached to results and acknowledgements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Stable error code.
    pub error_code: String,
    /// Human readable message.
    pub error_message: String,
    /// Additional context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_context: Option<Value>,
}

impl ErrorDetails {
    /// Creates error details without context.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: code.into(),
            error_message: message.into(),
            error_context: None,
        }
    }
}

/// Payload of an `HSP::TaskResult_v0.1` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResultPayload {
    /// Result identifier.
    pub result_id: String,
    /// Request this result answers.
    pub request_id: String,
    /// Peer that executed the task.
    pub executing_ai_id: PeerId,
    /// Outcome.
    pub status: TaskStatus,
    /// Result document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Format of `payload`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data_format: Option<String>,
    /// Failure information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp::iso_option")]
    pub timestamp_completed: Option<DateTime<Utc>>,
    /// Executor specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_metadata: Option<Value>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskResultPayload {
    /// Creates a successful result for `request_id`.
    #[must_use]
    pub fn success(request_id: impl Into<String>, executing_ai_id: PeerId, payload: Value) -> Self {
        Self::completed(request_id, executing_ai_id, TaskStatus::Success, Some(payload), None)
    }

    /// Creates a failed result for `request_id`.
    #[must_use]
    pub fn failure(
        request_id: impl Into<String>,
        executing_ai_id: PeerId,
        error: ErrorDetails,
    ) -> Self {
        Self::completed(request_id, executing_ai_id, TaskStatus::Failure, None, Some(error))
    }

    fn completed(
        request_id: impl Into<String>,
        executing_ai_id: PeerId,
        status: TaskStatus,
        payload: Option<Value>,
        error_details: Option<ErrorDetails>,
    ) -> Self {
        Self {
            result_id: new_message_id(),
            request_id: request_id.into(),
            executing_ai_id,
            status,
            payload,
            output_data_format: None,
            error_details,
            timestamp_completed: Some(timestamp::now()),
            execution_metadata: None,
            extra: Map::new(),
        }
    }
}

/// Acknowledgement status.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// Message arrived.
    Received,
    /// Message arrived and was processed.
    Processed,
    /// Message arrived but could not be handled.
    Error,
}

/// Payload of an `HSP::Acknowledgement_v0.1` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgementPayload {
    /// Acknowledgement status.
    pub status: AckStatus,
    /// When the acknowledgement was produced.
    #[serde(with = "timestamp::iso")]
    pub ack_timestamp: DateTime<Utc>,
    /// `message_id` of the acknowledged envelope.
    pub target_message_id: String,
    /// Failure information for [`AckStatus::Error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AcknowledgementPayload {
    /// Acknowledges receipt of `target_message_id`.
    #[must_use]
    pub fn received(target_message_id: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Received,
            ack_timestamp: timestamp::now(),
            target_message_id: target_message_id.into(),
            error_details: None,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fact_decodes_minimal_document() {
        let fact: FactPayload = serde_json::from_value(json!({
            "id": "fact_1",
            "statement_type": "semantic_triple",
            "statement_structured": {"subject": "sky", "predicate": "is", "object": "blue"},
            "source_ai_id": "did:hsp:a",
            "timestamp_created": "2024-05-01T12:00:00Z",
            "confidence_score": 0.9
        }))
        .unwrap();

        assert_eq!(fact.statement_type, StatementType::SemanticTriple);
        assert!(fact.statement_nl.is_none());
        assert!(fact.extra.is_empty());
    }

    #[test]
    fn task_request_requires_requester() {
        let err = serde_json::from_value::<TaskRequestPayload>(json!({
            "request_id": "r1",
            "parameters": {}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("requester_ai_id"));
    }

    #[test]
    fn failed_result_carries_error_details() {
        let peer = PeerId::new("did:hsp:worker").unwrap();
        let result =
            TaskResultPayload::failure("r1", peer, ErrorDetails::new("TIMEOUT", "took too long"));
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["status"], "failure");
        assert_eq!(value["error_details"]["error_code"], "TIMEOUT");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn ack_serializes_status_in_snake_case() {
        let ack = AcknowledgementPayload::received("m-1");
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["status"], "received");
        assert_eq!(value["target_message_id"], "m-1");
    }
}
