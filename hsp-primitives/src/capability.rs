//! Capability advertisements exchanged between HSP peers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::PeerId;
use crate::error::{Error, Result};

const MAX_ID_LEN: usize = 128;
const MAX_NAME_LEN: usize = 96;

/// Identifier for a capability advertised by a peer.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityId(String);

impl CapabilityId {
    /// Creates a new capability identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapabilityId`] if the supplied identifier is empty,
    /// too long, or contains whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_identifier(&id)?;
        Ok(Self(id))
    }

    /// Returns the capability identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CapabilityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CapabilityId> for String {
    fn from(value: CapabilityId) -> Self {
        value.0
    }
}

fn validate_identifier(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::InvalidCapabilityId {
            id: id.into(),
            reason: "identifier cannot be empty".into(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(Error::InvalidCapabilityId {
            id: id.into(),
            reason: format!("identifier length must be <= {MAX_ID_LEN}"),
        });
    }

    if id.chars().any(char::is_whitespace) {
        return Err(Error::InvalidCapabilityId {
            id: id.into(),
            reason: "identifier cannot contain whitespace".into(),
        });
    }

    Ok(())
}

/// Availability reported by the advertiser of a capability.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    /// Capability accepts work.
    Online,
    /// Capability is not reachable.
    Offline,
    /// Capability accepts work with reduced quality or throughput.
    Degraded,
    /// Capability is reachable but currently saturated.
    Busy,
}

impl AvailabilityStatus {
    /// Returns `true` when the capability should be offered to requesters.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Online | Self::Degraded)
    }
}

/// Payload of an `HSP::CapabilityAdvertisement_v0.1` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAdvertisement {
    /// Unique capability identifier.
    pub capability_id: CapabilityId,
    /// Peer that claims to offer the capability.
    pub ai_id: PeerId,
    /// Optional display name of the advertising agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Human readable capability name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Capability version string.
    pub version: String,
    /// Current availability.
    pub availability_status: AvailabilityStatus,
    /// Tags used for discovery filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Schema URI describing the accepted input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema_uri: Option<String>,
    /// Example input document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema_example: Option<Value>,
    /// Schema URI describing the produced output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema_uri: Option<String>,
    /// Example output document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema_example: Option<Value>,
    /// Preferred data formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_format_preferences: Option<Vec<String>>,
    /// Cost estimate template supplied by the advertiser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate_template: Option<Value>,
    /// Access policy governing invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_policy_id: Option<String>,
    /// Fields not modelled above, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CapabilityAdvertisement {
    /// Starts building a capability advertisement.
    #[must_use]
    pub fn builder(capability_id: CapabilityId, ai_id: PeerId) -> CapabilityAdvertisementBuilder {
        CapabilityAdvertisementBuilder {
            capability_id,
            ai_id,
            agent_name: None,
            name: None,
            description: String::new(),
            version: None,
            availability_status: AvailabilityStatus::Online,
            tags: Vec::new(),
        }
    }

    /// Returns the advertised tags, empty when none were supplied.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }

    /// Returns `true` when every tag in `required` is advertised.
    #[must_use]
    pub fn has_all_tags(&self, required: &[String]) -> bool {
        let tags = self.tags();
        required.iter().all(|tag| tags.contains(tag))
    }
}

/// Builder for [`CapabilityAdvertisement`].
#[derive(Debug)]
pub struct CapabilityAdvertisementBuilder {
    capability_id: CapabilityId,
    ai_id: PeerId,
    agent_name: Option<String>,
    name: Option<String>,
    description: String,
    version: Option<String>,
    availability_status: AvailabilityStatus,
    tags: Vec<String>,
}

impl CapabilityAdvertisementBuilder {
    /// Sets the display name for the capability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the name is empty or exceeds the maximum
    /// supported length.
    pub fn name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::codec("capability name cannot be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::codec(format!(
                "capability name length must be <= {MAX_NAME_LEN}"
            )));
        }
        self.name = Some(name);
        Ok(self)
    }

    /// Sets the version string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the version string is empty.
    pub fn version(mut self, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(Error::codec("capability version cannot be empty"));
        }
        self.version = Some(version);
        Ok(self)
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the advertising agent's display name.
    #[must_use]
    pub fn agent_name(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    /// Sets the availability status (defaults to online).
    #[must_use]
    pub fn availability(mut self, status: AvailabilityStatus) -> Self {
        self.availability_status = status;
        self
    }

    /// Adds a discovery tag. Duplicate tags are ignored.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Finalises the advertisement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the name or version were not provided.
    pub fn build(self) -> Result<CapabilityAdvertisement> {
        let name = self
            .name
            .ok_or_else(|| Error::codec("capability name must be provided"))?;
        let version = self
            .version
            .ok_or_else(|| Error::codec("capability version must be provided"))?;

        Ok(CapabilityAdvertisement {
            capability_id: self.capability_id,
            ai_id: self.ai_id,
            agent_name: self.agent_name,
            name,
            description: self.description,
            version,
            availability_status: self.availability_status,
            tags: (!self.tags.is_empty()).then_some(self.tags),
            input_schema_uri: None,
            input_schema_example: None,
            output_schema_uri: None,
            output_schema_example: None,
            data_format_preferences: None,
            cost_estimate_template: None,
            access_policy_id: None,
            extra: Map::new(),
        })
    }
}
