//! Peer and message identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

const MAX_PEER_ID_LEN: usize = 256;

/// Identifier of an AI peer participating in the HSP network.
///
/// Peer ids are opaque strings (for example `did:hsp:agent_alpha`). They must be
/// non-empty, free of whitespace, and must not contain MQTT wildcard characters
/// because they are interpolated into topic names.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Creates a new peer identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPeerId`] if the identifier is empty, too long, or
    /// contains whitespace or topic wildcard characters.
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        validate_peer_id(&id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_peer_id(id: &str) -> Result<(), Error> {
    let reject = |reason: &str| Error::InvalidPeerId {
        id: id.to_owned(),
        reason: reason.to_owned(),
    };

    if id.is_empty() {
        return Err(reject("identifier cannot be empty"));
    }
    if id.len() > MAX_PEER_ID_LEN {
        return Err(reject("identifier is too long"));
    }
    if id.chars().any(|c| c.is_whitespace() || matches!(c, '+' | '#')) {
        return Err(reject(
            "identifier cannot contain whitespace or topic wildcards",
        ));
    }
    Ok(())
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PeerId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PeerId> for String {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generates a fresh message or correlation identifier (UUID v4, hyphenated).
#[must_use]
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_did_style_ids() {
        let id = PeerId::new("did:hsp:agent_alpha").expect("valid id");
        assert_eq!(id.as_str(), "did:hsp:agent_alpha");
        assert_eq!(id.to_string().parse::<PeerId>().unwrap(), id);
    }

    #[test]
    fn rejects_wildcards_and_whitespace() {
        assert!(PeerId::new("").is_err());
        assert!(PeerId::new("agent one").is_err());
        assert!(PeerId::new("agent/#").is_err());
        assert!(PeerId::new("agent+").is_err());
    }

    #[test]
    fn decoding_validates() {
        let err = serde_json::from_str::<PeerId>("\"\"").expect_err("empty id");
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }
}
