//! Wire timestamps.
//!
//! Peers write UTC timestamps as ISO-8601 with an explicit `+00:00` offset and
//! microsecond precision, omitting the fraction when it is zero. Decoding
//! accepts any RFC 3339 offset, including `Z`.

use chrono::{DateTime, SubsecRound, Utc};

/// Current time truncated to the precision written on the wire.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Formats `ts` the way it is written on the wire.
#[must_use]
pub fn format(ts: &DateTime<Utc>) -> String {
    let pattern = match ts.timestamp_subsec_nanos() {
        0 => "%Y-%m-%dT%H:%M:%S+00:00",
        nanos if nanos % 1_000 == 0 => "%Y-%m-%dT%H:%M:%S%.6f+00:00",
        _ => "%Y-%m-%dT%H:%M:%S%.9f+00:00",
    };
    ts.format(pattern).to_string()
}

/// Parses an RFC 3339 timestamp and converts it to UTC.
///
/// # Errors
///
/// Returns the chrono parse error for malformed input.
pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

/// Serde adapter for `DateTime<Utc>` fields.
pub mod iso {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    /// Serializes with [`super::format`].
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format(ts))
    }

    /// Deserializes with [`super::parse`].
    ///
    /// # Errors
    ///
    /// Fails on non-string or malformed values.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse(&raw).map_err(de::Error::custom)
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` fields.
pub mod iso_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    /// Serializes with [`super::format`], `None` as null.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_some(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes with [`super::parse`], null as `None`.
    ///
    /// # Errors
    ///
    /// Fails on malformed values.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| super::parse(&raw).map_err(de::Error::custom))
            .transpose()
    }
}
