//! Topic naming conventions and MQTT-style filter matching.

use crate::PeerId;

/// Prefix of every knowledge fact topic.
pub const FACTS_PREFIX: &str = "hsp/knowledge/facts";
/// Prefix of every capability advertisement topic.
pub const ADVERTISEMENTS_PREFIX: &str = "hsp/capabilities/advertisements";
/// Prefix of task request topics.
pub const REQUESTS_PREFIX: &str = "hsp/requests";
/// Prefix of task result topics.
pub const RESULTS_PREFIX: &str = "hsp/results";
/// Prefix of acknowledgement topics.
pub const ACKS_PREFIX: &str = "hsp/acks";

/// `hsp/knowledge/facts/#`
#[must_use]
pub fn facts_wildcard() -> String {
    format!("{FACTS_PREFIX}/#")
}

/// Default topic a peer publishes its facts on.
#[must_use]
pub fn facts(source: &PeerId) -> String {
    format!("{FACTS_PREFIX}/{source}")
}

/// `hsp/capabilities/advertisements/{ai}`
#[must_use]
pub fn capability_advertisements(ai: &PeerId) -> String {
    format!("{ADVERTISEMENTS_PREFIX}/{ai}")
}

/// `hsp/capabilities/advertisements/#`
#[must_use]
pub fn capability_advertisements_wildcard() -> String {
    format!("{ADVERTISEMENTS_PREFIX}/#")
}

/// `hsp/requests/{target}`
#[must_use]
pub fn requests(target: &PeerId) -> String {
    format!("{REQUESTS_PREFIX}/{target}")
}

/// `hsp/results/{requester}`
#[must_use]
pub fn results(requester: &PeerId) -> String {
    format!("{RESULTS_PREFIX}/{requester}")
}

/// `hsp/acks/{recipient}`
#[must_use]
pub fn acks(recipient: &PeerId) -> String {
    format!("{ACKS_PREFIX}/{recipient}")
}

/// Resolves a peer id or explicit topic to a task request topic.
///
/// A value containing `/` is already a topic and is returned unchanged.
#[must_use]
pub fn resolve_request_topic(target_or_topic: &str) -> String {
    resolve(REQUESTS_PREFIX, target_or_topic)
}

/// Resolves a peer id or explicit topic to a task result topic.
#[must_use]
pub fn resolve_result_topic(requester_or_topic: &str) -> String {
    resolve(RESULTS_PREFIX, requester_or_topic)
}

/// Resolves a peer id or explicit topic to an acknowledgement topic.
#[must_use]
pub fn resolve_ack_topic(recipient_or_topic: &str) -> String {
    resolve(ACKS_PREFIX, recipient_or_topic)
}

fn resolve(prefix: &str, value: &str) -> String {
    if value.contains('/') {
        value.to_owned()
    } else {
        format!("{prefix}/{value}")
    }
}

/// Returns `true` when `topic` matches the subscription `filter`.
///
/// `+` matches exactly one level, `#` matches the remaining levels including
/// none, so `a/#` matches `a`.
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
