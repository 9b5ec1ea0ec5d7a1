//! Per-peer trust scores.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use hsp_primitives::PeerId;
use tracing::debug;

/// Score assumed for peers that were never scored.
pub const DEFAULT_TRUST_SCORE: f64 = 0.5;

/// Store of trust scores in `[0, 1]`.
#[derive(Debug)]
pub struct TrustManager {
    default_score: f64,
    scores: RwLock<HashMap<PeerId, f64>>,
}

impl Default for TrustManager {
    fn default() -> Self {
        Self::new(DEFAULT_TRUST_SCORE)
    }
}

impl TrustManager {
    /// Creates a manager; `default_score` is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(default_score: f64) -> Self {
        let default_score = if default_score.is_finite() {
            default_score.clamp(0.0, 1.0)
        } else {
            DEFAULT_TRUST_SCORE
        };
        Self {
            default_score,
            scores: RwLock::new(HashMap::new()),
        }
    }

    /// Score given to unseen peers.
    #[must_use]
    pub const fn default_score(&self) -> f64 {
        self.default_score
    }

    /// Returns the peer's score, or the default when unseen.
    #[must_use]
    pub fn get_score(&self, peer: &PeerId) -> f64 {
        self.scores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .copied()
            .unwrap_or(self.default_score)
    }

    /// Adjusts a score and returns the new value.
    ///
    /// `absolute` takes precedence over `delta`. With neither (or only
    /// non-finite values) the current score is returned unchanged.
    pub fn update_score(&self, peer: &PeerId, delta: Option<f64>, absolute: Option<f64>) -> f64 {
        let absolute = absolute.filter(|value| value.is_finite());
        let delta = delta.filter(|value| value.is_finite());

        let mut scores = self.scores.write().unwrap_or_else(PoisonError::into_inner);
        let current = scores.get(peer).copied().unwrap_or(self.default_score);
        let next = match (absolute, delta) {
            (Some(value), _) => value,
            (None, Some(delta)) => current + delta,
            (None, None) => return current,
        }
        .clamp(0.0, 1.0);

        scores.insert(peer.clone(), next);
        debug!(%peer, previous = current, score = next, "trust score updated");
        next
    }

    /// Snapshot of every explicitly scored peer.
    #[must_use]
    pub fn scores(&self) -> HashMap<PeerId, f64> {
        self.scores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).unwrap()
    }

    #[test]
    fn unseen_peers_get_default() {
        let trust = TrustManager::default();
        assert!((trust.get_score(&peer("did:hsp:x")) - 0.5).abs() < f64::EPSILON);
        assert!(trust.scores().is_empty());
    }

    #[test]
    fn absolute_wins_and_values_are_clamped() {
        let trust = TrustManager::default();
        let p = peer("did:hsp:x");

        assert!((trust.update_score(&p, Some(0.1), Some(0.9)) - 0.9).abs() < 1e-9);
        assert!((trust.update_score(&p, Some(0.5), None) - 1.0).abs() < 1e-9);
        assert!((trust.update_score(&p, None, Some(-3.0)) - 0.0).abs() < 1e-9);
        assert!((trust.update_score(&p, Some(0.25), None) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn no_arguments_is_a_no_op() {
        let trust = TrustManager::new(0.7);
        let p = peer("did:hsp:x");
        assert!((trust.update_score(&p, None, None) - 0.7).abs() < 1e-9);
        assert!((trust.update_score(&p, Some(f64::NAN), None) - 0.7).abs() < 1e-9);
        assert!(trust.scores().is_empty());
    }

    #[test]
    fn default_is_clamped() {
        assert!((TrustManager::new(4.0).default_score() - 1.0).abs() < f64::EPSILON);
        assert!((TrustManager::new(f64::NAN).default_score() - 0.5).abs() < f64::EPSILON);
    }
}
