//! Trust Model: per-source reputation and advice weighting (spec §4.4).

use std::collections::HashMap;

use parking_lot::RwLock;

pub const TRUST_FLOOR: f64 = 0.3;
const INITIAL_TRUST: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Helpful,
    Neutral,
    Harmful,
    Existential,
}

impl Outcome {
    fn delta(self) -> f64 {
        match self {
            Outcome::Helpful => 0.05,
            Outcome::Neutral => 0.01,
            Outcome::Harmful => -0.2,
            Outcome::Existential => -1.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct TrustModel {
    scores: RwLock<HashMap<String, f64>>,
}

impl TrustModel {
    pub fn new() -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, source: &str) -> f64 {
        *self.scores.read().get(source).unwrap_or(&INITIAL_TRUST)
    }

    pub fn update(&self, source: &str, outcome: Outcome) -> f64 {
        let mut scores = self.scores.write();
        let current = *scores.get(source).unwrap_or(&INITIAL_TRUST);
        let updated = (current + outcome.delta()).clamp(0.0, 1.0);
        scores.insert(source.to_string(), updated);
        updated
    }

    /// `false` when a source's trust has fallen below [`TRUST_FLOOR`].
    pub fn verify(&self, source: &str) -> bool {
        self.get(source) >= TRUST_FLOOR
    }

    /// Effective weight of advice from `source`: `trust * confidence`, or
    /// zero outright when trust is below the floor.
    pub fn weigh_advice(&self, source: &str, confidence: f64) -> f64 {
        let trust = self.get(source);
        if trust < TRUST_FLOOR {
            return 0.0;
        }
        trust * confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_starts_neutral() {
        let model = TrustModel::new();
        assert_eq!(model.get("stranger"), 0.5);
        assert!(model.verify("stranger"));
    }

    #[test]
    fn harmful_outcomes_can_cross_the_floor() {
        let model = TrustModel::new();
        model.update("bad-actor", Outcome::Harmful);
        model.update("bad-actor", Outcome::Harmful);
        assert!(model.get("bad-actor") < TRUST_FLOOR);
        assert!(!model.verify("bad-actor"));
    }

    #[test]
    fn scores_clamp_to_unit_interval() {
        let model = TrustModel::new();
        for _ in 0..100 {
            model.update("saint", Outcome::Helpful);
        }
        assert_eq!(model.get("saint"), 1.0);
        for _ in 0..100 {
            model.update("saint", Outcome::Existential);
        }
        assert_eq!(model.get("saint"), 0.0);
    }

    #[test]
    fn advice_from_untrusted_source_is_zeroed() {
        let model = TrustModel::new();
        model.update("shady", Outcome::Harmful);
        model.update("shady", Outcome::Harmful);
        assert_eq!(model.weigh_advice("shady", 0.9), 0.0);
    }

    #[test]
    fn advice_weight_is_trust_times_confidence() {
        let model = TrustModel::new();
        assert!((model.weigh_advice("fresh", 0.8) - 0.4).abs() < 1e-9);
    }
}
