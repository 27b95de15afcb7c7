use crate::model::{DriverRecord, MatchOffer, MAX_RATING};

/// Seconds of ETA one rating point is worth.
pub const DEFAULT_RATING_WEIGHT: f64 = 30.0;

/// A candidate driver with its pickup ETA and resulting cost.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub driver: DriverRecord,
    pub eta_seconds: f64,
    pub cost: f64,
}

impl ScoredCandidate {
    pub fn new(driver: DriverRecord, eta_seconds: f64, rating_weight: f64) -> Self {
        let cost = match_cost(eta_seconds, driver.rating, rating_weight);
        Self {
            driver,
            eta_seconds,
            cost,
        }
    }

    pub fn into_offer(self) -> MatchOffer {
        MatchOffer {
            driver_id: self.driver.id,
            eta_seconds: self.eta_seconds,
            cost: self.cost,
        }
    }
}

/// Lower is better: pickup time plus a penalty per rating point below the maximum.
pub fn match_cost(eta_seconds: f64, rating: f64, rating_weight: f64) -> f64 {
    eta_seconds + rating_weight * (MAX_RATING - rating)
}

/// Minimum-cost candidate; equal costs go to the lexicographically smallest driver id.
pub fn select_best(candidates: Vec<ScoredCandidate>) -> Option<ScoredCandidate> {
    candidates.into_iter().min_by(|a, b| {
        a.cost
            .total_cmp(&b.cost)
            .then_with(|| a.driver.id.cmp(&b.driver.id))
    })
}
