pub mod cost_based;
pub mod engine;

pub use cost_based::{match_cost, select_best, ScoredCandidate, DEFAULT_RATING_WEIGHT};
pub use engine::{MatcherConfig, MatchingEngine, DEFAULT_TOP_N, FALLBACK_TOP_N};
