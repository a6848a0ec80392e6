pub mod functional;
pub mod response;
pub mod retrieval;
mod security;

pub use security::SecurityGate;

pub const TIER1_WEIGHT: f64 = 0.5;
pub const TIER2_WEIGHT: f64 = 0.25;
pub const TIER3_WEIGHT: f64 = 0.25;
pub const PASS_THRESHOLD: f64 = 0.8;

pub const DEFAULT_OWNER_COLUMN: &str = "clnt_id";
pub const DEFAULT_ID_COLUMN: &str = "txn_id";

#[derive(Debug, Clone)]
pub struct ScoringSettings {
    pub owner_column: String,
    pub id_column: String,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            owner_column: DEFAULT_OWNER_COLUMN.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
        }
    }
}

pub fn overall_score(tier1: f64, tier2: f64, tier3: f64) -> f64 {
    tier1 * TIER1_WEIGHT + tier2 * TIER2_WEIGHT + tier3 * TIER3_WEIGHT
}

pub fn is_passing(overall: f64) -> bool {
    overall >= PASS_THRESHOLD
}
