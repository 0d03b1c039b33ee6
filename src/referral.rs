//! Referral rewards paid to the referrer of a depositing account.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A flat reward for deposits of at least `threshold`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardRule {
    pub threshold: i64,
    pub reward: i64,
}

/// Ordered by descending threshold; the first matching rule wins.
pub const REWARD_RULES: &[RewardRule] = &[
    RewardRule { threshold: 8000, reward: 500 },
    RewardRule { threshold: 6000, reward: 350 },
    RewardRule { threshold: 4000, reward: 250 },
    RewardRule { threshold: 2000, reward: 150 },
    RewardRule { threshold: 1000, reward: 100 },
    RewardRule { threshold: 500, reward: 50 },
];

/// Returns the reward owed to a referrer for an approved deposit of `amount`.
pub fn reward_for(amount: i64) -> i64 {
    reward_from(REWARD_RULES, amount)
}

/// Picks the highest threshold not exceeding `amount`, regardless of the
/// order `rules` come in.
pub fn reward_from(rules: &[RewardRule], amount: i64) -> i64 {
    rules
        .iter()
        .filter(|rule| rule.threshold <= amount)
        .max_by_key(|rule| rule.threshold)
        .map(|rule| rule.reward)
        .unwrap_or(0)
}

/// A reward paid for one approved deposit. At most one exists per
/// `(request_id, beneficiary)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferralReward {
    /// The approved deposit that triggered the reward.
    pub request_id: Uuid,
    /// The referrer being paid.
    pub beneficiary: String,
    /// The depositing account.
    pub referee: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}
