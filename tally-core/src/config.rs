use chrono::{FixedOffset, Offset, Utc};

use crate::{Calendar, Points};

/// How many points each rewarded event is worth
#[derive(Debug, Clone)]
pub struct RewardPolicy {
    /// Awarded once per calendar day
    pub daily_checkin: Points,
    /// Awarded to a new user who signed up with a referral code
    pub referral_welcome: Points,
    /// Awarded to the owner of the referral code
    pub referral_reward: Points,
    /// Awarded every time content is read
    pub content_read: Points,
}

/// The lower bounds (inclusive) of each level above bronze
#[derive(Debug, Clone)]
pub struct LevelThresholds {
    pub silver: Points,
    pub gold: Points,
}

/// The configuration of the ledger
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rewards: RewardPolicy,
    pub levels: LevelThresholds,
    /// How many recent check-ins are considered when computing a streak
    pub streak_lookback_days: usize,
    /// How many referral codes are generated before giving up on collisions
    pub max_code_attempts: usize,
    /// How many times a balance write is retried after losing a race
    pub max_balance_attempts: usize,
    /// The offset from UTC used to decide what "today" is
    pub utc_offset: FixedOffset,
}

impl LedgerConfig {
    /// Returns the calendar all dates are computed in
    pub fn calendar(&self) -> Calendar {
        Calendar::new(self.utc_offset)
    }
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            daily_checkin: 5,
            referral_welcome: 100,
            referral_reward: 50,
            content_read: 10,
        }
    }
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            silver: 100,
            gold: 500,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rewards: RewardPolicy::default(),
            levels: LevelThresholds::default(),
            // Longer streaks are undercounted, which keeps the query bounded
            streak_lookback_days: 30,
            // The code space is 32^6, collisions this many times in a row mean something is wrong
            max_code_attempts: 10,
            max_balance_attempts: 5,
            utc_offset: Utc.fix(),
        }
    }
}
