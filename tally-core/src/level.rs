use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{LevelThresholds, Points};

/// A tier derived solely from a user's point balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Bronze,
    Silver,
    Gold,
}

#[derive(Debug, Error)]
#[error("Unknown level: {0}")]
pub struct UnknownLevel(pub String);

impl Level {
    /// Derives the level of a balance.
    /// Every level in the system must come from here.
    pub fn from_balance(balance: Points, thresholds: &LevelThresholds) -> Self {
        if balance >= thresholds.gold {
            Self::Gold
        } else if balance >= thresholds.silver {
            Self::Silver
        } else {
            Self::Bronze
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bronze" => Ok(Self::Bronze),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            other => Err(UnknownLevel(other.to_string())),
        }
    }
}
