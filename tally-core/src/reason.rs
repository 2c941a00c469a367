use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a ledger entry was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    DailyCheckin,
    /// Credit for a new user who signed up with a referral code
    ReferralWelcome,
    /// Credit for the user who referred someone
    ReferralReward,
    ContentRead,
    /// Debit for the first download of a paid resource
    ResourceDownload,
    /// Manual correction by an administrator
    AdminAdjustment,
}

/// The kind of entity a ledger entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedKind {
    Resource,
    Content,
    User,
}

/// A reference to the entity that caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedRef {
    pub kind: RelatedKind,
    pub id: i64,
}

#[derive(Debug, Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyCheckin => "daily_checkin",
            Self::ReferralWelcome => "referral_welcome",
            Self::ReferralReward => "referral_reward",
            Self::ContentRead => "content_read",
            Self::ResourceDownload => "resource_download",
            Self::AdminAdjustment => "admin_adjustment",
        }
    }
}

impl RelatedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Content => "content",
            Self::User => "user",
        }
    }
}

impl RelatedRef {
    pub fn resource(id: i64) -> Self {
        Self {
            kind: RelatedKind::Resource,
            id,
        }
    }

    pub fn content(id: i64) -> Self {
        Self {
            kind: RelatedKind::Content,
            id,
        }
    }

    pub fn user(id: i64) -> Self {
        Self {
            kind: RelatedKind::User,
            id,
        }
    }
}

impl Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for RelatedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for Reason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily_checkin" => Ok(Self::DailyCheckin),
            "referral_welcome" => Ok(Self::ReferralWelcome),
            "referral_reward" => Ok(Self::ReferralReward),
            "content_read" => Ok(Self::ContentRead),
            "resource_download" => Ok(Self::ResourceDownload),
            "admin_adjustment" => Ok(Self::AdminAdjustment),
            other => Err(UnknownVariant {
                kind: "reason",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for RelatedKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resource" => Ok(Self::Resource),
            "content" => Ok(Self::Content),
            "user" => Ok(Self::User),
            other => Err(UnknownVariant {
                kind: "related kind",
                value: other.to_string(),
            }),
        }
    }
}
