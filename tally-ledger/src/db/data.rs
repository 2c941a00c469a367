use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tally_core::{Level, Points, Reason, RelatedRef};

/// The type used for primary keys in the database.
pub type PrimaryKey = i64;

/// The ledger's view of an account
#[derive(Debug, Clone, Serialize)]
pub struct UserData {
    pub id: PrimaryKey,
    /// The current balance, never negative
    pub points: Points,
    /// Always derived from `points`
    pub level: Level,
    /// Assigned lazily, unique once set
    pub referral_code: Option<String>,
    /// The user who referred this one, set at most once
    pub referrer_id: Option<PrimaryKey>,
    pub created_at: DateTime<Utc>,
}

/// An immutable record of a single point change
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntryData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub amount: Points,
    pub reason: Reason,
    pub related: Option<RelatedRef>,
    pub created_at: DateTime<Utc>,
}

/// A daily check-in.
/// Note: `user_id` and `date` are unique together.
#[derive(Debug, Clone, Serialize)]
pub struct CheckInData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Proof that a user has downloaded a resource.
/// Note: `user_id` and `resource_id` are unique together.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub resource_id: PrimaryKey,
    /// What the first download cost
    pub points_charged: Points,
    pub created_at: DateTime<Utc>,
}

/// Catalog metadata for a downloadable resource
#[derive(Debug, Clone, Serialize)]
pub struct ResourceData {
    pub id: PrimaryKey,
    /// The cost of the first download, zero for free resources
    pub cost: Points,
    /// Users below this level cannot download the resource
    pub minimum_level: Level,
}
