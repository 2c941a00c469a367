use async_trait::async_trait;
use chrono::NaiveDate;
use tally_core::{Level, Points, Reason, RelatedRef};
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    /// A conditional write kept losing to concurrent writers
    #[error("{resource} was modified concurrently too many times")]
    Contention { resource: &'static str },
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn conflict_or(self, resource: &'static str, field: &'static str, value: &str)
        -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult<T> {
    /// Turns a NotFound error into `None`
    fn optional(self) -> Result<Option<T>>;
}

impl<T> DatabaseResult<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Represents a type that can store ledger data.
///
/// Implementations must enforce the uniqueness constraints and conditional writes
/// documented on each method, since callers rely on them instead of locking.
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_referral_code(&self, code: &str) -> Result<UserData>;
    async fn create_user(&self, new_user: NewUser) -> Result<UserData>;
    async fn list_user_ids(&self) -> Result<Vec<PrimaryKey>>;
    /// Counts the users whose referrer is `referrer_id`
    async fn count_referred_users(&self, referrer_id: PrimaryKey) -> Result<i64>;

    /// Writes a new balance and level, but only if the balance is still `expected`.
    /// Returns false if the balance changed in the meantime.
    async fn update_points_if_unchanged(&self, update: PointsUpdate) -> Result<bool>;
    /// Assigns a referral code, but only if the user has none.
    /// Returns false if a code was already assigned, and a Conflict if another user holds `code`.
    async fn set_referral_code_if_absent(&self, user_id: PrimaryKey, code: &str) -> Result<bool>;
    /// Links a user to their referrer, but only if they have none.
    /// Returns false if a referrer was already set, and a NotFound on `referrer` if they don't exist.
    async fn set_referrer_if_absent(
        &self,
        user_id: PrimaryKey,
        referrer_id: PrimaryKey,
    ) -> Result<bool>;

    async fn create_ledger_entry(&self, new_entry: NewLedgerEntry) -> Result<LedgerEntryData>;
    /// Lists the most recent entries first
    async fn list_ledger_entries(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> Result<Vec<LedgerEntryData>>;
    async fn sum_ledger_entries(&self, user_id: PrimaryKey) -> Result<Points>;
    async fn sum_ledger_entries_by_reason(
        &self,
        user_id: PrimaryKey,
        reason: Reason,
    ) -> Result<Points>;

    /// Records a check-in. Returns a Conflict if one exists for the same user and date.
    async fn create_check_in(&self, user_id: PrimaryKey, date: NaiveDate) -> Result<CheckInData>;
    /// Lists the most recent check-in dates first
    async fn recent_check_in_dates(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> Result<Vec<NaiveDate>>;

    async fn download_by_user_and_resource(
        &self,
        user_id: PrimaryKey,
        resource_id: PrimaryKey,
    ) -> Result<DownloadData>;
    /// Records a download. Returns a Conflict if the user already downloaded the resource.
    async fn create_download(&self, new_download: NewDownload) -> Result<DownloadData>;
}

/// Represents the content catalog that owns resource metadata
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn resource_by_id(&self, resource_id: PrimaryKey) -> Result<ResourceData>;
}

#[derive(Debug)]
pub struct NewUser {
    /// The id issued by the identity provider, or `None` to let the store assign one
    pub id: Option<PrimaryKey>,
}

#[derive(Debug)]
pub struct PointsUpdate {
    pub user_id: PrimaryKey,
    /// The balance the new one was computed from
    pub expected: Points,
    pub points: Points,
    pub level: Level,
}

#[derive(Debug)]
pub struct NewLedgerEntry {
    pub user_id: PrimaryKey,
    pub amount: Points,
    pub reason: Reason,
    pub related: Option<RelatedRef>,
}

#[derive(Debug)]
pub struct NewDownload {
    pub user_id: PrimaryKey,
    pub resource_id: PrimaryKey,
    pub points_charged: Points,
}
