use tally_core::{Level, Points};
use thiserror::Error;

use crate::{DatabaseError, PrimaryKey};

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("User {0} does not exist")]
    UserNotFound(PrimaryKey),
    #[error("Not enough points: {required} required, {balance} available")]
    InsufficientFunds { balance: Points, required: Points },
    #[error("Adding {amount} to a balance of {balance} does not fit")]
    BalanceOverflow { balance: Points, amount: Points },
    #[error("Already checked in today")]
    AlreadyCheckedIn,
    #[error("You cannot use your own referral code")]
    SelfReferral,
    #[error("Referral code not found")]
    CodeNotFound,
    #[error("Invalid referral code")]
    InvalidCode,
    #[error("Could not generate a unique referral code")]
    CodeGenerationExhausted,
    #[error("User {0} was already referred")]
    AlreadyReferred(PrimaryKey),
    #[error("Resource {0} does not exist")]
    ResourceNotFound(PrimaryKey),
    #[error("This resource requires level {required}")]
    InsufficientLevel { level: Level, required: Level },
    /// Something went wrong with the database
    #[error(transparent)]
    Storage(DatabaseError),
    /// Never returned, only logged when an audit entry is lost
    #[error("Could not write ledger entry: {0}")]
    AuditLogWriteFailed(DatabaseError),
}

impl LedgerError {
    /// Returns true if the error is a plain rejection the user should see,
    /// as opposed to a failure of the system
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::AuditLogWriteFailed(_))
    }

    /// Returns true if the operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(DatabaseError::Internal(_)) => true,
            Self::Storage(DatabaseError::Contention { .. }) => true,
            _ => false,
        }
    }

    /// Maps a storage error, turning a missing user into [LedgerError::UserNotFound]
    pub(crate) fn for_user(user_id: PrimaryKey) -> impl FnOnce(DatabaseError) -> Self {
        move |e| match e {
            DatabaseError::NotFound {
                resource: "user", ..
            } => Self::UserNotFound(user_id),
            e => Self::Storage(e),
        }
    }
}

impl From<DatabaseError> for LedgerError {
    fn from(value: DatabaseError) -> Self {
        Self::Storage(value)
    }
}
