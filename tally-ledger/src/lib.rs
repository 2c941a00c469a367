mod audit;
mod checkin;
mod db;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod mutator;
mod referral;
mod rewards;

use std::sync::Arc;

pub use audit::*;
pub use checkin::*;
pub use db::*;
pub use error::*;
pub use mutator::*;
pub use referral::*;
pub use rewards::*;

pub use tally_core::{LedgerConfig, Level, Points, Reason, ReferralCode, RelatedKind, RelatedRef};

/// The gamification ledger, facilitating balances, check-ins, referrals, and rewards.
pub struct Ledger<Db, C> {
    database: Arc<Db>,

    pub balances: BalanceMutator<Db>,
    pub check_ins: CheckInTracker<Db>,
    pub referrals: ReferralIssuer<Db>,
    pub rewards: RewardDispatcher<Db, C>,
    pub audit: Auditor<Db>,
}

/// A type passed to the components of the ledger, to access configuration and storage.
pub struct LedgerContext<Db> {
    pub config: LedgerConfig,
    pub database: Arc<Db>,
}

impl<Db, C> Ledger<Db, C>
where
    Db: Database,
    C: ResourceCatalog,
{
    pub fn new(config: LedgerConfig, database: Arc<Db>, catalog: Arc<C>) -> Self {
        let context = LedgerContext {
            config,
            database: database.clone(),
        };

        Self {
            database,
            balances: BalanceMutator::new(&context),
            check_ins: CheckInTracker::new(&context),
            referrals: ReferralIssuer::new(&context),
            rewards: RewardDispatcher::new(&context, catalog),
            audit: Auditor::new(&context),
        }
    }

    /// Returns a user as the ledger sees them
    pub async fn user(&self, user_id: PrimaryKey) -> LedgerResult<UserData> {
        self.database
            .user_by_id(user_id)
            .await
            .map_err(LedgerError::for_user(user_id))
    }
}

impl<Db> LedgerContext<Db> {
    /// Returns today's date in the configured time zone
    pub fn today(&self) -> chrono::NaiveDate {
        self.config.calendar().today()
    }
}

impl<Db> Clone for LedgerContext<Db> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            database: self.database.clone(),
        }
    }
}
