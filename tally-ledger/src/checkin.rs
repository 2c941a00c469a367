use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use tally_core::{compute_streak, Points, Reason};

use crate::{BalanceMutator, Database, LedgerContext, LedgerError, LedgerResult, PrimaryKey};

/// Hands out the daily check-in reward and keeps track of streaks
pub struct CheckInTracker<Db> {
    context: LedgerContext<Db>,
    balances: BalanceMutator<Db>,
}

/// Where a user stands on a given day
#[derive(Debug, Clone, Serialize)]
pub struct CheckInStatus {
    pub checked_in_today: bool,
    pub streak: u32,
}

impl<Db> CheckInTracker<Db>
where
    Db: Database,
{
    pub fn new(context: &LedgerContext<Db>) -> Self {
        Self {
            context: context.clone(),
            balances: BalanceMutator::new(context),
        }
    }

    /// Checks a user in for `today`, returning the points awarded.
    ///
    /// The check-in record is inserted first and relies on the (user, date) constraint,
    /// so two simultaneous requests can never both be rewarded.
    pub async fn check_in(&self, user_id: PrimaryKey, today: NaiveDate) -> LedgerResult<Points> {
        let result = self.context.database.create_check_in(user_id, today).await;

        match result {
            Ok(_) => {}
            Err(e) if e.is_conflict() => return Err(LedgerError::AlreadyCheckedIn),
            Err(e) => return Err(LedgerError::for_user(user_id)(e)),
        }

        let reward = self.context.config.rewards.daily_checkin;

        self.balances
            .apply_delta(user_id, reward, Reason::DailyCheckin, None)
            .await
            .map_err(|e| {
                // The day is spent either way
                warn!(
                    "User {} checked in on {} but the reward failed: {}",
                    user_id, today, e
                );
                e
            })?;

        info!("User {} checked in on {}", user_id, today);

        Ok(reward)
    }

    /// Counts the consecutive days a user has checked in, ending today or yesterday.
    /// Only the configured number of recent check-ins is considered.
    pub async fn compute_streak(&self, user_id: PrimaryKey, today: NaiveDate) -> LedgerResult<u32> {
        let dates = self.recent_dates(user_id).await?;

        Ok(compute_streak(&dates, today))
    }

    /// Returns whether a user has checked in today, along with their streak
    pub async fn status(&self, user_id: PrimaryKey, today: NaiveDate) -> LedgerResult<CheckInStatus> {
        let dates = self.recent_dates(user_id).await?;

        Ok(CheckInStatus {
            checked_in_today: dates.contains(&today),
            streak: compute_streak(&dates, today),
        })
    }

    async fn recent_dates(&self, user_id: PrimaryKey) -> LedgerResult<Vec<NaiveDate>> {
        let lookback = self.context.config.streak_lookback_days;

        self.context
            .database
            .recent_check_in_dates(user_id, lookback)
            .await
            .map_err(LedgerError::from)
    }
}

impl<Db> Clone for CheckInTracker<Db> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            balances: self.balances.clone(),
        }
    }
}
