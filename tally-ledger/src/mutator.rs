use log::{debug, info, warn};
use tally_core::{Level, Points, Reason, RelatedRef};

use crate::{
    Database, DatabaseError, LedgerContext, LedgerError, LedgerResult, NewLedgerEntry,
    PointsUpdate, PrimaryKey,
};

/// Applies signed point changes to a user's balance and records them in the ledger.
///
/// Every point change in the system goes through here.
pub struct BalanceMutator<Db> {
    context: LedgerContext<Db>,
}

impl<Db> BalanceMutator<Db>
where
    Db: Database,
{
    pub fn new(context: &LedgerContext<Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Adds `amount` to the balance of a user, returning the new balance.
    ///
    /// The balance is re-read right before writing, and the write only goes through
    /// if nobody else changed it in the meantime. Losing that race means reading again,
    /// up to the configured number of attempts.
    ///
    /// The ledger entry is written after the balance. If that fails, the balance change stands.
    pub async fn apply_delta(
        &self,
        user_id: PrimaryKey,
        amount: Points,
        reason: Reason,
        related: Option<RelatedRef>,
    ) -> LedgerResult<Points> {
        let config = &self.context.config;
        let database = &self.context.database;
        let attempts = config.max_balance_attempts.max(1);

        for attempt in 1..=attempts {
            let user = database
                .user_by_id(user_id)
                .await
                .map_err(LedgerError::for_user(user_id))?;

            if amount == 0 {
                return Ok(user.points);
            }

            let Some(new_balance) = user.points.checked_add(amount) else {
                return Err(LedgerError::BalanceOverflow {
                    balance: user.points,
                    amount,
                });
            };

            if new_balance < 0 {
                return Err(LedgerError::InsufficientFunds {
                    balance: user.points,
                    required: amount.checked_neg().unwrap_or(Points::MAX),
                });
            }

            let level = Level::from_balance(new_balance, &config.levels);

            let written = database
                .update_points_if_unchanged(PointsUpdate {
                    user_id,
                    expected: user.points,
                    points: new_balance,
                    level,
                })
                .await
                .map_err(LedgerError::for_user(user_id))?;

            if !written {
                debug!(
                    "Balance of user {} changed while applying {} ({}/{})",
                    user_id, amount, attempt, attempts
                );
                continue;
            }

            if level != user.level {
                info!("User {} went from {} to {}", user_id, user.level, level);
            }

            self.append_entry(NewLedgerEntry {
                user_id,
                amount,
                reason,
                related,
            })
            .await;

            return Ok(new_balance);
        }

        warn!(
            "Gave up applying {} ({}) to user {} after {} attempts",
            amount, reason, user_id, attempts
        );

        Err(DatabaseError::Contention { resource: "user" }.into())
    }

    async fn append_entry(&self, new_entry: NewLedgerEntry) {
        let description = format!(
            "{} {} for user {}",
            new_entry.amount, new_entry.reason, new_entry.user_id
        );

        if let Err(e) = self.context.database.create_ledger_entry(new_entry).await {
            warn!("{} ({})", LedgerError::AuditLogWriteFailed(e), description);
        }
    }
}

impl<Db> Clone for BalanceMutator<Db> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}
