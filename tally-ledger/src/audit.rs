use log::{info, warn};
use serde::Serialize;
use tally_core::Points;

use crate::{Database, LedgerContext, LedgerEntryData, LedgerError, LedgerResult, PrimaryKey};

/// Reads the ledger back and compares it against stored balances
pub struct Auditor<Db> {
    context: LedgerContext<Db>,
}

/// How a user's stored balance compares to their ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub user_id: PrimaryKey,
    pub balance: Points,
    pub ledger_sum: Points,
    /// `balance - ledger_sum`, positive when ledger entries were lost
    pub drift: Points,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.drift == 0
    }
}

impl<Db> Auditor<Db>
where
    Db: Database,
{
    pub fn new(context: &LedgerContext<Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Returns the most recent ledger entries of a user, newest first
    pub async fn history(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntryData>> {
        let database = &self.context.database;

        database
            .user_by_id(user_id)
            .await
            .map_err(LedgerError::for_user(user_id))?;

        Ok(database.list_ledger_entries(user_id, limit).await?)
    }

    /// Compares the balance of a user to the sum of their ledger
    pub async fn audit(&self, user_id: PrimaryKey) -> LedgerResult<AuditReport> {
        let database = &self.context.database;

        let user = database
            .user_by_id(user_id)
            .await
            .map_err(LedgerError::for_user(user_id))?;

        let ledger_sum = database.sum_ledger_entries(user_id).await?;

        Ok(AuditReport {
            user_id,
            balance: user.points,
            ledger_sum,
            drift: user.points - ledger_sum,
        })
    }

    /// Audits every user, returning the reports that show drift.
    /// Nothing is repaired, since the stored balance is the one users have seen.
    pub async fn sweep(&self) -> LedgerResult<Vec<AuditReport>> {
        let user_ids = self.context.database.list_user_ids().await?;
        let mut drifted = Vec::new();

        for user_id in &user_ids {
            let report = match self.audit(*user_id).await {
                Ok(report) => report,
                // Deleted while sweeping
                Err(LedgerError::UserNotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            if !report.is_consistent() {
                warn!(
                    "User {} has a balance of {} but a ledger sum of {}",
                    report.user_id, report.balance, report.ledger_sum
                );
                drifted.push(report);
            }
        }

        info!(
            "Audited {} users, {} with drift",
            user_ids.len(),
            drifted.len()
        );

        Ok(drifted)
    }
}

impl<Db> Clone for Auditor<Db> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}
