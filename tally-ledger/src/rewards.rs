use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, error, info};
use serde::Serialize;
use tally_core::{Points, Reason, RelatedRef};

use crate::{
    BalanceMutator, CheckInTracker, Database, DatabaseResult, LedgerContext, LedgerError,
    LedgerResult, NewDownload, PrimaryKey, Redemption, ReferralIssuer, ResourceCatalog,
};

/// Turns events into point changes.
///
/// Holds no state of its own. Amounts come from [tally_core::RewardPolicy] and
/// repeat protection comes from the constraints in the database.
pub struct RewardDispatcher<Db, C> {
    context: LedgerContext<Db>,
    catalog: Arc<C>,

    balances: BalanceMutator<Db>,
    check_ins: CheckInTracker<Db>,
    referrals: ReferralIssuer<Db>,
}

/// The result of a download request
#[derive(Debug, Clone, Serialize)]
pub struct DownloadReceipt {
    pub resource_id: PrimaryKey,
    /// How many points this request cost, zero for repeat downloads
    pub charged: Points,
    /// The balance after the download
    pub balance: Points,
}

impl<Db, C> RewardDispatcher<Db, C>
where
    Db: Database,
    C: ResourceCatalog,
{
    pub fn new(context: &LedgerContext<Db>, catalog: Arc<C>) -> Self {
        Self {
            context: context.clone(),
            catalog,
            balances: BalanceMutator::new(context),
            check_ins: CheckInTracker::new(context),
            referrals: ReferralIssuer::new(context),
        }
    }

    /// Checks a user in for the current day in the configured time zone
    pub async fn daily_check_in(&self, user_id: PrimaryKey) -> LedgerResult<Points> {
        self.daily_check_in_on(user_id, self.context.today()).await
    }

    /// Checks a user in for a specific day
    pub async fn daily_check_in_on(
        &self,
        user_id: PrimaryKey,
        today: NaiveDate,
    ) -> LedgerResult<Points> {
        self.check_ins.check_in(user_id, today).await
    }

    /// Rewards a new user and their referrer. Only call this during signup.
    pub async fn signup_with_referral(
        &self,
        new_user_id: PrimaryKey,
        code: &str,
    ) -> LedgerResult<Redemption> {
        self.referrals.redeem_on_signup(new_user_id, code).await
    }

    /// Rewards a user for reading content, returning the new balance.
    /// There is no limit on how often this pays out.
    pub async fn content_read(
        &self,
        user_id: PrimaryKey,
        content_id: PrimaryKey,
    ) -> LedgerResult<Points> {
        let reward = self.context.config.rewards.content_read;

        self.balances
            .apply_delta(
                user_id,
                reward,
                Reason::ContentRead,
                Some(RelatedRef::content(content_id)),
            )
            .await
    }

    /// Charges a user for the first download of a resource.
    /// Downloading the same resource again is free, even after dropping below its level.
    ///
    /// The points are taken before the download is recorded, so a record always means
    /// the resource was paid for. Whoever loses the race to record it gets a refund.
    pub async fn download_resource(
        &self,
        user_id: PrimaryKey,
        resource_id: PrimaryKey,
    ) -> LedgerResult<DownloadReceipt> {
        let database = &self.context.database;

        let resource = self
            .catalog
            .resource_by_id(resource_id)
            .await
            .optional()?
            .ok_or(LedgerError::ResourceNotFound(resource_id))?;

        let user = database
            .user_by_id(user_id)
            .await
            .map_err(LedgerError::for_user(user_id))?;

        let previous = database
            .download_by_user_and_resource(user_id, resource_id)
            .await
            .optional()?;

        if previous.is_some() {
            return Ok(DownloadReceipt {
                resource_id,
                charged: 0,
                balance: user.points,
            });
        }

        if user.level < resource.minimum_level {
            return Err(LedgerError::InsufficientLevel {
                level: user.level,
                required: resource.minimum_level,
            });
        }

        let cost = resource.cost.max(0);

        if user.points < cost {
            return Err(LedgerError::InsufficientFunds {
                balance: user.points,
                required: cost,
            });
        }

        let balance = self
            .balances
            .apply_delta(
                user_id,
                -cost,
                Reason::ResourceDownload,
                Some(RelatedRef::resource(resource_id)),
            )
            .await?;

        let recorded = database
            .create_download(NewDownload {
                user_id,
                resource_id,
                points_charged: cost,
            })
            .await;

        match recorded {
            Ok(_) => {
                info!(
                    "User {} downloaded resource {} for {} points",
                    user_id, resource_id, cost
                );

                Ok(DownloadReceipt {
                    resource_id,
                    charged: cost,
                    balance,
                })
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    "User {} downloaded resource {} concurrently, refunding",
                    user_id, resource_id
                );

                let balance = self.refund(user_id, resource_id, cost).await?;

                Ok(DownloadReceipt {
                    resource_id,
                    charged: 0,
                    balance,
                })
            }
            Err(e) => {
                self.refund(user_id, resource_id, cost).await?;
                Err(LedgerError::for_user(user_id)(e))
            }
        }
    }

    /// Applies a manual correction, returning the new balance
    pub async fn adjust(&self, user_id: PrimaryKey, amount: Points) -> LedgerResult<Points> {
        info!("Adjusting the balance of user {} by {}", user_id, amount);

        self.balances
            .apply_delta(user_id, amount, Reason::AdminAdjustment, None)
            .await
    }

    async fn refund(
        &self,
        user_id: PrimaryKey,
        resource_id: PrimaryKey,
        cost: Points,
    ) -> LedgerResult<Points> {
        self.balances
            .apply_delta(
                user_id,
                cost,
                Reason::ResourceDownload,
                Some(RelatedRef::resource(resource_id)),
            )
            .await
            .map_err(|e| {
                error!(
                    "Could not refund {} points to user {} for resource {}: {}",
                    cost, user_id, resource_id, e
                );
                e
            })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use futures_util::{future::join_all, FutureExt};
    use tally_core::{Level, Reason, RelatedRef};

    use crate::{
        mock::{hooked_ledger, ledger, user_with_points},
        Database, DatabaseError, LedgerError, ResourceData,
    };

    fn resource(id: i64, cost: i64, minimum_level: Level) -> ResourceData {
        ResourceData {
            id,
            cost,
            minimum_level,
        }
    }

    #[tokio::test]
    async fn paid_resources_are_charged_once() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 50).await;
        db.insert_resource(resource(7, 20, Level::Bronze));

        let first = ledger.rewards.download_resource(user_id, 7).await.unwrap();
        assert_eq!(first.charged, 20);
        assert_eq!(first.balance, 30);

        let second = ledger.rewards.download_resource(user_id, 7).await.unwrap();
        assert_eq!(second.charged, 0);
        assert_eq!(second.balance, 30);

        let entries = db.list_ledger_entries(user_id, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, -20);
        assert_eq!(entries[0].related, Some(RelatedRef::resource(7)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_downloads_are_charged_once() {
        let (ledger, db) = ledger();
        let ledger = Arc::new(ledger);
        let user_id = user_with_points(&db, 1000).await;
        db.insert_resource(resource(7, 20, Level::Bronze));

        let tasks = (0..8).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.rewards.download_resource(user_id, 7).await })
        });

        let charged: i64 = join_all(tasks)
            .await
            .into_iter()
            .filter_map(|r| r.unwrap().ok())
            .map(|receipt| receipt.charged)
            .sum();

        assert_eq!(charged, 20);
        assert_eq!(db.user_by_id(user_id).await.unwrap().points, 980);
        assert_eq!(db.sum_ledger_entries(user_id).await.unwrap(), -20);
    }

    #[tokio::test]
    async fn a_download_recorded_mid_request_is_paid_for_once() {
        let (ledger, db) = hooked_ledger();
        let user_id = user_with_points(&db.inner, 100).await;
        db.inner.insert_resource(resource(7, 20, Level::Bronze));

        // A second request for the same resource finishes while the first is being recorded
        let racing = ledger.clone();
        db.before_create_download(move || {
            async move {
                let receipt = racing.rewards.download_resource(user_id, 7).await.unwrap();
                assert_eq!(receipt.charged, 20);
            }
            .boxed()
        });

        let first = ledger.rewards.download_resource(user_id, 7).await.unwrap();

        assert_eq!(first.charged, 0);
        assert_eq!(first.balance, 80);

        let download = db.inner.download_by_user_and_resource(user_id, 7).await.unwrap();
        assert_eq!(download.points_charged, 20);

        assert_eq!(db.inner.user_by_id(user_id).await.unwrap().points, 80);
        assert_eq!(
            db.inner
                .sum_ledger_entries_by_reason(user_id, Reason::ResourceDownload)
                .await
                .unwrap(),
            -20
        );
    }

    #[tokio::test]
    async fn unrecorded_downloads_are_refunded() {
        let (ledger, db) = hooked_ledger();
        let user_id = user_with_points(&db.inner, 50).await;
        db.inner.insert_resource(resource(7, 20, Level::Bronze));

        db.fail_download_writes(true);

        let result = ledger.rewards.download_resource(user_id, 7).await;
        assert!(matches!(
            result,
            Err(LedgerError::Storage(DatabaseError::Internal(_)))
        ));

        assert_eq!(db.inner.user_by_id(user_id).await.unwrap().points, 50);
        assert_eq!(db.inner.sum_ledger_entries(user_id).await.unwrap(), 0);
        assert!(db.inner.download_by_user_and_resource(user_id, 7).await.is_err());

        db.fail_download_writes(false);

        let receipt = ledger.rewards.download_resource(user_id, 7).await.unwrap();
        assert_eq!(receipt.charged, 20);
        assert_eq!(receipt.balance, 30);
    }

    #[tokio::test]
    async fn paid_downloads_stay_free_after_losing_the_level() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 150).await;
        db.insert_resource(resource(7, 20, Level::Silver));

        let first = ledger.rewards.download_resource(user_id, 7).await.unwrap();
        assert_eq!(first.charged, 20);

        ledger.rewards.adjust(user_id, -100).await.unwrap();
        assert_eq!(db.user_by_id(user_id).await.unwrap().level, Level::Bronze);

        let again = ledger.rewards.download_resource(user_id, 7).await.unwrap();
        assert_eq!(again.charged, 0);
        assert_eq!(again.balance, 30);
    }

    #[tokio::test]
    async fn downloads_need_enough_points() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 10).await;
        db.insert_resource(resource(7, 20, Level::Bronze));

        let result = ledger.rewards.download_resource(user_id, 7).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

        assert!(db.download_by_user_and_resource(user_id, 7).await.is_err());
        assert_eq!(db.user_by_id(user_id).await.unwrap().points, 10);
    }

    #[tokio::test]
    async fn downloads_need_a_high_enough_level() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 150).await;
        db.insert_resource(resource(7, 0, Level::Gold));

        let result = ledger.rewards.download_resource(user_id, 7).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientLevel {
                level: Level::Silver,
                required: Level::Gold
            })
        ));
    }

    #[tokio::test]
    async fn free_resources_are_recorded_without_ledger_entries() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 0).await;
        db.insert_resource(resource(3, 0, Level::Bronze));

        let receipt = ledger.rewards.download_resource(user_id, 3).await.unwrap();

        assert_eq!(receipt.charged, 0);
        assert!(db.download_by_user_and_resource(user_id, 3).await.is_ok());
        assert!(db.list_ledger_entries(user_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_resources_are_rejected() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 0).await;

        let result = ledger.rewards.download_resource(user_id, 99).await;
        assert!(matches!(result, Err(LedgerError::ResourceNotFound(99))));
    }

    #[tokio::test]
    async fn content_reads_are_rewarded_every_time() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 0).await;

        ledger.rewards.content_read(user_id, 1).await.unwrap();
        let balance = ledger.rewards.content_read(user_id, 1).await.unwrap();

        assert_eq!(balance, 20);

        let entries = db.list_ledger_entries(user_id, 10).await.unwrap();
        assert!(entries.iter().all(|e| e.reason == Reason::ContentRead));
    }

    #[tokio::test]
    async fn adjustments_respect_the_balance_floor() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 0).await;

        assert_eq!(ledger.rewards.adjust(user_id, 40).await.unwrap(), 40);

        let result = ledger.rewards.adjust(user_id, -41).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn daily_check_in_uses_the_configured_calendar() {
        let (ledger, db) = ledger();
        let user_id = user_with_points(&db, 0).await;

        ledger.rewards.daily_check_in(user_id).await.unwrap();

        let second = ledger.rewards.daily_check_in(user_id).await;
        assert!(matches!(second, Err(LedgerError::AlreadyCheckedIn)));
    }
}
