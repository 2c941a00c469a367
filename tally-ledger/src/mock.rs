use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tally_core::{LedgerConfig, Level, Points, Reason, ReferralCode};

use crate::{
    db::Result, CheckInData, CodeSource, Database, DatabaseError, DownloadData, Ledger,
    LedgerContext, LedgerEntryData, MemoryDatabase, NewDownload, NewLedgerEntry, NewUser,
    PointsUpdate, PrimaryKey, UserData,
};

pub type MockLedger = Ledger<MemoryDatabase, MemoryDatabase>;
pub type HookedLedger = Ledger<HookedDatabase, MemoryDatabase>;

/// Creates a ledger backed by a fresh in-memory store
pub fn ledger() -> (MockLedger, Arc<MemoryDatabase>) {
    let database = Arc::new(MemoryDatabase::new());
    let ledger = Ledger::new(LedgerConfig::default(), database.clone(), database.clone());

    (ledger, database)
}

/// Creates a ledger whose storage can be made to misbehave
pub fn hooked_ledger() -> (Arc<HookedLedger>, Arc<HookedDatabase>) {
    let database = Arc::new(HookedDatabase::new());
    let catalog = database.inner.clone();
    let ledger = Ledger::new(LedgerConfig::default(), database.clone(), catalog);

    (Arc::new(ledger), database)
}

pub fn context<Db>(database: Arc<Db>) -> LedgerContext<Db> {
    LedgerContext {
        config: LedgerConfig::default(),
        database,
    }
}

/// Creates a user that starts with the given balance, bypassing the ledger log
pub async fn user_with_points(database: &MemoryDatabase, points: Points) -> PrimaryKey {
    let user = database
        .create_user(NewUser { id: None })
        .await
        .unwrap();

    database
        .update_points_if_unchanged(PointsUpdate {
            user_id: user.id,
            expected: 0,
            points,
            level: Level::from_balance(points, &LedgerConfig::default().levels),
        })
        .await
        .unwrap();

    user.id
}

/// Hands out the given codes in order, starting over when they run out
pub struct CyclingCodes {
    codes: Vec<ReferralCode>,
    next: AtomicUsize,
}

impl CyclingCodes {
    pub fn new(codes: &[&str]) -> Self {
        Self {
            codes: codes.iter().map(|c| ReferralCode::parse(c).unwrap()).collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl CodeSource for CyclingCodes {
    fn next_code(&self) -> ReferralCode {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.codes[index % self.codes.len()].clone()
    }
}

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Wraps a [MemoryDatabase] to reproduce what only happens under real concurrency or failure
pub struct HookedDatabase {
    pub inner: Arc<MemoryDatabase>,

    hide_referral_codes: AtomicBool,
    fail_download_writes: AtomicBool,
    vanish_referrers: AtomicBool,
    before_create_download: Mutex<Option<Hook>>,
}

impl HookedDatabase {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryDatabase::new()),
            hide_referral_codes: Default::default(),
            fail_download_writes: Default::default(),
            vanish_referrers: Default::default(),
            before_create_download: Default::default(),
        }
    }

    /// Makes lookups by referral code find nothing, like a read racing a concurrent write
    pub fn hide_referral_codes(&self, hide: bool) {
        self.hide_referral_codes.store(hide, Ordering::SeqCst);
    }

    pub fn fail_download_writes(&self, fail: bool) {
        self.fail_download_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes referrers disappear between being looked up and being linked
    pub fn vanish_referrers(&self, vanish: bool) {
        self.vanish_referrers.store(vanish, Ordering::SeqCst);
    }

    /// Runs `hook` once, right before the next download is written
    pub fn before_create_download<F>(&self, hook: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        *self.before_create_download.lock() = Some(Box::new(hook));
    }
}

#[async_trait]
impl Database for HookedDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        self.inner.user_by_id(user_id).await
    }

    async fn user_by_referral_code(&self, code: &str) -> Result<UserData> {
        if self.hide_referral_codes.load(Ordering::SeqCst) {
            return Err(DatabaseError::NotFound {
                resource: "user",
                identifier: "referral_code",
            });
        }

        self.inner.user_by_referral_code(code).await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.inner.create_user(new_user).await
    }

    async fn list_user_ids(&self) -> Result<Vec<PrimaryKey>> {
        self.inner.list_user_ids().await
    }

    async fn count_referred_users(&self, referrer_id: PrimaryKey) -> Result<i64> {
        self.inner.count_referred_users(referrer_id).await
    }

    async fn update_points_if_unchanged(&self, update: PointsUpdate) -> Result<bool> {
        self.inner.update_points_if_unchanged(update).await
    }

    async fn set_referral_code_if_absent(&self, user_id: PrimaryKey, code: &str) -> Result<bool> {
        self.inner.set_referral_code_if_absent(user_id, code).await
    }

    async fn set_referrer_if_absent(
        &self,
        user_id: PrimaryKey,
        referrer_id: PrimaryKey,
    ) -> Result<bool> {
        let referrer_id = if self.vanish_referrers.load(Ordering::SeqCst) {
            -referrer_id
        } else {
            referrer_id
        };

        self.inner.set_referrer_if_absent(user_id, referrer_id).await
    }

    async fn create_ledger_entry(&self, new_entry: NewLedgerEntry) -> Result<LedgerEntryData> {
        self.inner.create_ledger_entry(new_entry).await
    }

    async fn list_ledger_entries(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> Result<Vec<LedgerEntryData>> {
        self.inner.list_ledger_entries(user_id, limit).await
    }

    async fn sum_ledger_entries(&self, user_id: PrimaryKey) -> Result<Points> {
        self.inner.sum_ledger_entries(user_id).await
    }

    async fn sum_ledger_entries_by_reason(
        &self,
        user_id: PrimaryKey,
        reason: Reason,
    ) -> Result<Points> {
        self.inner.sum_ledger_entries_by_reason(user_id, reason).await
    }

    async fn create_check_in(&self, user_id: PrimaryKey, date: NaiveDate) -> Result<CheckInData> {
        self.inner.create_check_in(user_id, date).await
    }

    async fn recent_check_in_dates(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> Result<Vec<NaiveDate>> {
        self.inner.recent_check_in_dates(user_id, limit).await
    }

    async fn download_by_user_and_resource(
        &self,
        user_id: PrimaryKey,
        resource_id: PrimaryKey,
    ) -> Result<DownloadData> {
        self.inner
            .download_by_user_and_resource(user_id, resource_id)
            .await
    }

    async fn create_download(&self, new_download: NewDownload) -> Result<DownloadData> {
        let hook = self.before_create_download.lock().take();

        if let Some(hook) = hook {
            hook().await;
        }

        if self.fail_download_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Internal("connection reset".into()));
        }

        self.inner.create_download(new_download).await
    }
}
