use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tally_core::{Level, Points, Reason};

use crate::{
    CheckInData, Database, DatabaseError, DownloadData, LedgerEntryData, NewDownload,
    NewLedgerEntry, NewUser, PointsUpdate, PrimaryKey, ResourceCatalog, ResourceData, Result,
    UserData,
};

/// An in-process store that enforces the same constraints as the postgres schema.
/// Useful for tests and for running the ledger without a database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
    fail_ledger_writes: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: PrimaryKey,
    users: HashMap<PrimaryKey, UserData>,
    ledger: Vec<LedgerEntryData>,
    check_ins: Vec<CheckInData>,
    downloads: Vec<DownloadData>,
    resources: HashMap<PrimaryKey, ResourceData>,
}

impl MemoryState {
    fn next_id(&mut self) -> PrimaryKey {
        self.last_id += 1;
        self.last_id
    }

    fn user_mut(&mut self, user_id: PrimaryKey) -> Result<&mut UserData> {
        self.users.get_mut(&user_id).ok_or(DatabaseError::NotFound {
            resource: "user",
            identifier: "id",
        })
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following ledger write fail, to simulate a broken audit log
    pub fn fail_ledger_writes(&self, fail: bool) {
        self.fail_ledger_writes.store(fail, Ordering::SeqCst);
    }

    /// Adds or replaces a resource in the catalog
    pub fn insert_resource(&self, resource: ResourceData) {
        self.state.lock().resources.insert(resource.id, resource);
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        self.state.lock().user_mut(user_id).map(|u| u.clone())
    }

    async fn user_by_referral_code(&self, code: &str) -> Result<UserData> {
        self.state
            .lock()
            .users
            .values()
            .find(|u| u.referral_code.as_deref() == Some(code))
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "referral_code",
            })
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        let mut state = self.state.lock();

        let id = match new_user.id {
            Some(id) => {
                if state.users.contains_key(&id) {
                    return Err(DatabaseError::Conflict {
                        resource: "user",
                        field: "id",
                        value: id.to_string(),
                    });
                }

                state.last_id = state.last_id.max(id);
                id
            }
            None => state.next_id(),
        };

        let user = UserData {
            id,
            points: 0,
            level: Level::Bronze,
            referral_code: None,
            referrer_id: None,
            created_at: Utc::now(),
        };

        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn list_user_ids(&self) -> Result<Vec<PrimaryKey>> {
        let mut ids: Vec<_> = self.state.lock().users.keys().copied().collect();
        ids.sort_unstable();

        Ok(ids)
    }

    async fn count_referred_users(&self, referrer_id: PrimaryKey) -> Result<i64> {
        let count = self
            .state
            .lock()
            .users
            .values()
            .filter(|u| u.referrer_id == Some(referrer_id))
            .count();

        Ok(count as i64)
    }

    async fn update_points_if_unchanged(&self, update: PointsUpdate) -> Result<bool> {
        let mut state = self.state.lock();
        let user = state.user_mut(update.user_id)?;

        if user.points != update.expected {
            return Ok(false);
        }

        if update.points < 0 {
            return Err(DatabaseError::Internal(
                "points must not be negative".into(),
            ));
        }

        user.points = update.points;
        user.level = update.level;

        Ok(true)
    }

    async fn set_referral_code_if_absent(&self, user_id: PrimaryKey, code: &str) -> Result<bool> {
        let mut state = self.state.lock();

        let taken = state
            .users
            .values()
            .any(|u| u.referral_code.as_deref() == Some(code));

        let user = state.user_mut(user_id)?;

        if user.referral_code.is_some() {
            return Ok(false);
        }

        if taken {
            return Err(DatabaseError::Conflict {
                resource: "user",
                field: "referral_code",
                value: code.to_string(),
            });
        }

        user.referral_code = Some(code.to_string());
        Ok(true)
    }

    async fn set_referrer_if_absent(
        &self,
        user_id: PrimaryKey,
        referrer_id: PrimaryKey,
    ) -> Result<bool> {
        let mut state = self.state.lock();

        if !state.users.contains_key(&referrer_id) {
            return Err(DatabaseError::NotFound {
                resource: "referrer",
                identifier: "id",
            });
        }

        let user = state.user_mut(user_id)?;

        if user.referrer_id.is_some() {
            return Ok(false);
        }

        user.referrer_id = Some(referrer_id);
        Ok(true)
    }

    async fn create_ledger_entry(&self, new_entry: NewLedgerEntry) -> Result<LedgerEntryData> {
        if self.fail_ledger_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Internal("ledger writes are disabled".into()));
        }

        let mut state = self.state.lock();
        state.user_mut(new_entry.user_id)?;

        let entry = LedgerEntryData {
            id: state.next_id(),
            user_id: new_entry.user_id,
            amount: new_entry.amount,
            reason: new_entry.reason,
            related: new_entry.related,
            created_at: Utc::now(),
        };

        state.ledger.push(entry.clone());
        Ok(entry)
    }

    async fn list_ledger_entries(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> Result<Vec<LedgerEntryData>> {
        let entries = self
            .state
            .lock()
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect();

        Ok(entries)
    }

    async fn sum_ledger_entries(&self, user_id: PrimaryKey) -> Result<Points> {
        let sum = self
            .state
            .lock()
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.amount)
            .sum();

        Ok(sum)
    }

    async fn sum_ledger_entries_by_reason(
        &self,
        user_id: PrimaryKey,
        reason: Reason,
    ) -> Result<Points> {
        let sum = self
            .state
            .lock()
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id && e.reason == reason)
            .map(|e| e.amount)
            .sum();

        Ok(sum)
    }

    async fn create_check_in(&self, user_id: PrimaryKey, date: NaiveDate) -> Result<CheckInData> {
        let mut state = self.state.lock();
        state.user_mut(user_id)?;

        let exists = state
            .check_ins
            .iter()
            .any(|c| c.user_id == user_id && c.date == date);

        if exists {
            return Err(DatabaseError::Conflict {
                resource: "check-in",
                field: "user:date",
                value: format!("{}:{}", user_id, date),
            });
        }

        let check_in = CheckInData {
            id: state.next_id(),
            user_id,
            date,
            created_at: Utc::now(),
        };

        state.check_ins.push(check_in.clone());
        Ok(check_in)
    }

    async fn recent_check_in_dates(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> Result<Vec<NaiveDate>> {
        let mut dates: Vec<_> = self
            .state
            .lock()
            .check_ins
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.date)
            .collect();

        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates.truncate(limit);

        Ok(dates)
    }

    async fn download_by_user_and_resource(
        &self,
        user_id: PrimaryKey,
        resource_id: PrimaryKey,
    ) -> Result<DownloadData> {
        self.state
            .lock()
            .downloads
            .iter()
            .find(|d| d.user_id == user_id && d.resource_id == resource_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "download",
                identifier: "user_id:resource_id",
            })
    }

    async fn create_download(&self, new_download: NewDownload) -> Result<DownloadData> {
        let mut state = self.state.lock();
        state.user_mut(new_download.user_id)?;

        let exists = state
            .downloads
            .iter()
            .any(|d| d.user_id == new_download.user_id && d.resource_id == new_download.resource_id);

        if exists {
            return Err(DatabaseError::Conflict {
                resource: "download",
                field: "user:resource",
                value: format!("{}:{}", new_download.user_id, new_download.resource_id),
            });
        }

        let download = DownloadData {
            id: state.next_id(),
            user_id: new_download.user_id,
            resource_id: new_download.resource_id,
            points_charged: new_download.points_charged,
            created_at: Utc::now(),
        };

        state.downloads.push(download.clone());
        Ok(download)
    }
}

#[async_trait]
impl ResourceCatalog for MemoryDatabase {
    async fn resource_by_id(&self, resource_id: PrimaryKey) -> Result<ResourceData> {
        self.state
            .lock()
            .resources
            .get(&resource_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "resource",
                identifier: "id",
            })
    }
}
