use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    postgres::PgPoolOptions, query, query_as, query_scalar, Error as SqlxError, FromRow, PgPool,
};
use tally_core::{Level, Points, Reason, RelatedKind, RelatedRef};

use crate::{
    CheckInData, Database, DatabaseError, DownloadData, IntoDatabaseError, LedgerEntryData,
    NewDownload, NewLedgerEntry, NewUser, PointsUpdate, PrimaryKey, ResourceCatalog, ResourceData,
    Result, UserData,
};

const USER_COLUMNS: &str = "id, points, level, referral_code, referrer_id, created_at";
const LEDGER_COLUMNS: &str = "id, user_id, amount, reason, related_type, related_id, created_at";
const DOWNLOAD_COLUMNS: &str = "id, user_id, resource_id, points_charged, created_at";

/// A postgres database implementation for the ledger
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_max_connections(url, 5).await
    }

    pub async fn with_max_connections(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        Ok(Self { pool })
    }

    /// Applies the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))
    }

    /// Makes sure a user exists after a conditional write matched no rows
    async fn ensure_user(&self, user_id: PrimaryKey) -> Result<()> {
        self.user_by_id(user_id).await.map(|_| ())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))?
            .try_into()
    }

    async fn user_by_referral_code(&self, code: &str) -> Result<UserData> {
        query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE referral_code = $1"
        ))
        .bind(code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("user", "referral_code"))?
        .try_into()
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        let row = match new_user.id {
            Some(id) => {
                query_as::<_, UserRow>(&format!(
                    "INSERT INTO users (id) VALUES ($1) RETURNING {USER_COLUMNS}"
                ))
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| e.conflict_or("user", "id", &id.to_string()))?
            }
            None => query_as::<_, UserRow>(&format!(
                "INSERT INTO users DEFAULT VALUES RETURNING {USER_COLUMNS}"
            ))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.any())?,
        };

        row.try_into()
    }

    async fn list_user_ids(&self) -> Result<Vec<PrimaryKey>> {
        query_scalar::<_, PrimaryKey>("SELECT id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn count_referred_users(&self, referrer_id: PrimaryKey) -> Result<i64> {
        query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE referrer_id = $1")
            .bind(referrer_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn update_points_if_unchanged(&self, update: PointsUpdate) -> Result<bool> {
        let result = query("UPDATE users SET points = $1, level = $2 WHERE id = $3 AND points = $4")
            .bind(update.points)
            .bind(update.level.as_str())
            .bind(update.user_id)
            .bind(update.expected)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            self.ensure_user(update.user_id).await?;
            return Ok(false);
        }

        Ok(true)
    }

    async fn set_referral_code_if_absent(&self, user_id: PrimaryKey, code: &str) -> Result<bool> {
        let result =
            query("UPDATE users SET referral_code = $1 WHERE id = $2 AND referral_code IS NULL")
                .bind(code)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| e.conflict_or("user", "referral_code", code))?;

        if result.rows_affected() == 0 {
            self.ensure_user(user_id).await?;
            return Ok(false);
        }

        Ok(true)
    }

    async fn set_referrer_if_absent(
        &self,
        user_id: PrimaryKey,
        referrer_id: PrimaryKey,
    ) -> Result<bool> {
        let result =
            query("UPDATE users SET referrer_id = $1 WHERE id = $2 AND referrer_id IS NULL")
                .bind(referrer_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| e.missing_or("referrer", |e| e.any()))?;

        if result.rows_affected() == 0 {
            self.ensure_user(user_id).await?;
            return Ok(false);
        }

        Ok(true)
    }

    async fn create_ledger_entry(&self, new_entry: NewLedgerEntry) -> Result<LedgerEntryData> {
        query_as::<_, LedgerEntryRow>(&format!(
            "INSERT INTO ledger_entries (user_id, amount, reason, related_type, related_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {LEDGER_COLUMNS}"
        ))
        .bind(new_entry.user_id)
        .bind(new_entry.amount)
        .bind(new_entry.reason.as_str())
        .bind(new_entry.related.map(|r| r.kind.as_str()))
        .bind(new_entry.related.map(|r| r.id))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.missing_or("user", |e| e.any()))?
        .try_into()
    }

    async fn list_ledger_entries(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> Result<Vec<LedgerEntryData>> {
        query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .into_iter()
        .map(|row| row.try_into())
        .collect()
    }

    async fn sum_ledger_entries(&self, user_id: PrimaryKey) -> Result<Points> {
        query_scalar::<_, Points>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM ledger_entries WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn sum_ledger_entries_by_reason(
        &self,
        user_id: PrimaryKey,
        reason: Reason,
    ) -> Result<Points> {
        query_scalar::<_, Points>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM ledger_entries
            WHERE user_id = $1 AND reason = $2",
        )
        .bind(user_id)
        .bind(reason.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn create_check_in(&self, user_id: PrimaryKey, date: NaiveDate) -> Result<CheckInData> {
        let value = format!("{}:{}", user_id, date);

        query_as::<_, CheckInRow>(
            "INSERT INTO check_ins (user_id, checkin_date) VALUES ($1, $2)
            RETURNING id, user_id, checkin_date, created_at",
        )
        .bind(user_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.missing_or("user", |e| e.conflict_or("check-in", "user:date", &value)))
    }

    async fn recent_check_in_dates(
        &self,
        user_id: PrimaryKey,
        limit: usize,
    ) -> Result<Vec<NaiveDate>> {
        query_scalar::<_, NaiveDate>(
            "SELECT checkin_date FROM check_ins
            WHERE user_id = $1
            ORDER BY checkin_date DESC
            LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn download_by_user_and_resource(
        &self,
        user_id: PrimaryKey,
        resource_id: PrimaryKey,
    ) -> Result<DownloadData> {
        query_as::<_, DownloadRow>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM resource_downloads
            WHERE user_id = $1 AND resource_id = $2"
        ))
        .bind(user_id)
        .bind(resource_id)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("download", "user_id:resource_id"))
    }

    async fn create_download(&self, new_download: NewDownload) -> Result<DownloadData> {
        let value = format!("{}:{}", new_download.user_id, new_download.resource_id);

        query_as::<_, DownloadRow>(&format!(
            "INSERT INTO resource_downloads (user_id, resource_id, points_charged)
            VALUES ($1, $2, $3)
            RETURNING {DOWNLOAD_COLUMNS}"
        ))
        .bind(new_download.user_id)
        .bind(new_download.resource_id)
        .bind(new_download.points_charged)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.missing_or("user", |e| e.conflict_or("download", "user:resource", &value)))
    }
}

#[async_trait]
impl ResourceCatalog for PgDatabase {
    async fn resource_by_id(&self, resource_id: PrimaryKey) -> Result<ResourceData> {
        let row = query_as::<_, ResourceRow>(
            "SELECT id, points_cost, access_level FROM resources WHERE id = $1",
        )
        .bind(resource_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("resource", "id"))?;

        Ok(ResourceData {
            id: row.id,
            cost: row.points_cost,
            minimum_level: row.access_level.parse::<Level>().map_err(internal)?,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: PrimaryKey,
    points: Points,
    level: String,
    referral_code: Option<String>,
    referrer_id: Option<PrimaryKey>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct LedgerEntryRow {
    id: PrimaryKey,
    user_id: PrimaryKey,
    amount: Points,
    reason: String,
    related_type: Option<String>,
    related_id: Option<PrimaryKey>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct CheckInRow {
    id: PrimaryKey,
    user_id: PrimaryKey,
    checkin_date: NaiveDate,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DownloadRow {
    id: PrimaryKey,
    user_id: PrimaryKey,
    resource_id: PrimaryKey,
    points_charged: Points,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ResourceRow {
    id: PrimaryKey,
    points_cost: Points,
    access_level: String,
}

impl TryFrom<UserRow> for UserData {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            points: row.points,
            level: row.level.parse::<Level>().map_err(internal)?,
            referral_code: row.referral_code,
            referrer_id: row.referrer_id,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<LedgerEntryRow> for LedgerEntryData {
    type Error = DatabaseError;

    fn try_from(row: LedgerEntryRow) -> Result<Self> {
        let related = match (row.related_type, row.related_id) {
            (Some(kind), Some(id)) => Some(RelatedRef {
                kind: kind.parse::<RelatedKind>().map_err(internal)?,
                id,
            }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            reason: row.reason.parse::<Reason>().map_err(internal)?,
            related,
            created_at: row.created_at,
        })
    }
}

impl From<CheckInRow> for CheckInData {
    fn from(row: CheckInRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            date: row.checkin_date,
            created_at: row.created_at,
        }
    }
}

impl From<DownloadRow> for DownloadData {
    fn from(row: DownloadRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            resource_id: row.resource_id,
            points_charged: row.points_charged,
            created_at: row.created_at,
        }
    }
}

/// Writes that reference a missing row fail on the foreign key
trait ForeignKeyError {
    fn missing_or(
        self,
        resource: &'static str,
        other: impl FnOnce(SqlxError) -> DatabaseError,
    ) -> DatabaseError;
}

impl ForeignKeyError for SqlxError {
    fn missing_or(
        self,
        resource: &'static str,
        other: impl FnOnce(SqlxError) -> DatabaseError,
    ) -> DatabaseError {
        match self {
            SqlxError::Database(ref e) if e.is_foreign_key_violation() => DatabaseError::NotFound {
                resource,
                identifier: "id",
            },
            e => other(e),
        }
    }
}

fn internal<E>(error: E) -> DatabaseError
where
    E: std::error::Error + Send + Sync + 'static,
{
    DatabaseError::Internal(Box::new(error))
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        internal(self)
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }

    fn conflict_or(self, resource: &'static str, field: &'static str, value: &str) -> DatabaseError {
        match self {
            SqlxError::Database(ref e) if e.is_unique_violation() => DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            },
            e => Self::any(e),
        }
    }
}
