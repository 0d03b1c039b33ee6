use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction, postgres::PgPoolOptions};
use uuid::Uuid;

use super::{AccountInsert, AccountStore, RequestFilter, RequestStore, SettlementWrite, StoreError};
use crate::ledger::{Account, OwnedFridge};
use crate::referral::ReferralReward;
use crate::workflow::{FundingRequest, RequestKind, RequestStatus};

/// Initializes the database pool.
pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    email: String,
    password_hash: String,
    phone: Option<String>,
    balance: i64,
    referral_code: String,
    referred_by: Option<String>,
    last_accrual_date: Option<NaiveDate>,
    first_deposit_phone: Option<String>,
    latest_deposit_phone: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct FridgeRow {
    email: String,
    catalog_item_id: String,
    purchase_price: i64,
    daily_earn: i64,
    purchased_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    kind: String,
    email: String,
    amount: i64,
    phone: String,
    reference: Option<String>,
    status: String,
    requested_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct RewardRow {
    request_id: Uuid,
    beneficiary: String,
    referee: String,
    amount: i64,
    created_at: DateTime<Utc>,
}

const ACCOUNT_COLUMNS: &str = "email, password_hash, phone, balance, referral_code, referred_by, \
     last_accrual_date, first_deposit_phone, latest_deposit_phone, created_at";

const FRIDGE_COLUMNS: &str = "email, catalog_item_id, purchase_price, daily_earn, purchased_at";

const REQUEST_COLUMNS: &str =
    "id, kind, email, amount, phone, reference, status, requested_at, processed_at";

impl AccountRow {
    fn into_account(self, fridges: Vec<OwnedFridge>) -> Account {
        Account {
            email: self.email,
            password_hash: self.password_hash,
            phone: self.phone,
            balance: self.balance,
            fridges,
            referral_code: self.referral_code,
            referred_by: self.referred_by,
            last_accrual_date: self.last_accrual_date,
            first_deposit_phone: self.first_deposit_phone,
            latest_deposit_phone: self.latest_deposit_phone,
            created_at: self.created_at,
        }
    }
}

impl From<FridgeRow> for OwnedFridge {
    fn from(row: FridgeRow) -> Self {
        OwnedFridge {
            catalog_item_id: row.catalog_item_id,
            purchase_price: row.purchase_price,
            daily_earn: row.daily_earn,
            purchased_at: row.purchased_at,
        }
    }
}

impl TryFrom<RequestRow> for FundingRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let kind = RequestKind::parse(&row.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("request {}: kind {}", row.id, row.kind)))?;
        let status = RequestStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("request {}: status {}", row.id, row.status))
        })?;

        Ok(FundingRequest {
            id: row.id,
            kind,
            account: row.email,
            amount: row.amount,
            phone: row.phone,
            reference: row.reference,
            status,
            requested_at: row.requested_at,
            processed_at: row.processed_at,
        })
    }
}

impl From<RewardRow> for ReferralReward {
    fn from(row: RewardRow) -> Self {
        ReferralReward {
            request_id: row.request_id,
            beneficiary: row.beneficiary,
            referee: row.referee,
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fridges_of(&self, email: &str) -> Result<Vec<OwnedFridge>, StoreError> {
        let rows = sqlx::query_as::<_, FridgeRow>(&format!(
            "SELECT {FRIDGE_COLUMNS} FROM owned_fridges WHERE email = $1 ORDER BY position"
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OwnedFridge::from).collect())
    }

    async fn hydrate(&self, row: Option<AccountRow>) -> Result<Option<Account>, StoreError> {
        match row {
            Some(row) => {
                let fridges = self.fridges_of(&row.email).await?;
                Ok(Some(row.into_account(fridges)))
            }
            None => Ok(None),
        }
    }
}

async fn insert_fridges(
    tx: &mut Transaction<'_, Postgres>,
    account: &Account,
) -> Result<(), StoreError> {
    // Fridges are append-only, so rows already stored at a position are kept.
    for (position, fridge) in account.fridges.iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO owned_fridges (email, position, catalog_item_id, purchase_price, daily_earn, purchased_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (email, position) DO NOTHING"#,
        )
        .bind(&account.email)
        .bind(position as i32)
        .bind(&fridge.catalog_item_id)
        .bind(fridge.purchase_price)
        .bind(fridge.daily_earn)
        .bind(fridge.purchased_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Writes the mutable columns of an existing or new account, and its new
/// fridges. `referral_code` and `referred_by` are fixed at registration.
async fn write_account(
    tx: &mut Transaction<'_, Postgres>,
    account: &Account,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO accounts (email, password_hash, phone, balance, referral_code, referred_by,
               last_accrual_date, first_deposit_phone, latest_deposit_phone, created_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           ON CONFLICT (email) DO UPDATE SET
               password_hash = EXCLUDED.password_hash,
               phone = EXCLUDED.phone,
               balance = EXCLUDED.balance,
               last_accrual_date = EXCLUDED.last_accrual_date,
               first_deposit_phone = EXCLUDED.first_deposit_phone,
               latest_deposit_phone = EXCLUDED.latest_deposit_phone"#,
    )
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(&account.phone)
    .bind(account.balance)
    .bind(&account.referral_code)
    .bind(&account.referred_by)
    .bind(account.last_accrual_date)
    .bind(&account.first_deposit_phone)
    .bind(&account.latest_deposit_phone)
    .bind(account.created_at)
    .execute(&mut **tx)
    .await?;

    insert_fridges(tx, account).await
}

/// Returns `false` when the reward is already on record.
async fn insert_reward(
    tx: &mut Transaction<'_, Postgres>,
    reward: &ReferralReward,
) -> Result<bool, StoreError> {
    let res = sqlx::query(
        r#"INSERT INTO referral_rewards (request_id, beneficiary, referee, amount, created_at)
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT (request_id, beneficiary) DO NOTHING"#,
    )
    .bind(reward.request_id)
    .bind(&reward.beneficiary)
    .bind(&reward.referee)
    .bind(reward.amount)
    .bind(reward.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(res.rows_affected() == 1)
}

#[async_trait]
impl AccountStore for PgStore {
    async fn get_account(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE referral_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn insert_account(&self, account: &Account) -> Result<AccountInsert, StoreError> {
        let mut tx = self.pool.begin().await?;

        // No conflict target: a taken email and a taken referral code both
        // leave the row out.
        let res = sqlx::query(
            r#"INSERT INTO accounts (email, password_hash, phone, balance, referral_code, referred_by,
                   last_accrual_date, first_deposit_phone, latest_deposit_phone, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.phone)
        .bind(account.balance)
        .bind(&account.referral_code)
        .bind(&account.referred_by)
        .bind(account.last_accrual_date)
        .bind(&account.first_deposit_phone)
        .bind(&account.latest_deposit_phone)
        .bind(account.created_at)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            let email_taken: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1)")
                    .bind(&account.email)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Ok(if email_taken {
                AccountInsert::EmailTaken
            } else {
                AccountInsert::ReferralCodeTaken
            });
        }

        insert_fridges(&mut tx, account).await?;
        tx.commit().await?;
        Ok(AccountInsert::Created)
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_account(&mut tx, account).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        let fridge_rows = sqlx::query_as::<_, FridgeRow>(&format!(
            "SELECT {FRIDGE_COLUMNS} FROM owned_fridges ORDER BY email, position"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut fridges: HashMap<String, Vec<OwnedFridge>> = HashMap::new();
        for row in fridge_rows {
            fridges.entry(row.email.clone()).or_default().push(row.into());
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let owned = fridges.remove(&row.email).unwrap_or_default();
                row.into_account(owned)
            })
            .collect())
    }
}

#[async_trait]
impl RequestStore for PgStore {
    async fn insert_request(&self, request: &FundingRequest) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO funding_requests (id, kind, email, amount, phone, reference, status, requested_at, processed_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(request.id)
        .bind(request.kind.as_str())
        .bind(&request.account)
        .bind(request.amount)
        .bind(&request.phone)
        .bind(&request.reference)
        .bind(request.status.as_str())
        .bind(request.requested_at)
        .bind(request.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<FundingRequest>, StoreError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM funding_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FundingRequest::try_from).transpose()
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<FundingRequest>, StoreError> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"SELECT {REQUEST_COLUMNS} FROM funding_requests
               WHERE ($1::text IS NULL OR email = $1)
                 AND ($2::text IS NULL OR kind = $2)
                 AND ($3::text IS NULL OR status = $3)
               ORDER BY requested_at DESC"#
        ))
        .bind(filter.account.as_deref())
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FundingRequest::try_from).collect()
    }

    async fn settle_request(&self, write: &SettlementWrite<'_>) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"UPDATE funding_requests SET status = $2, processed_at = $3
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(write.request_id)
        .bind(write.status.as_str())
        .bind(write.at)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(account) = write.account {
            write_account(&mut tx, account).await?;
        }
        if let Some((reward, referrer)) = write.reward {
            if insert_reward(&mut tx, reward).await? {
                write_account(&mut tx, referrer).await?;
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn rewards_for(&self, beneficiary: &str) -> Result<Vec<ReferralReward>, StoreError> {
        let rows = sqlx::query_as::<_, RewardRow>(
            r#"SELECT request_id, beneficiary, referee, amount, created_at
               FROM referral_rewards WHERE beneficiary = $1 ORDER BY created_at"#,
        )
        .bind(beneficiary)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ReferralReward::from).collect())
    }
}
