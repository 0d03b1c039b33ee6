//! Persistence of accounts, funding requests and referral rewards.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::Account;
use crate::referral::ReferralReward;
use crate::workflow::{FundingRequest, RequestKind, RequestStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Outcome of [`AccountStore::insert_account`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountInsert {
    Created,
    EmailTaken,
    ReferralCodeTaken,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Account>, StoreError>;

    /// Inserts a new account unless its email or referral code is taken.
    async fn insert_account(&self, account: &Account) -> Result<AccountInsert, StoreError>;

    async fn upsert_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;
}

/// Which requests to list. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct RequestFilter {
    pub account: Option<String>,
    pub kind: Option<RequestKind>,
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    pub fn matches(&self, req: &FundingRequest) -> bool {
        self.account.as_ref().is_none_or(|a| *a == req.account)
            && self.kind.is_none_or(|k| k == req.kind)
            && self.status.is_none_or(|s| s == req.status)
    }
}

/// Everything one admin decision writes.
#[derive(Clone, Copy, Debug)]
pub struct SettlementWrite<'a> {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub at: DateTime<Utc>,
    /// The request's account with the decision applied, when it changed.
    pub account: Option<&'a Account>,
    /// A referral reward and the referrer's account already credited with it.
    /// Skipped if that reward is on record already.
    pub reward: Option<(&'a ReferralReward, &'a Account)>,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert_request(&self, request: &FundingRequest) -> Result<(), StoreError>;

    async fn get_request(&self, id: Uuid) -> Result<Option<FundingRequest>, StoreError>;

    /// Requests matching `filter`, newest first.
    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<FundingRequest>, StoreError>;

    /// Applies an admin decision: moves the request from pending to
    /// `write.status` and stores the accounts and reward that go with it, all
    /// or nothing.
    ///
    /// The status change is a compare-and-set: when the request is not
    /// pending anymore this returns `false` and writes nothing.
    async fn settle_request(&self, write: &SettlementWrite<'_>) -> Result<bool, StoreError>;

    async fn rewards_for(&self, beneficiary: &str) -> Result<Vec<ReferralReward>, StoreError>;
}

/// A complete backend.
pub trait Store: AccountStore + RequestStore {}

impl<T: AccountStore + RequestStore> Store for T {}
