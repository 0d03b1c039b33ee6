use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{AccountInsert, AccountStore, RequestFilter, RequestStore, SettlementWrite, StoreError};
use crate::ledger::Account;
use crate::referral::ReferralReward;
use crate::workflow::FundingRequest;

/// Keeps everything in process memory. Used when no database is configured,
/// and by tests.
#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<String, Account>,
    /// referral code -> email
    codes: DashMap<String, String>,
    requests: DashMap<Uuid, FundingRequest>,
    rewards: DashMap<(Uuid, String), ReferralReward>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_account(&self, account: &Account) {
        self.accounts.insert(account.email.clone(), account.clone());
        self.codes
            .insert(account.referral_code.clone(), account.email.clone());
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(email).map(|acc| acc.value().clone()))
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Account>, StoreError> {
        let Some(email) = self.codes.get(code).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        self.get_account(&email).await
    }

    async fn insert_account(&self, account: &Account) -> Result<AccountInsert, StoreError> {
        let Entry::Vacant(code) = self.codes.entry(account.referral_code.clone()) else {
            return Ok(AccountInsert::ReferralCodeTaken);
        };
        match self.accounts.entry(account.email.clone()) {
            Entry::Occupied(_) => Ok(AccountInsert::EmailTaken),
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
                code.insert(account.email.clone());
                Ok(AccountInsert::Created)
            }
        }
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), StoreError> {
        self.put_account(account);
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|acc| acc.value().clone()).collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(accounts)
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert_request(&self, request: &FundingRequest) -> Result<(), StoreError> {
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<FundingRequest>, StoreError> {
        Ok(self.requests.get(&id).map(|req| req.value().clone()))
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<FundingRequest>, StoreError> {
        let mut requests: Vec<FundingRequest> = self
            .requests
            .iter()
            .filter(|req| filter.matches(req))
            .map(|req| req.value().clone())
            .collect();
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(requests)
    }

    async fn settle_request(&self, write: &SettlementWrite<'_>) -> Result<bool, StoreError> {
        // The request's shard stays write-locked until every write is in, so
        // readers of the request never see it settled without its effects.
        let Some(mut req) = self.requests.get_mut(&write.request_id) else {
            return Ok(false);
        };
        if req.settle(write.status, write.at).is_err() {
            return Ok(false);
        }

        if let Some(account) = write.account {
            self.put_account(account);
        }
        if let Some((reward, referrer)) = write.reward {
            if let Entry::Vacant(slot) = self
                .rewards
                .entry((reward.request_id, reward.beneficiary.clone()))
            {
                slot.insert(reward.clone());
                self.put_account(referrer);
            }
        }
        Ok(true)
    }

    async fn rewards_for(&self, beneficiary: &str) -> Result<Vec<ReferralReward>, StoreError> {
        let mut rewards: Vec<ReferralReward> = self
            .rewards
            .iter()
            .filter(|r| r.beneficiary == beneficiary)
            .map(|r| r.value().clone())
            .collect();
        rewards.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rewards)
    }
}
