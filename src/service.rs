//! The bank: every state change of an account goes through here.
//!
//! Mutations of one account are serialized by a per-account async mutex. An
//! admin decision is a single store write: a compare-and-set on the request
//! status together with the balances and referral reward it changes. A request
//! is therefore applied to the ledger exactly once, however many times (and
//! however concurrently) an admin clicks, and never half applied.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{AuthError, PasswordHasher};
use crate::catalog::Catalog;
use crate::config::PhonePolicy;
use crate::ledger::{Account, LedgerError, local_date};
use crate::notify::{EventSender, OutboundEvent};
use crate::referral::{ReferralReward, reward_for};
use crate::store::{AccountInsert, RequestFilter, SettlementWrite, Store, StoreError};
use crate::workflow::{Decision, FundingRequest, RequestKind, RequestStatus, WorkflowError};

const MIN_PASSWORD_LEN: usize = 6;
const REFERRAL_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum BankError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Business rules that vary per deployment.
#[derive(Clone, Copy, Debug)]
pub struct Policy {
    pub utc_offset: FixedOffset,
    pub min_withdrawal: i64,
    pub phone_policy: PhonePolicy,
}

/// The result of an admin decision.
#[derive(Debug)]
pub enum Settlement {
    /// The decision was applied. `balance` is the account balance afterwards.
    Settled {
        request: FundingRequest,
        balance: i64,
    },
    /// The request had already been decided; nothing changed.
    AlreadyProcessed(FundingRequest),
}

/// What a sweep over all accounts did.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct AccrualSummary {
    pub accounts: usize,
    pub credited: usize,
    pub total: i64,
    pub failed: usize,
}

/// Fields of a registration, already parsed.
#[derive(Debug)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub referral_code: Option<String>,
}

#[derive(Default)]
struct AccountLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AccountLocks {
    async fn lock(&self, email: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(email.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Locks several accounts, always in the same order.
    async fn lock_all(&self, emails: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        let mut emails = emails.to_vec();
        emails.sort_unstable();
        emails.dedup();

        let mut guards = Vec::with_capacity(emails.len());
        for email in emails {
            guards.push(self.lock(email).await);
        }
        guards
    }
}

#[derive(Clone)]
pub struct Bank {
    store: Arc<dyn Store>,
    catalog: Arc<Catalog>,
    hasher: PasswordHasher,
    policy: Policy,
    locks: Arc<AccountLocks>,
    events: EventSender,
}

/// Trims and lowercases an email, rejecting obviously malformed ones.
pub fn normalize_email(email: &str) -> Result<String, BankError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(BankError::Validation("a valid email is required".into())),
    }
}

fn normalize_phone(phone: &str) -> Result<String, BankError> {
    let phone: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    if phone.is_empty() {
        return Err(BankError::Validation("phone is required".into()));
    }
    Ok(phone)
}

fn new_referral_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

impl Bank {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Catalog,
        hasher: PasswordHasher,
        policy: Policy,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            catalog: Arc::new(catalog),
            hasher,
            policy,
            locks: Arc::new(AccountLocks::default()),
            events,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn emit(&self, event: OutboundEvent) {
        if self.events.send(event).is_err() {
            debug!("notifier is gone, event dropped");
        }
    }

    pub async fn account(&self, email: &str) -> Result<Account, BankError> {
        self.store
            .get_account(email)
            .await?
            .ok_or_else(|| BankError::NotFound(format!("account {email}")))
    }

    pub async fn register(&self, reg: Registration, now: DateTime<Utc>) -> Result<Account, BankError> {
        let email = normalize_email(&reg.email)?;
        if reg.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BankError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let phone = reg
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(normalize_phone)
            .transpose()?;

        let referred_by = match reg.referral_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let referrer = self
                    .store
                    .find_by_referral_code(&code.to_uppercase())
                    .await?
                    .ok_or_else(|| BankError::Validation("unknown referral code".into()))?;
                Some(referrer.email)
            }
            _ => None,
        };

        let hasher = self.hasher;
        let password = reg.password;
        let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| BankError::Internal(e.to_string()))??;

        let mut account = Account::new(
            email,
            password_hash,
            phone,
            new_referral_code(),
            referred_by,
            now,
        );
        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            match self.store.insert_account(&account).await? {
                AccountInsert::Created => {
                    info!(email = %account.email, "account registered");
                    self.emit(OutboundEvent::AccountRegistered {
                        email: account.email.clone(),
                        referred_by: account.referred_by.clone(),
                    });
                    return Ok(account);
                }
                AccountInsert::EmailTaken => {
                    return Err(BankError::Conflict("email already registered".into()));
                }
                AccountInsert::ReferralCodeTaken => {
                    debug!(code = %account.referral_code, "referral code taken, drawing another");
                    account.referral_code = new_referral_code();
                }
            }
        }
        Err(BankError::Internal("no free referral code".into()))
    }

    /// Checks credentials, then credits any earnings due today.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, BankError> {
        let email = normalize_email(email).map_err(|_| BankError::InvalidCredentials)?;
        let account = self
            .store
            .get_account(&email)
            .await?
            .ok_or(BankError::InvalidCredentials)?;

        let hasher = self.hasher;
        let password = password.to_string();
        let hash = account.password_hash.clone();
        let ok = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| BankError::Internal(e.to_string()))?;
        if !ok {
            return Err(BankError::InvalidCredentials);
        }

        self.accrue(&email, now).await
    }

    /// Credits today's fridge earnings to one account, if not done yet.
    pub async fn accrue(&self, email: &str, now: DateTime<Utc>) -> Result<Account, BankError> {
        let _guard = self.locks.lock(email).await;
        let mut account = self.account(email).await?;

        let today = local_date(now, self.policy.utc_offset);
        if let Some(earned) = account.accrue_daily(today)? {
            self.store.upsert_account(&account).await?;
            if earned > 0 {
                debug!(email, earned, %today, "daily earnings credited");
            }
        }
        Ok(account)
    }

    /// Runs the daily accrual over every account. Failures are logged per
    /// account and do not stop the sweep.
    pub async fn accrue_all(&self, now: DateTime<Utc>) -> Result<AccrualSummary, BankError> {
        let today = local_date(now, self.policy.utc_offset);
        let emails: Vec<String> = self
            .store
            .list_accounts()
            .await?
            .into_iter()
            .map(|acc| acc.email)
            .collect();

        let mut summary = AccrualSummary {
            accounts: emails.len(),
            ..Default::default()
        };
        for email in emails {
            let _guard = self.locks.lock(&email).await;
            let result = async {
                let mut account = self.account(&email).await?;
                let earned = account.accrue_daily(today)?;
                if earned.is_some() {
                    self.store.upsert_account(&account).await?;
                }
                Ok::<_, BankError>(earned)
            }
            .await;

            match result {
                Ok(Some(earned)) if earned > 0 => {
                    summary.credited += 1;
                    summary.total += earned;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(email = %email, "daily accrual failed: {e}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            %today,
            accounts = summary.accounts,
            credited = summary.credited,
            total = summary.total,
            "daily accrual finished"
        );
        Ok(summary)
    }

    pub async fn buy_fridge(
        &self,
        email: &str,
        fridge_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, BankError> {
        let _guard = self.locks.lock(email).await;
        let mut account = self.account(email).await?;

        let fridge = account.purchase_fridge(&self.catalog, fridge_id, now)?;
        info!(email, fridge = %fridge.catalog_item_id, "fridge bought");

        self.store.upsert_account(&account).await?;
        Ok(account)
    }

    async fn ensure_no_pending(&self, email: &str, kind: RequestKind) -> Result<(), BankError> {
        let filter = RequestFilter {
            account: Some(email.to_string()),
            kind: Some(kind),
            status: Some(RequestStatus::Pending),
        };
        if !self.store.list_requests(&filter).await?.is_empty() {
            return Err(BankError::Conflict(format!(
                "a {kind} request is already pending"
            )));
        }
        Ok(())
    }

    pub async fn request_deposit(
        &self,
        email: &str,
        amount: i64,
        phone: &str,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FundingRequest, BankError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount).into());
        }
        let phone = normalize_phone(phone)?;
        let reference = reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let _guard = self.locks.lock(email).await;
        self.account(email).await?;
        self.ensure_no_pending(email, RequestKind::Deposit).await?;

        let request = FundingRequest::new(
            RequestKind::Deposit,
            email.to_string(),
            amount,
            phone,
            reference,
            now,
        );
        self.store.insert_request(&request).await?;

        info!(email, amount, id = %request.id, "deposit requested");
        self.emit(OutboundEvent::RequestSubmitted(request.clone()));
        Ok(request)
    }

    pub async fn request_withdrawal(
        &self,
        email: &str,
        amount: i64,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<FundingRequest, BankError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount).into());
        }
        if amount < self.policy.min_withdrawal {
            return Err(BankError::Validation(format!(
                "minimum withdrawal is KES {}",
                self.policy.min_withdrawal
            )));
        }
        let phone = normalize_phone(phone)?;

        let _guard = self.locks.lock(email).await;
        let account = self.account(email).await?;
        if amount > account.balance {
            return Err(LedgerError::InsufficientFunds {
                balance: account.balance,
                required: amount,
            }
            .into());
        }

        let allowed = match self.policy.phone_policy {
            PhonePolicy::Any => None,
            PhonePolicy::FirstDeposit => Some(account.first_deposit_phone.as_deref()),
            PhonePolicy::LatestDeposit => Some(account.latest_deposit_phone.as_deref()),
        };
        match allowed {
            None => {}
            Some(None) => {
                return Err(BankError::Validation(
                    "withdrawals need an approved deposit first".into(),
                ));
            }
            Some(Some(allowed)) if allowed != phone => {
                return Err(BankError::Validation(format!(
                    "withdrawals are paid to the deposit phone {allowed}"
                )));
            }
            Some(Some(_)) => {}
        }

        self.ensure_no_pending(email, RequestKind::Withdrawal).await?;

        let request = FundingRequest::new(
            RequestKind::Withdrawal,
            email.to_string(),
            amount,
            phone,
            None,
            now,
        );
        self.store.insert_request(&request).await?;

        info!(email, amount, id = %request.id, "withdrawal requested");
        self.emit(OutboundEvent::RequestSubmitted(request.clone()));
        Ok(request)
    }

    async fn request(&self, kind: RequestKind, id: Uuid) -> Result<FundingRequest, BankError> {
        self.store
            .get_request(id)
            .await?
            .filter(|req| req.kind == kind)
            .ok_or_else(|| BankError::NotFound(format!("{kind} request {id}")))
    }

    pub async fn requests(&self, filter: &RequestFilter) -> Result<Vec<FundingRequest>, BankError> {
        Ok(self.store.list_requests(filter).await?)
    }

    pub async fn rewards(&self, email: &str) -> Result<Vec<ReferralReward>, BankError> {
        Ok(self.store.rewards_for(email).await?)
    }

    /// Applies an admin decision to a pending request.
    ///
    /// Approving a withdrawal re-checks the balance: if it no longer covers
    /// the amount, the request is rejected and `InsufficientFunds` returned.
    /// Approving a deposit of a referred account also pays the referrer.
    /// The status change, balances and reward are stored in one write, so a
    /// failed decision leaves the request pending and can be retried.
    pub async fn decide(
        &self,
        kind: RequestKind,
        id: Uuid,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Settlement, BankError> {
        let request = self.request(kind, id).await?;
        if !request.is_pending() {
            return Ok(Settlement::AlreadyProcessed(request));
        }

        // `referred_by` never changes, so the referrer is known before locking.
        let referrer = match (decision, kind) {
            (Decision::Approve, RequestKind::Deposit) if reward_for(request.amount) > 0 => self
                .account(&request.account)
                .await?
                .referred_by
                .filter(|r| *r != request.account),
            _ => None,
        };
        let mut emails = vec![request.account.as_str()];
        emails.extend(referrer.as_deref());
        let guards = self.locks.lock_all(&emails).await;

        // Another decision may have won while we waited for the locks.
        let mut request = self.request(kind, id).await?;
        if !request.is_pending() {
            return Ok(Settlement::AlreadyProcessed(request));
        }
        let mut account = self.account(&request.account).await?;

        let applied = match (decision, kind) {
            (Decision::Reject, _) => Ok(()),
            (Decision::Approve, RequestKind::Deposit) => {
                account.apply_deposit(request.amount).map(|_| ())
            }
            (Decision::Approve, RequestKind::Withdrawal) => {
                account.apply_withdrawal(request.amount).map(|_| ())
            }
        };
        let status = match applied {
            Ok(()) => decision.status(),
            Err(_) => RequestStatus::Rejected,
        };
        if status == RequestStatus::Approved && kind == RequestKind::Deposit {
            account.record_deposit_phone(&request.phone);
        }

        let reward = match referrer.as_deref() {
            Some(referrer) if status == RequestStatus::Approved => {
                self.referral_reward(referrer, &account, &request, now).await?
            }
            _ => None,
        };

        let write = SettlementWrite {
            request_id: id,
            status,
            at: now,
            account: (status == RequestStatus::Approved).then_some(&account),
            reward: reward.as_ref().map(|(reward, referrer)| (reward, referrer)),
        };
        if !self.store.settle_request(&write).await? {
            let current = self.request(kind, id).await?;
            return Ok(Settlement::AlreadyProcessed(current));
        }
        request.settle(status, now)?;
        drop(guards);

        info!(
            email = %request.account,
            id = %request.id,
            kind = %kind,
            status = %status,
            amount = request.amount,
            "request settled"
        );
        self.emit(OutboundEvent::RequestSettled {
            request: request.clone(),
            note: applied.as_ref().err().map(|e| e.to_string()),
        });
        if let Some((reward, _)) = reward {
            info!(
                referrer = %reward.beneficiary,
                referee = %reward.referee,
                amount = reward.amount,
                "referral reward paid"
            );
            self.emit(OutboundEvent::ReferralRewarded {
                referrer: reward.beneficiary,
                referee: reward.referee,
                amount: reward.amount,
            });
        }

        if let Err(e) = applied {
            return Err(e.into());
        }
        Ok(Settlement::Settled {
            request,
            balance: account.balance,
        })
    }

    /// The reward owed to `referrer` for an approved deposit, with the
    /// referrer's account already credited. The caller holds its lock.
    async fn referral_reward(
        &self,
        referrer: &str,
        depositor: &Account,
        deposit: &FundingRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<(ReferralReward, Account)>, BankError> {
        let Some(mut account) = self.store.get_account(referrer).await? else {
            warn!(referrer, "referrer account missing, reward skipped");
            return Ok(None);
        };

        let amount = reward_for(deposit.amount);
        account.apply_deposit(amount)?;
        let reward = ReferralReward {
            request_id: deposit.id,
            beneficiary: referrer.to_string(),
            referee: depositor.email.clone(),
            amount,
            created_at: now,
        };
        Ok(Some((reward, account)))
    }
}
