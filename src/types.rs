use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::CatalogItem;
use crate::ledger::{Account, OwnedFridge};
use crate::referral::ReferralReward;
use crate::workflow::{FundingRequest, RequestKind, RequestStatus};

/// The request to register a new account.
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    /// The referral code of the account that invited this user.
    pub referral_code: Option<String>,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub email: String,
    /// The new account's own referral code.
    pub referral_code: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub balance: i64,
}

/// An account as shown to its owner. Never carries the password hash.
#[derive(Serialize)]
pub struct AccountView {
    pub email: String,
    pub phone: Option<String>,
    pub balance: i64,
    pub daily_earnings: i64,
    pub fridges: Vec<OwnedFridge>,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub last_accrual_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(acc: Account) -> Self {
        Self {
            daily_earnings: acc.daily_earnings(),
            email: acc.email,
            phone: acc.phone,
            balance: acc.balance,
            fridges: acc.fridges,
            referral_code: acc.referral_code,
            referred_by: acc.referred_by,
            last_accrual_date: acc.last_accrual_date,
            created_at: acc.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct MeResponse {
    pub balance: i64,
    pub user: AccountView,
    /// Rewards paid to this account for deposits of the accounts it referred.
    pub referral_rewards: Vec<ReferralReward>,
}

#[derive(Serialize)]
pub struct CatalogResponse {
    pub fridges: Vec<CatalogItem>,
}

/// A deposit submission: money sent to the paybill, awaiting confirmation.
#[derive(Deserialize)]
pub struct DepositRequest {
    pub amount: i64,
    /// The phone the payment was made from.
    pub phone: String,
    /// The payment confirmation code.
    pub reference: Option<String>,
}

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub amount: i64,
    /// The phone to pay out to.
    pub phone: String,
}

/// The response after submitting a deposit or a withdrawal.
#[derive(Serialize)]
pub struct SubmittedResponse {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub balance: i64,
}

#[derive(Deserialize)]
pub struct BuyRequest {
    pub fridge_id: String,
}

#[derive(Serialize)]
pub struct BuyResponse {
    pub balance: i64,
    pub fridges: Vec<OwnedFridge>,
}

#[derive(Serialize)]
pub struct RequestsResponse {
    pub requests: Vec<FundingRequest>,
}

/// Query of the admin request listing.
#[derive(Deserialize, Default)]
pub struct RequestsQuery {
    pub kind: Option<RequestKind>,
    pub status: Option<RequestStatus>,
}

/// The response after an admin decision.
#[derive(Serialize)]
pub struct DecisionResponse {
    pub request_id: Uuid,
    pub status: RequestStatus,
    /// Balance of the request's account afterwards.
    pub balance: i64,
}
