//! Accounts and the balance rules applied to them.
//!
//! Every operation either fully applies or leaves the account untouched, so a
//! caller can run it on a working copy and only persist on success.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Catalog;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Amounts moved through the ledger must be strictly positive.
    #[error("amount must be greater than zero, got {0}")]
    InvalidAmount(i64),

    #[error("insufficient balance: {balance} available, {required} required")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("unknown fridge `{0}`")]
    UnknownFridge(String),

    /// Adding more money to the balance would overflow.
    #[error("balance overflow")]
    Overflow,
}

/// A fridge owned by an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedFridge {
    pub catalog_item_id: String,
    pub purchase_price: i64,
    pub daily_earn: i64,
    pub purchased_at: DateTime<Utc>,
}

/// One record per registered user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Normalized email, the account identity.
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub balance: i64,
    pub fridges: Vec<OwnedFridge>,
    /// The code other users register with to name this account as referrer.
    pub referral_code: String,
    /// The referrer's identity. Set at registration, never changed.
    pub referred_by: Option<String>,
    /// Last local calendar day daily earnings were credited.
    pub last_accrual_date: Option<NaiveDate>,
    pub first_deposit_phone: Option<String>,
    pub latest_deposit_phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        email: String,
        password_hash: String,
        phone: Option<String>,
        referral_code: String,
        referred_by: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            email,
            password_hash,
            phone,
            balance: 0,
            fridges: Vec::new(),
            referral_code,
            referred_by,
            last_accrual_date: None,
            first_deposit_phone: None,
            latest_deposit_phone: None,
            created_at,
        }
    }

    pub fn apply_deposit(&mut self, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        Ok(self.balance)
    }

    pub fn apply_withdrawal(&mut self, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if amount > self.balance {
            return Err(LedgerError::InsufficientFunds {
                balance: self.balance,
                required: amount,
            });
        }

        self.balance -= amount;
        Ok(self.balance)
    }

    pub fn purchase_fridge(
        &mut self,
        catalog: &Catalog,
        item_id: &str,
        at: DateTime<Utc>,
    ) -> Result<&OwnedFridge, LedgerError> {
        let item = catalog
            .get(item_id)
            .ok_or_else(|| LedgerError::UnknownFridge(item_id.to_string()))?;

        if self.balance < item.price {
            return Err(LedgerError::InsufficientFunds {
                balance: self.balance,
                required: item.price,
            });
        }

        self.balance -= item.price;
        self.fridges.push(OwnedFridge {
            catalog_item_id: item.id.to_string(),
            purchase_price: item.price,
            daily_earn: item.daily_earn,
            purchased_at: at,
        });

        Ok(&self.fridges[self.fridges.len() - 1])
    }

    /// Sum of the daily earnings of every owned fridge.
    pub fn daily_earnings(&self) -> i64 {
        self.fridges.iter().map(|f| f.daily_earn).sum()
    }

    /// Credits one day of fridge earnings, at most once per calendar day.
    ///
    /// Returns `None` when `today` (or a later day) was already accrued,
    /// otherwise the amount credited (possibly zero).
    pub fn accrue_daily(&mut self, today: NaiveDate) -> Result<Option<i64>, LedgerError> {
        if matches!(self.last_accrual_date, Some(last) if last >= today) {
            return Ok(None);
        }

        let earned = self.daily_earnings();
        self.balance = self
            .balance
            .checked_add(earned)
            .ok_or(LedgerError::Overflow)?;
        self.last_accrual_date = Some(today);

        Ok(Some(earned))
    }

    /// Remembers the payout phone of an approved deposit.
    pub fn record_deposit_phone(&mut self, phone: &str) {
        if self.first_deposit_phone.is_none() {
            self.first_deposit_phone = Some(phone.to_string());
        }
        self.latest_deposit_phone = Some(phone.to_string());
    }
}

/// The calendar date of `now` in the fixed business timezone.
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::{Account, LedgerError, local_date};
    use crate::catalog::Catalog;
    use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

    fn account(balance: i64) -> Account {
        let mut acc = Account::new(
            "alice@example.com".into(),
            "hash".into(),
            None,
            "abc123".into(),
            None,
            Utc::now(),
        );
        acc.balance = balance;
        acc
    }

    fn eat() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        eat()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_deposit() {
        let mut acc = account(0);
        assert_eq!(Ok(1000), acc.apply_deposit(1000));
        assert_eq!(Ok(1500), acc.apply_deposit(500));
        assert_eq!(Err(LedgerError::InvalidAmount(0)), acc.apply_deposit(0));
        assert_eq!(Err(LedgerError::InvalidAmount(-5)), acc.apply_deposit(-5));
        assert_eq!(1500, acc.balance);
    }

    #[test]
    fn test_deposit_overflow() {
        let mut acc = account(i64::MAX - 1);
        assert_eq!(Err(LedgerError::Overflow), acc.apply_deposit(2));
        assert_eq!(i64::MAX - 1, acc.balance);
    }

    #[test]
    fn test_withdrawal() {
        let mut acc = account(1000);
        assert_eq!(Ok(700), acc.apply_withdrawal(300));
        assert_eq!(
            Err(LedgerError::InsufficientFunds {
                balance: 700,
                required: 701
            }),
            acc.apply_withdrawal(701)
        );
        assert_eq!(Ok(0), acc.apply_withdrawal(700));
        assert_eq!(0, acc.balance);
    }

    #[test]
    fn test_balance_never_negative() {
        let catalog = Catalog::default();
        let mut acc = account(1200);
        assert!(acc.purchase_fridge(&catalog, "2ft", Utc::now()).is_ok());
        assert_eq!(700, acc.balance);
        assert!(acc.apply_withdrawal(800).is_err());
        assert_eq!(700, acc.balance);
        assert!(acc.apply_withdrawal(700).is_ok());
        assert!(acc.purchase_fridge(&catalog, "2ft", Utc::now()).is_err());
        assert!(acc.apply_withdrawal(1).is_err());
        assert_eq!(0, acc.balance);
        assert_eq!(1, acc.fridges.len());
    }

    #[test]
    fn test_purchase_fridge() {
        let catalog = Catalog::default();
        let mut acc = account(1200);

        let fridge = acc
            .purchase_fridge(&catalog, "4ft", Utc::now())
            .expect("should buy a 4ft fridge")
            .clone();
        assert_eq!("4ft", fridge.catalog_item_id);
        assert_eq!(1000, fridge.purchase_price);
        assert_eq!(55, fridge.daily_earn);
        assert_eq!(200, acc.balance);
        assert_eq!(1, acc.fridges.len());
    }

    #[test]
    fn test_purchase_fridge_insufficient_funds() {
        let catalog = Catalog::default();
        let mut acc = account(400);

        let got = acc.purchase_fridge(&catalog, "2ft", Utc::now()).map(|_| ());
        assert_eq!(
            Err(LedgerError::InsufficientFunds {
                balance: 400,
                required: 500
            }),
            got
        );
        assert_eq!(400, acc.balance);
        assert!(acc.fridges.is_empty());
    }

    #[test]
    fn test_purchase_unknown_fridge() {
        let catalog = Catalog::default();
        let mut acc = account(10_000);

        let got = acc.purchase_fridge(&catalog, "3ft", Utc::now()).map(|_| ());
        assert_eq!(Err(LedgerError::UnknownFridge("3ft".into())), got);
        assert_eq!(10_000, acc.balance);
    }

    #[test]
    fn test_accrue_daily_is_idempotent() {
        let catalog = Catalog::default();
        let mut acc = account(1500);
        acc.purchase_fridge(&catalog, "2ft", Utc::now()).unwrap();
        acc.purchase_fridge(&catalog, "4ft", Utc::now()).unwrap();
        assert_eq!(0, acc.balance);

        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(Ok(Some(80)), acc.accrue_daily(today));
        assert_eq!(Ok(None), acc.accrue_daily(today));
        assert_eq!(80, acc.balance);
        assert_eq!(Some(today), acc.last_accrual_date);

        let tomorrow = today.succ_opt().unwrap();
        assert_eq!(Ok(Some(80)), acc.accrue_daily(tomorrow));
        assert_eq!(160, acc.balance);
    }

    #[test]
    fn test_accrue_never_pays_for_an_earlier_day() {
        let catalog = Catalog::default();
        let mut acc = account(500);
        acc.purchase_fridge(&catalog, "2ft", Utc::now()).unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!(Ok(Some(25)), acc.accrue_daily(today));

        // A clock that moved back, e.g. a changed offset, sees yesterday.
        let yesterday = today.pred_opt().unwrap();
        assert_eq!(Ok(None), acc.accrue_daily(yesterday));
        assert_eq!(25, acc.balance);
        assert_eq!(Some(today), acc.last_accrual_date);
    }

    #[test]
    fn test_accrue_without_fridges_marks_the_day() {
        let mut acc = account(0);
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(Ok(Some(0)), acc.accrue_daily(today));
        assert_eq!(Some(today), acc.last_accrual_date);
    }

    #[test]
    fn test_accrual_across_local_midnight() {
        let catalog = Catalog::default();
        let mut acc = account(500);
        acc.purchase_fridge(&catalog, "2ft", Utc::now()).unwrap();

        // 23:59 and 00:01 EAT are on different local days, even though they
        // are only two minutes apart.
        let before = local_date(at(2024, 5, 1, 23, 59), eat());
        let after = local_date(at(2024, 5, 2, 0, 1), eat());
        assert_ne!(before, after);

        acc.accrue_daily(before).unwrap();
        let balance = acc.balance;
        acc.accrue_daily(after).unwrap();
        assert_eq!(balance + 25, acc.balance);
    }

    #[test]
    fn test_local_date_uses_fixed_offset() {
        // 22:30 UTC is already the next day in EAT.
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap();
        assert_eq!(
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            local_date(now, eat())
        );
        assert_eq!(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            local_date(now, FixedOffset::east_opt(0).unwrap())
        );
    }

    #[test]
    fn test_record_deposit_phone() {
        let mut acc = account(0);
        acc.record_deposit_phone("0711");
        acc.record_deposit_phone("0722");
        assert_eq!(Some("0711".to_string()), acc.first_deposit_phone);
        assert_eq!(Some("0722".to_string()), acc.latest_deposit_phone);
    }
}
