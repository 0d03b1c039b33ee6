//! Deposit and withdrawal requests awaiting an admin decision.
//!
//! A request starts `Pending` and is settled exactly once, to `Approved` or
//! `Rejected`. Settling a request that is already terminal is reported as
//! [`WorkflowError::AlreadyProcessed`] and changes nothing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Deposit,
    Withdrawal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// The admin's answer to a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("request already {0}")]
    AlreadyProcessed(RequestStatus),
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Deposit => "deposit",
            RequestKind::Withdrawal => "withdrawal",
        }
    }

    /// The admin route segment, e.g. `deposits`.
    pub fn route(&self) -> &'static str {
        match self {
            RequestKind::Deposit => "deposits",
            RequestKind::Withdrawal => "withdrawals",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(RequestKind::Deposit),
            "withdrawal" => Some(RequestKind::Withdrawal),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Decision {
    pub fn status(&self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Approved,
            Decision::Reject => RequestStatus::Rejected,
        }
    }
}

/// A deposit or withdrawal submitted by an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    /// Identity of the submitting account.
    pub account: String,
    pub amount: i64,
    /// The mobile-money number the money comes from or goes to.
    pub phone: String,
    /// The payment reference quoted by the user, for deposits.
    pub reference: Option<String>,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl FundingRequest {
    pub fn new(
        kind: RequestKind,
        account: String,
        amount: i64,
        phone: String,
        reference: Option<String>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            account,
            amount,
            phone,
            reference,
            status: RequestStatus::Pending,
            requested_at,
            processed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Moves a pending request to `status`.
    pub fn settle(&mut self, status: RequestStatus, at: DateTime<Utc>) -> Result<(), WorkflowError> {
        if self.status.is_terminal() {
            return Err(WorkflowError::AlreadyProcessed(self.status));
        }
        debug_assert!(status.is_terminal());

        self.status = status;
        self.processed_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Decision, FundingRequest, RequestKind, RequestStatus, WorkflowError};
    use chrono::Utc;

    fn deposit() -> FundingRequest {
        FundingRequest::new(
            RequestKind::Deposit,
            "alice@example.com".into(),
            1000,
            "0711000000".into(),
            Some("QWE123".into()),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_request_is_pending() {
        let req = deposit();
        assert!(req.is_pending());
        assert!(req.processed_at.is_none());
    }

    #[test]
    fn test_settle_once() {
        let mut req = deposit();
        let now = Utc::now();

        assert_eq!(Ok(()), req.settle(Decision::Approve.status(), now));
        assert_eq!(RequestStatus::Approved, req.status);
        assert_eq!(Some(now), req.processed_at);

        let later = now + chrono::Duration::seconds(5);
        assert_eq!(
            Err(WorkflowError::AlreadyProcessed(RequestStatus::Approved)),
            req.settle(RequestStatus::Rejected, later)
        );
        assert_eq!(RequestStatus::Approved, req.status);
        assert_eq!(Some(now), req.processed_at);
    }

    #[test]
    fn test_rejected_is_terminal() {
        let mut req = deposit();
        req.settle(RequestStatus::Rejected, Utc::now()).unwrap();
        assert_eq!(
            Err(WorkflowError::AlreadyProcessed(RequestStatus::Rejected)),
            req.settle(RequestStatus::Approved, Utc::now())
        );
    }

    #[test]
    fn test_parse_roundtrip_names() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
        ] {
            assert_eq!(Some(status), RequestStatus::parse(status.as_str()));
        }
        assert_eq!(Some(RequestKind::Withdrawal), RequestKind::parse("withdrawal"));
        assert_eq!(None, RequestKind::parse("refund"));
    }
}
