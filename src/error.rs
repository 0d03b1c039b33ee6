use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::ledger::LedgerError;
use crate::responses::RequestMeta;
use crate::service::BankError;

pub const E_BAD_AMOUNT: &str = "BAD_AMOUNT";
pub const E_VALIDATION: &str = "VALIDATION_FAILED";
pub const E_MALFORMED_BODY: &str = "MALFORMED_BODY";
pub const E_INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const E_INSUFFICIENT_FUNDS: &str = "INSUFFICIENT_FUNDS";
pub const E_UNKNOWN_FRIDGE: &str = "UNKNOWN_FRIDGE";
pub const E_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const E_INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
pub const E_NOT_FOUND: &str = "NOT_FOUND";
pub const E_CONFLICT: &str = "CONFLICT";
pub const E_ALREADY_PROCESSED: &str = "ALREADY_PROCESSED";
pub const E_DB_FAILURE: &str = "DB_FAILURE";
pub const E_INTERNAL: &str = "INTERNAL";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    /// Duplicates and repeated decisions. Rendered as 400.
    Conflict(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn status(&self) -> StatusCode {
        match self.error {
            ApiError::BadRequest(_) | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl BankError {
    /// Maps a domain error onto the HTTP taxonomy.
    pub fn into_api(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let (error, code) = match self {
            BankError::Validation(msg) => (ApiError::BadRequest(msg), E_VALIDATION),
            BankError::InvalidCredentials => (
                ApiError::Unauthorized("invalid credentials".into()),
                E_INVALID_CREDENTIALS,
            ),
            BankError::NotFound(what) => (ApiError::NotFound(format!("{what} not found")), E_NOT_FOUND),
            BankError::Conflict(msg) => (ApiError::Conflict(msg), E_CONFLICT),
            BankError::Workflow(e) => (ApiError::Conflict(e.to_string()), E_ALREADY_PROCESSED),
            BankError::Ledger(e) => {
                let code = match e {
                    LedgerError::InvalidAmount(_) => E_BAD_AMOUNT,
                    LedgerError::InsufficientFunds { .. } => E_INSUFFICIENT_FUNDS,
                    LedgerError::UnknownFridge(_) => E_UNKNOWN_FRIDGE,
                    LedgerError::Overflow => E_BAD_AMOUNT,
                };
                (ApiError::BadRequest(e.to_string()), code)
            }
            BankError::Store(e) => (ApiError::Internal(e.into()), E_DB_FAILURE),
            BankError::Auth(e) => (ApiError::Internal(e.into()), E_INTERNAL),
            BankError::Internal(msg) => (ApiError::Internal(anyhow::anyhow!(msg)), E_INTERNAL),
        };
        error.with_meta(meta).with_code(code)
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self.error {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg) => msg,
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                "internal server error".to_string()
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
