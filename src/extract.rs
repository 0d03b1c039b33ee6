use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{Extensions, header::AUTHORIZATION, request::Parts},
};
use serde::{Deserialize, de::DeserializeOwned};

use crate::api::AppState;
use crate::error::{ApiError, ApiErrorWithMeta, E_INVALID_PARAMS, E_MALFORMED_BODY, E_UNAUTHORIZED};
use crate::responses::RequestMeta;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

fn meta_of(extensions: &Extensions) -> RequestMeta {
    extensions
        .get::<RequestMeta>()
        .cloned()
        .unwrap_or_else(RequestMeta::now)
}

fn unauthorized(meta: &RequestMeta, msg: &str) -> ApiErrorWithMeta {
    ApiError::Unauthorized(msg.to_string())
        .with_meta(meta.clone())
        .with_code(E_UNAUTHORIZED)
}

/// Like [`Json`], but a body that fails to parse is a 400 with our error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiErrorWithMeta;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let meta = meta_of(req.extensions());
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())
                .with_meta(meta)
                .with_code(E_MALFORMED_BODY)),
        }
    }
}

fn invalid_params(meta: RequestMeta, msg: String) -> ApiErrorWithMeta {
    ApiError::BadRequest(msg)
        .with_meta(meta)
        .with_code(E_INVALID_PARAMS)
}

/// Like [`Path`], with our error body on a bad segment.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => Err(invalid_params(
                meta_of(&parts.extensions),
                rejection.body_text(),
            )),
        }
    }
}

/// Like [`Query`], with our error body on a bad query string.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::try_from_uri(&parts.uri) {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(invalid_params(
                meta_of(&parts.extensions),
                rejection.body_text(),
            )),
        }
    }
}

/// The account identity carried by a valid `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub email: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let meta = meta_of(&parts.extensions);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized(&meta, "missing token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| unauthorized(&meta, "bad token"))?;

        let email = state
            .tokens
            .verify(token)
            .map_err(|_| unauthorized(&meta, "invalid token"))?;
        Ok(AuthUser { email })
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Proof that the caller presented the admin secret, as `?token=` or in the
/// `x-admin-token` header.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let meta = meta_of(&parts.extensions);

        let supplied = match parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(token) => Some(token.to_string()),
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token),
        };

        let expected = &state.config.admin_token;
        match supplied {
            Some(token) if !expected.is_empty() && token == *expected => Ok(AdminAuth),
            Some(_) => Err(unauthorized(&meta, "invalid admin token")),
            None => Err(unauthorized(&meta, "missing admin token")),
        }
    }
}
