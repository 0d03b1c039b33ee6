use axum::{
    Extension, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use chrono::Utc;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::error::{ApiError, ApiErrorWithMeta, E_ALREADY_PROCESSED};
use crate::extract::{AdminAuth, ApiJson, ApiPath, ApiQuery, AuthUser};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::service::{AccrualSummary, Bank, Registration, Settlement};
use crate::store::RequestFilter;
use crate::types::{
    AccountView, BuyRequest, BuyResponse, CatalogResponse, DecisionResponse, DepositRequest,
    LoginRequest, LoginResponse, MeResponse, RegisterRequest, RegisterResponse, RequestsQuery,
    RequestsResponse, SubmittedResponse, WithdrawRequest,
};
use crate::workflow::{Decision, RequestKind};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The ledger and its store.
    pub bank: Bank,
    /// Session token issuer.
    pub tokens: TokenIssuer,
    /// The application configuration.
    pub config: Config,
}

pub fn init_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/me", get(me_handler))
        .route("/catalog", get(catalog_handler))
        .route("/fridges", get(catalog_handler))
        .route("/deposit", post(deposit_handler))
        .route("/withdraw", post(withdraw_handler))
        .route("/buy", post(buy_handler))
        .route("/requests", get(my_requests_handler))
        .route("/admin/requests", get(admin_requests_handler))
        .route("/admin/deposits/{id}/{decision}", get(decide_deposit_handler))
        .route(
            "/admin/withdrawals/{id}/{decision}",
            get(decide_withdrawal_handler),
        )
        .route("/admin/accrual", post(accrual_handler));

    let static_dir = state.config.static_dir.clone();
    let mut router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", api)
        .with_state(state);
    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

async fn register_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<ApiOk<RegisterResponse>, ApiErrorWithMeta> {
    let registration = Registration {
        email: req.email,
        password: req.password,
        phone: req.phone,
        referral_code: req.referral_code,
    };
    let account = st
        .bank
        .register(registration, Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok(
        "registered",
        RegisterResponse {
            email: account.email,
            referral_code: account.referral_code,
        },
        meta,
    ))
}

async fn login_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<ApiOk<LoginResponse>, ApiErrorWithMeta> {
    let account = st
        .bank
        .login(&req.email, &req.password, Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    let token = st
        .tokens
        .issue(&account.email)
        .map_err(|e| crate::service::BankError::from(e).into_api(meta.clone()))?;

    Ok(ApiOk::ok(
        "logged in",
        LoginResponse {
            token,
            balance: account.balance,
        },
        meta,
    ))
}

async fn me_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    user: AuthUser,
) -> Result<ApiOk<MeResponse>, ApiErrorWithMeta> {
    let account = st
        .bank
        .accrue(&user.email, Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    let referral_rewards = st
        .bank
        .rewards(&user.email)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok(
        "account fetched",
        MeResponse {
            balance: account.balance,
            user: AccountView::from(account),
            referral_rewards,
        },
        meta,
    ))
}

async fn catalog_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiOk<CatalogResponse> {
    ApiOk::ok(
        "catalog fetched",
        CatalogResponse {
            fridges: st.bank.catalog().items().to_vec(),
        },
        meta,
    )
}

async fn deposit_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    user: AuthUser,
    ApiJson(req): ApiJson<DepositRequest>,
) -> Result<ApiOk<SubmittedResponse>, ApiErrorWithMeta> {
    let request = st
        .bank
        .request_deposit(&user.email, req.amount, &req.phone, req.reference, Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    let account = st
        .bank
        .account(&user.email)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok(
        "deposit submitted, awaiting confirmation",
        SubmittedResponse {
            request_id: request.id,
            status: request.status,
            balance: account.balance,
        },
        meta,
    ))
}

async fn withdraw_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    user: AuthUser,
    ApiJson(req): ApiJson<WithdrawRequest>,
) -> Result<ApiOk<SubmittedResponse>, ApiErrorWithMeta> {
    let request = st
        .bank
        .request_withdrawal(&user.email, req.amount, &req.phone, Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    let account = st
        .bank
        .account(&user.email)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok(
        "withdrawal submitted, awaiting approval",
        SubmittedResponse {
            request_id: request.id,
            status: request.status,
            balance: account.balance,
        },
        meta,
    ))
}

async fn buy_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    user: AuthUser,
    ApiJson(req): ApiJson<BuyRequest>,
) -> Result<ApiOk<BuyResponse>, ApiErrorWithMeta> {
    let account = st
        .bank
        .buy_fridge(&user.email, &req.fridge_id, Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    let name = st
        .bank
        .catalog()
        .get(&req.fridge_id)
        .map(|item| item.name)
        .unwrap_or("fridge");
    Ok(ApiOk::ok(
        format!("bought {name}"),
        BuyResponse {
            balance: account.balance,
            fridges: account.fridges,
        },
        meta,
    ))
}

async fn my_requests_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    user: AuthUser,
) -> Result<ApiOk<RequestsResponse>, ApiErrorWithMeta> {
    let filter = RequestFilter {
        account: Some(user.email),
        ..Default::default()
    };
    let requests = st
        .bank
        .requests(&filter)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok("requests fetched", RequestsResponse { requests }, meta))
}

async fn admin_requests_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    _admin: AdminAuth,
    ApiQuery(query): ApiQuery<RequestsQuery>,
) -> Result<ApiOk<RequestsResponse>, ApiErrorWithMeta> {
    let filter = RequestFilter {
        account: None,
        kind: query.kind,
        status: query.status,
    };
    let requests = st
        .bank
        .requests(&filter)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok("requests fetched", RequestsResponse { requests }, meta))
}

async fn decide_deposit_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    _admin: AdminAuth,
    ApiPath((id, decision)): ApiPath<(Uuid, Decision)>,
) -> Result<ApiOk<DecisionResponse>, ApiErrorWithMeta> {
    decide(&st, RequestKind::Deposit, id, decision, meta).await
}

async fn decide_withdrawal_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    _admin: AdminAuth,
    ApiPath((id, decision)): ApiPath<(Uuid, Decision)>,
) -> Result<ApiOk<DecisionResponse>, ApiErrorWithMeta> {
    decide(&st, RequestKind::Withdrawal, id, decision, meta).await
}

async fn decide(
    st: &AppState,
    kind: RequestKind,
    id: Uuid,
    decision: Decision,
    meta: RequestMeta,
) -> Result<ApiOk<DecisionResponse>, ApiErrorWithMeta> {
    let settlement = st
        .bank
        .decide(kind, id, decision, Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    match settlement {
        Settlement::Settled { request, balance } => Ok(ApiOk::ok(
            format!("{kind} {}", request.status),
            DecisionResponse {
                request_id: request.id,
                status: request.status,
                balance,
            },
            meta,
        )),
        Settlement::AlreadyProcessed(request) => Err(ApiError::Conflict(format!(
            "{kind} already {}",
            request.status
        ))
        .with_meta(meta)
        .with_code(E_ALREADY_PROCESSED)),
    }
}

async fn accrual_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    _admin: AdminAuth,
) -> Result<ApiOk<AccrualSummary>, ApiErrorWithMeta> {
    let summary = st
        .bank
        .accrue_all(Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok("daily accrual finished", summary, meta))
}
