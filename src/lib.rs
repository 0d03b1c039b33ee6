//! Bitfreeze: users deposit money, buy fridges that earn a fixed amount every
//! day, refer friends for a cash reward, and withdraw after admin approval.
//!
//! The [`Bank`] owns all balance rules; the HTTP layer in [`api`] only parses
//! requests and renders responses.

pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod notify;
pub mod referral;
pub mod responses;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod workflow;

use std::sync::Arc;

use anyhow::{Context, Result};
pub use api::{AppState, init_router};
pub use service::Bank;

use crate::auth::{PasswordHasher, TokenIssuer};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::notify::{AdminLinks, EventReceiver, LogNotifier, Notifier, TelegramNotifier};
use crate::service::Policy;
use crate::store::Store;
use crate::store::memory::MemoryStore;
use crate::store::postgres::{PgStore, init_pool};

/// Opens the configured store: Postgres when `database_url` is set, memory
/// otherwise.
pub async fn init_store(config: &Config) -> Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::new(init_pool(url).await?);
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("using postgres store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state is kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Picks Telegram when both its settings are present.
pub fn init_notifier(config: &Config) -> Arc<dyn Notifier> {
    match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat)) => {
            Arc::new(TelegramNotifier::new(token.clone(), chat.clone()))
        }
        _ => Arc::new(LogNotifier),
    }
}

pub fn admin_links(config: &Config) -> AdminLinks {
    AdminLinks {
        base_url: config.public_url.clone(),
        admin_token: config.admin_token.clone(),
    }
}

/// Wires the application state around `store`. The returned receiver yields
/// the bank's outbound events.
pub fn init_state(config: Config, store: Arc<dyn Store>) -> Result<(AppState, EventReceiver)> {
    let policy = Policy {
        utc_offset: config.utc_offset()?,
        min_withdrawal: config.min_withdrawal,
        phone_policy: config.withdrawal_phone_policy,
    };
    let (events, receiver) = notify::channel();
    let bank = Bank::new(
        store,
        Catalog::default(),
        PasswordHasher::new(config.bcrypt_cost),
        policy,
        events,
    );
    let tokens = TokenIssuer::new(&config.token_secret, config.token_ttl());

    Ok((
        AppState {
            bank,
            tokens,
            config,
        },
        receiver,
    ))
}
