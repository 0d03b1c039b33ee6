use chrono::{Duration, FixedOffset};
use serde::Deserialize;

/// Which phone a withdrawal may be paid out to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhonePolicy {
    /// Any phone number.
    #[default]
    Any,
    /// The phone of the account's first approved deposit.
    FirstDeposit,
    /// The phone of the account's most recent approved deposit.
    LatestDeposit,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Postgres connection string. Without it, state is kept in memory.
    pub database_url: Option<String>,
    pub token_secret: String,
    pub token_ttl_days: i64,
    pub admin_token: String,
    /// Base URL used in admin action links.
    pub public_url: String,
    pub utc_offset_hours: i32,
    pub min_withdrawal: i64,
    pub withdrawal_phone_policy: PhonePolicy,
    pub bcrypt_cost: u32,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub static_dir: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(config::Environment::default())
    }

    pub fn from_source(env: config::Environment) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("server_port", 3000)?
            .set_default("token_ttl_days", 7)?
            .set_default("public_url", "http://localhost:3000")?
            .set_default("utc_offset_hours", 3)?
            .set_default("min_withdrawal", 200)?
            .set_default("withdrawal_phone_policy", "any")?
            .set_default("bcrypt_cost", 10)?
            .add_source(env)
            .build()?;
        config.try_deserialize()
    }

    /// The fixed timezone calendar days are computed in.
    pub fn utc_offset(&self) -> Result<FixedOffset, config::ConfigError> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            config::ConfigError::Message(format!(
                "utc_offset_hours out of range: {}",
                self.utc_offset_hours
            ))
        })
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::days(self.token_ttl_days)
    }
}
