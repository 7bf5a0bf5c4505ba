use anyhow::Context;
use chrono::FixedOffset;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, read from `.env` and the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub business_offset: FixedOffset,
    pub slot_lock_timeout: Duration,
    pub reaper_interval: Duration,
    pub reaper_pending_timeout: chrono::Duration,
    pub reaper_alert_threshold: usize,
    pub mp_access_token: String,
    pub mp_api_base: String,
    pub mp_webhook_secret: String,
    pub bot_token: String,
    pub alert_chat_id: Option<i64>,
    pub webapp_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let offset_hours: i32 = parse_or(&lookup, "BUSINESS_UTC_OFFSET_HOURS", -3)?;
        let business_offset = FixedOffset::east_opt(offset_hours * 3600).with_context(|| {
            format!("BUSINESS_UTC_OFFSET_HOURS out of range: {offset_hours}")
        })?;

        let alert_chat_id = match lookup("ALERT_CHAT_ID").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .with_context(|| format!("ALERT_CHAT_ID must be a number, got {raw:?}"))?,
            ),
            None => None,
        };

        Ok(Self {
            database_url: text("DATABASE_URL", "sqlite:barbershop.db?mode=rwc"),
            host: text("HOST", "0.0.0.0"),
            port: parse_or(&lookup, "PORT", 3000)?,
            business_offset,
            slot_lock_timeout: Duration::from_millis(parse_or(&lookup, "SLOT_LOCK_TIMEOUT_MS", 3000)?),
            reaper_interval: Duration::from_secs(parse_or(&lookup, "REAPER_INTERVAL_SECS", 300)?),
            reaper_pending_timeout: chrono::Duration::minutes(parse_or(
                &lookup,
                "REAPER_PENDING_TIMEOUT_MINUTES",
                15,
            )?),
            reaper_alert_threshold: parse_or(&lookup, "REAPER_ALERT_THRESHOLD", 10)?,
            mp_access_token: text("MP_ACCESS_TOKEN", ""),
            mp_api_base: text("MP_API_BASE", "https://api.mercadopago.com"),
            mp_webhook_secret: text("MP_WEBHOOK_SECRET", ""),
            bot_token: text("BOT_TOKEN", ""),
            alert_chat_id,
            webapp_url: lookup("WEBAPP_URL").filter(|v| !v.trim().is_empty()),
        })
    }

    /// Logs the optional integrations that are switched off.
    pub fn warn_missing(&self) {
        if self.mp_access_token.is_empty() {
            tracing::warn!("MP_ACCESS_TOKEN not set, payment lookups will fail");
        }
        if self.mp_webhook_secret.is_empty() {
            tracing::warn!("MP_WEBHOOK_SECRET not set, webhook signatures are not checked");
        }
        if self.bot_token.is_empty() {
            tracing::warn!("BOT_TOKEN not set, Telegram alerts and barber notifications disabled");
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid ({raw:?}): {e}")),
        None => Ok(default),
    }
}
